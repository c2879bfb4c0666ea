//! Platform-level connectivity signals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Edge event reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
  Online,
  Offline,
}

impl PlatformEvent {
  pub fn is_online(self) -> bool {
    matches!(self, PlatformEvent::Online)
  }
}

/// Effective link class, as classified by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectiveType {
  #[serde(rename = "slow-2g")]
  Slow2g,
  #[serde(rename = "2g")]
  TwoG,
  #[serde(rename = "3g")]
  ThreeG,
  #[serde(rename = "4g")]
  FourG,
  #[default]
  #[serde(other, rename = "unknown")]
  Unknown,
}

impl EffectiveType {
  /// "slow-2g" and "2g" links.
  pub fn is_2g_class(self) -> bool {
    matches!(self, EffectiveType::Slow2g | EffectiveType::TwoG)
  }
}

impl fmt::Display for EffectiveType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      EffectiveType::Slow2g => "slow-2g",
      EffectiveType::TwoG => "2g",
      EffectiveType::ThreeG => "3g",
      EffectiveType::FourG => "4g",
      EffectiveType::Unknown => "unknown",
    };
    f.write_str(label)
  }
}

/// Best-effort link telemetry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
  /// e.g. "wifi", "cellular"
  pub link_type: String,
  pub effective_type: EffectiveType,
  pub downlink_mbps: f64,
  pub rtt_ms: u32,
  pub data_saver_enabled: bool,
}

impl ConnectionInfo {
  pub fn is_slow(&self) -> bool {
    self.effective_type.is_2g_class() || self.data_saver_enabled
  }
}

/// Source of connectivity signals for the monitor.
pub trait Platform: Send + Sync {
  /// Connectivity as the platform currently reports it.
  fn reports_online(&self) -> bool;

  /// Link telemetry, or `None` if the platform has none.
  fn connection_info(&self) -> Option<ConnectionInfo>;

  /// Stream of online/offline edge events.
  fn events(&self) -> broadcast::Receiver<PlatformEvent>;
}

/// A platform driven by whoever holds it: OS integrations or tests call
/// `emit` when the link changes.
pub struct SignalPlatform {
  online: AtomicBool,
  info: Mutex<Option<ConnectionInfo>>,
  tx: broadcast::Sender<PlatformEvent>,
}

impl SignalPlatform {
  pub fn new(online: bool) -> Self {
    let (tx, _) = broadcast::channel(16);
    Self {
      online: AtomicBool::new(online),
      info: Mutex::new(None),
      tx,
    }
  }

  /// Record and broadcast an edge event. Redundant events are still sent;
  /// deduplication is the monitor's job.
  pub fn emit(&self, event: PlatformEvent) {
    self.online.store(event.is_online(), Ordering::SeqCst);
    // No receivers just means nobody is monitoring yet
    let _ = self.tx.send(event);
  }

  pub fn set_connection_info(&self, info: Option<ConnectionInfo>) {
    *self.info.lock().unwrap_or_else(|e| e.into_inner()) = info;
  }
}

impl Platform for SignalPlatform {
  fn reports_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }

  fn connection_info(&self) -> Option<ConnectionInfo> {
    self.info.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }

  fn events(&self) -> broadcast::Receiver<PlatformEvent> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_effective_type_parses_platform_labels() {
    let info: ConnectionInfo = serde_json::from_str(
      r#"{"linkType":"cellular","effectiveType":"slow-2g","downlinkMbps":0.05,"rttMs":2000,"dataSaverEnabled":false}"#,
    )
    .unwrap();
    assert_eq!(info.effective_type, EffectiveType::Slow2g);
    assert!(info.is_slow());

    let other: EffectiveType = serde_json::from_str(r#""5g""#).unwrap();
    assert_eq!(other, EffectiveType::Unknown);
  }

  #[test]
  fn test_data_saver_counts_as_slow() {
    let info = ConnectionInfo {
      link_type: "wifi".to_string(),
      effective_type: EffectiveType::FourG,
      downlink_mbps: 50.0,
      rtt_ms: 20,
      data_saver_enabled: true,
    };
    assert!(info.is_slow());
  }

  #[tokio::test]
  async fn test_emit_updates_state_and_broadcasts() {
    let platform = SignalPlatform::new(true);
    let mut events = platform.events();

    platform.emit(PlatformEvent::Offline);

    assert!(!platform.reports_online());
    assert_eq!(events.recv().await.unwrap(), PlatformEvent::Offline);
  }
}
