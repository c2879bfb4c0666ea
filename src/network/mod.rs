//! Connectivity tracking and the transport it probes through.

mod monitor;
mod platform;
mod transport;

pub use monitor::{
  Connectivity, ConnectivityMonitor, MonitorConfig, NetworkStatus, Subscription,
};
pub use platform::{ConnectionInfo, EffectiveType, Platform, PlatformEvent, SignalPlatform};
pub use transport::{HttpTransport, Request, Response, Transport};
