use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use storefront_offline::app::{App, Stores};
use storefront_offline::cache::sweep_all;
use storefront_offline::config::Config;
use storefront_offline::logging;
use storefront_offline::network::{Connectivity, HttpTransport};
use storefront_offline::queue::{DrainOutcome, Headers, OfflineQueue};
use storefront_offline::store::RequestStore;

#[derive(Parser, Debug)]
#[command(name = "storefront-offline")]
#[command(about = "Offline cache and request queue for the storefront client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/storefront-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Monitor connectivity, sweep caches and replay the queue until Ctrl-C
  Run,
  /// Probe the server once and print connectivity
  Status,
  /// Queue a request for replay
  Enqueue {
    #[arg(short = 'X', long, default_value = "POST")]
    method: String,
    #[arg(short, long)]
    url: String,
    /// Header as "Name: value"; repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Replay queued requests now
  Drain,
  /// List queued requests
  Queue,
  /// Inspect or modify the durable cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  Get { key: String },
  /// Store a JSON value
  Set {
    key: String,
    value: String,
    #[arg(long)]
    ttl_secs: Option<u64>,
  },
  Remove { key: String },
  Clear,
  /// Approximate size of the durable cache in bytes
  Size,
  /// Remove expired entries from every cache
  Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  match args.command {
    Command::Run => run(&config).await,
    Command::Status => status(&config).await,
    Command::Enqueue {
      method,
      url,
      headers,
      data,
    } => enqueue(&config, &method, &url, &headers, data),
    Command::Drain => drain(&config).await,
    Command::Queue => list_queue(&config),
    Command::Cache(cmd) => cache(&config, cmd),
  }
}

async fn run(config: &Config) -> Result<()> {
  let app = App::start(config)?;

  // Replay anything left over from the last session
  app.queue.drain().await?;

  tokio::signal::ctrl_c().await?;
  info!("shutting down");
  app.shutdown();
  Ok(())
}

async fn status(config: &Config) -> Result<()> {
  let app = App::open(config)?;
  let online = app.monitor.probe_now().await;

  println!("online: {}", online);
  match app.monitor.connection_info() {
    Some(info) => println!(
      "link: {} ({}), {} Mbps, {} ms rtt, data saver {}",
      info.link_type, info.effective_type, info.downlink_mbps, info.rtt_ms, info.data_saver_enabled
    ),
    None => println!("link: unavailable"),
  }
  println!("queued requests: {}", app.queue.len()?);

  app.shutdown();
  Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}', expected 'Name: value'", raw))?;
  Ok((name.trim().to_string(), value.trim().to_string()))
}

fn enqueue(
  config: &Config,
  method: &str,
  url: &str,
  headers: &[String],
  data: Option<String>,
) -> Result<()> {
  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
  let headers = headers
    .iter()
    .map(|h| parse_header(h))
    .collect::<Result<Vec<_>>>()?;

  // The queue needs connectivity only to drain; an offline stand-in is enough here
  let stores = Stores::open(config)?;
  let transport = Arc::new(HttpTransport::new(Some(&config.api_base_url))?);
  let queue = OfflineQueue::new(stores.storage.clone(), transport, Arc::new(Offline));

  let id = queue.enqueue(url, method, Headers::from(headers), data.map(String::into_bytes))?;
  println!("queued request {}", id);
  Ok(())
}

struct Offline;

impl Connectivity for Offline {
  fn is_online(&self) -> bool {
    false
  }
}

async fn drain(config: &Config) -> Result<()> {
  let app = App::open(config)?;

  if !app.monitor.probe_now().await {
    println!("server unreachable; queue left as is");
    app.shutdown();
    return Ok(());
  }

  match app.queue.drain().await? {
    DrainOutcome::Completed(report) => println!(
      "replayed {}, failed {}, dropped {}",
      report.replayed, report.failed, report.dropped
    ),
    DrainOutcome::Offline => println!("offline; nothing sent"),
    DrainOutcome::AlreadyDraining => println!("a drain is already running"),
  }

  app.shutdown();
  Ok(())
}

fn list_queue(config: &Config) -> Result<()> {
  let stores = Stores::open(config)?;
  let pending = stores.storage.all()?;

  if pending.is_empty() {
    println!("queue is empty");
  }
  for request in pending {
    println!(
      "{:>5}  {}  {:<6} {}  ({} bytes)",
      request.id,
      request.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
      request.method,
      request.url,
      request.body.as_ref().map_or(0, Vec::len)
    );
  }
  Ok(())
}

fn cache(config: &Config, cmd: CacheCommand) -> Result<()> {
  let stores = Stores::open(config)?;
  let durable = &stores.durable;

  match cmd {
    CacheCommand::Get { key } => match durable.get::<serde_json::Value>(&key) {
      Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
      None => println!("(no value)"),
    },
    CacheCommand::Set {
      key,
      value,
      ttl_secs,
    } => {
      let value: serde_json::Value =
        serde_json::from_str(&value).map_err(|e| eyre!("Value must be JSON: {}", e))?;
      match ttl_secs {
        Some(secs) => durable.set_with_ttl(&key, &value, Duration::from_secs(secs)),
        None => durable.set(&key, &value),
      }
    }
    CacheCommand::Remove { key } => durable.remove(&key),
    CacheCommand::Clear => durable.clear(),
    CacheCommand::Size => println!("{} bytes", durable.size_bytes()),
    CacheCommand::Sweep => {
      let removed = sweep_all(&stores.sweep_targets());
      println!("removed {} expired entries", removed);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_header_trims() {
    assert_eq!(
      parse_header("Content-Type:  application/json ").unwrap(),
      ("Content-Type".to_string(), "application/json".to_string())
    );
    assert!(parse_header("no-colon").is_err());
  }

  #[test]
  fn test_cli_parses_enqueue() {
    let args = Args::parse_from([
      "storefront-offline",
      "enqueue",
      "-X",
      "put",
      "--url",
      "/api/cart",
      "-H",
      "x-a: 1",
      "--data",
      "{}",
    ]);
    assert!(matches!(args.command, Command::Enqueue { ref method, .. } if method == "put"));
  }
}
