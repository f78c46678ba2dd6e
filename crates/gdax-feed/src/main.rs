//! gdax-feed: Stream the GDAX websocket feed
//!
//! Subscribes to the configured products, classifies and counts every record,
//! and optionally mirrors raw records to rotating log files.

use clap::Parser;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gdax_feed_lib::{
    classify, log_record, run_server, DecodePolicy, FeedClient, FeedError, FeedHandler,
    FeedOptions, LogWriter, RawRecord, ServerState, SubscriptionMode, WsConnector,
};

#[derive(Parser, Debug)]
#[command(name = "gdax-feed")]
#[command(about = "Streaming client for the GDAX websocket feed")]
struct Args {
    /// Path to YAML feed options; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Feed URL
    #[arg(long)]
    url: Option<String>,

    /// Product to subscribe to (repeatable)
    #[arg(short, long = "product")]
    products: Vec<String>,

    /// Also request heartbeat messages
    #[arg(long)]
    heartbeat: bool,

    /// Directory for raw record logs
    #[arg(long)]
    save_dir: Option<PathBuf>,

    #[arg(long)]
    save_prefix: Option<String>,

    /// Rotate log files past this size
    #[arg(long)]
    save_max_bytes: Option<u64>,

    /// Report undecodable frames and keep going instead of closing
    #[arg(long)]
    skip_bad_frames: bool,

    /// Health server bind address (disabled when unset)
    #[arg(long)]
    health_addr: Option<String>,

    /// Exit after this many records
    #[arg(long)]
    max_messages: Option<u64>,
}

impl Args {
    fn options(&self) -> Result<FeedOptions, Box<dyn std::error::Error>> {
        let mut options = match &self.config {
            Some(path) => FeedOptions::load(path)?,
            None => FeedOptions::default(),
        };

        if let Some(url) = &self.url {
            options.url = Some(url.clone());
        }
        if !self.products.is_empty() {
            options.products = Some(self.products.clone());
        }
        if self.heartbeat {
            options.subscription_mode = Some(SubscriptionMode::Heartbeat);
        }
        if let Some(dir) = &self.save_dir {
            options.save_directory = Some(dir.clone());
        }
        if let Some(prefix) = &self.save_prefix {
            options.save_file_prefix = Some(prefix.clone());
        }
        if let Some(max_bytes) = self.save_max_bytes {
            options.save_max_bytes = Some(max_bytes);
        }
        if self.skip_bad_frames {
            options.decode_errors = Some(DecodePolicy::Skip);
        }
        Ok(options)
    }
}

/// Counts and classifies records, then mirrors them to the log.
struct CountingHandler {
    received: u64,
    malformed: u64,
    unrecognized: u64,
    by_kind: BTreeMap<&'static str, u64>,
    count_tx: watch::Sender<u64>,
}

impl CountingHandler {
    fn new(count_tx: watch::Sender<u64>) -> Self {
        Self {
            received: 0,
            malformed: 0,
            unrecognized: 0,
            by_kind: BTreeMap::new(),
            count_tx,
        }
    }

    fn summary(&self) {
        info!(
            received = self.received,
            malformed = self.malformed,
            unrecognized = self.unrecognized,
            by_kind = ?self.by_kind,
            "Feed summary"
        );
    }
}

impl FeedHandler for CountingHandler {
    fn on_message(
        &mut self,
        record: &RawRecord,
        log: Option<&mut LogWriter>,
    ) -> Result<(), FeedError> {
        self.received += 1;
        match classify(record) {
            Ok(message) => {
                *self.by_kind.entry(message.kind().as_str()).or_default() += 1;
                debug!(
                    kind = %message.kind(),
                    product = ?message.product(),
                    sequence = ?message.sequence(),
                    "Feed message"
                );
            }
            Err(e) if e.is_malformed() => {
                self.malformed += 1;
                warn!(error = %e, "Malformed feed message");
            }
            Err(e) => {
                self.unrecognized += 1;
                debug!(error = %e, "Unrecognized feed message");
            }
        }
        self.count_tx.send_replace(self.received);
        log_record(record, log)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = args.options()?.resolve()?;
    info!(
        url = %config.url,
        products = ?config.products,
        mode = ?config.mode,
        saving = config.save.is_some(),
        "Loaded feed configuration"
    );

    let (count_tx, mut count_rx) = watch::channel(0u64);
    let client = FeedClient::new(config, WsConnector, CountingHandler::new(count_tx))?;

    if let Some(addr) = &args.health_addr {
        let health_addr: SocketAddr = addr.parse()?;
        let server_state = ServerState::new("gdax", client.connected_handle());
        tokio::spawn(async move {
            if let Err(e) = run_server(health_addr, server_state).await {
                error!(error = %e, "Health server error");
            }
        });
        info!(addr = %health_addr, "Health server started");
    }

    client.start().await?;

    let limit_reached = async {
        match args.max_messages {
            Some(max) => {
                while *count_rx.borrow_and_update() < max {
                    if count_rx.changed().await.is_err() {
                        break;
                    }
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
        _ = client.wait_for_stop() => warn!("Feed connection ended"),
        _ = limit_reached => info!(max_messages = ?args.max_messages, "Reached message limit"),
    }

    client.close().await?;
    client.with_handler(|handler| handler.summary());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "gdax-feed",
            "--product",
            "ETH-USD",
            "--product",
            "BTC-USD",
            "--heartbeat",
            "--skip-bad-frames",
        ]);
        let config = args.options().unwrap().resolve().unwrap();

        assert_eq!(config.products, vec!["ETH-USD", "BTC-USD"]);
        assert_eq!(config.mode, SubscriptionMode::Heartbeat);
        assert_eq!(config.decode_policy, DecodePolicy::Skip);
        assert!(config.save.is_none());
    }

    #[test]
    fn test_counting_handler_classifies() {
        let (tx, rx) = watch::channel(0);
        let mut handler = CountingHandler::new(tx);

        let heartbeat = gdax_feed_lib::decode_frame(
            r#"{"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD","time":"2014-11-07T08:19:28.464459Z"}"#,
        )
        .unwrap();
        let malformed = gdax_feed_lib::decode_frame(r#"{"type":"heartbeat"}"#).unwrap();
        let unknown = gdax_feed_lib::decode_frame(r#"{"type":"l2update"}"#).unwrap();

        handler.on_message(&heartbeat, None).unwrap();
        handler.on_message(&malformed, None).unwrap();
        handler.on_message(&unknown, None).unwrap();

        assert_eq!(handler.received, 3);
        assert_eq!(handler.malformed, 1);
        assert_eq!(handler.unrecognized, 1);
        assert_eq!(handler.by_kind.get("heartbeat"), Some(&1));
        assert_eq!(*rx.borrow(), 3);
    }
}
