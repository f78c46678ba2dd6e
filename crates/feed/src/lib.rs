//! gdax-feed: Streaming client for the GDAX public websocket feed
//!
//! This crate connects to the feed, subscribes to product channels, hands each
//! inbound record to a [`FeedHandler`], and can mirror raw records to a
//! size-rotated log file.

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod server;
pub mod timestamp;
pub mod transport;
pub mod websocket;
pub mod writer;

pub use client::{ConnectionState, FeedClient, StopSignal};
pub use config::{DecodePolicy, FeedConfig, FeedOptions, SaveConfig, SubscriptionMode};
pub use error::{
    ConfigError, DecodeError, FeedError, MessageError, TimestampError, TransportError,
    WriterError,
};
pub use handler::{log_record, DefaultHandler, FeedHandler};
pub use message::{classify, decode_frame, FeedMessage, MessageKind, RawRecord, Side};
pub use server::{create_router, run_server, ServerState};
pub use timestamp::parse_time;
pub use transport::{Connect, ControlFrame, FeedTransport};
pub use websocket::{WsConnector, WsTransport, GDAX_WS_URL};
pub use writer::LogWriter;
