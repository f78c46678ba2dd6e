//! Prometheus metrics for the feed client
//!
//! Tracks message flow, errors and log rotation for the health server.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounter,
    IntCounterVec, IntGaugeVec, TextEncoder,
};

/// Labels used for metrics
const LABEL_FEED: &str = "feed";
const LABEL_MESSAGE_TYPE: &str = "message_type";
const LABEL_ERROR_CLASS: &str = "class";
const LABEL_FRAME: &str = "frame";

/// Total records received per message type
static MESSAGES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gdax_feed_messages_total",
        "Total records received from the feed",
        &[LABEL_FEED, LABEL_MESSAGE_TYPE]
    )
    .expect("Failed to register messages_total metric")
});

/// Errors reported to the handler, by class (transport, decode, handler)
static ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gdax_feed_errors_total",
        "Errors reported through the error callback",
        &[LABEL_FEED, LABEL_ERROR_CLASS]
    )
    .expect("Failed to register errors_total metric")
});

/// Control frames sent to the feed
static CONTROL_FRAMES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gdax_feed_control_frames_total",
        "Control frames sent to the feed",
        &[LABEL_FEED, LABEL_FRAME]
    )
    .expect("Failed to register control_frames_total metric")
});

/// Connection status (1 = subscribed, 0 = not)
static CONNECTED: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "gdax_feed_connected",
        "Feed connection status (1=subscribed, 0=disconnected)",
        &[LABEL_FEED]
    )
    .expect("Failed to register connected metric")
});

static LOG_ROTATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "gdax_feed_log_rotations_total",
        "Number of times the feed log moved to a new file"
    )
    .expect("Failed to register log_rotations_total metric")
});

/// Handle for recording metrics for one feed client
#[derive(Clone, Debug)]
pub struct FeedMetrics {
    feed: String,
}

impl FeedMetrics {
    pub fn new(feed: impl Into<String>) -> Self {
        Self { feed: feed.into() }
    }

    /// Increment message counter for a specific message type
    pub fn inc_message(&self, message_type: &str) {
        MESSAGES_TOTAL
            .with_label_values(&[&self.feed, message_type])
            .inc();
    }

    pub fn inc_error(&self, class: &str) {
        ERRORS_TOTAL.with_label_values(&[&self.feed, class]).inc();
    }

    pub fn inc_control_frame(&self, frame: &str) {
        CONTROL_FRAMES_TOTAL
            .with_label_values(&[&self.feed, frame])
            .inc();
    }

    pub fn set_connected(&self) {
        CONNECTED.with_label_values(&[&self.feed]).set(1);
    }

    pub fn set_disconnected(&self) {
        CONNECTED.with_label_values(&[&self.feed]).set(0);
    }
}

pub fn inc_log_rotations() {
    LOG_ROTATIONS_TOTAL.inc();
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
    })
}
