//! GDAX feed message types
//!
//! Inbound frames are first decoded into an untyped [`RawRecord`] (order of keys
//! preserved). [`classify`] then maps a record onto the closed set of
//! [`FeedMessage`] variants by its `type` field, validating and converting
//! each field. The feed sends most numbers as strings, so numeric fields accept
//! either a JSON number or a numeric string. A `null` field counts as missing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{DecodeError, MessageError};
use crate::timestamp::{from_epoch_seconds, parse_time};

/// One decoded inbound frame, keys in the order they arrived.
pub type RawRecord = serde_json::Map<String, Value>;

/// Decode one text frame into a raw record.
///
/// Fails only on syntax: invalid JSON or a JSON value that is not an object.
pub fn decode_frame(text: &str) -> Result<RawRecord, DecodeError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(record) => Ok(record),
        other => Err(DecodeError::NotAnObject {
            found: json_type_name(&other),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Discriminant of a feed message, matching the raw `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Received,
    Open,
    Done,
    Match,
    Change,
    MarginProfileUpdate,
    Heartbeat,
    Error,
}

impl MessageKind {
    /// Every kind, in classification order.
    pub const ALL: [MessageKind; 8] = [
        MessageKind::Received,
        MessageKind::Open,
        MessageKind::Done,
        MessageKind::Match,
        MessageKind::Change,
        MessageKind::MarginProfileUpdate,
        MessageKind::Heartbeat,
        MessageKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Received => "received",
            MessageKind::Open => "open",
            MessageKind::Done => "done",
            MessageKind::Match => "match",
            MessageKind::Change => "change",
            MessageKind::MarginProfileUpdate => "margin_profile_update",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Error => "error",
        }
    }

    /// Look up the kind for a raw `type` value.
    pub fn from_type(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_type(s).ok_or_else(|| format!("unknown message kind: {}", s))
    }
}

/// Maker order side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Order-type specific amounts of a `received` message.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderType {
    Market { size: f64, price: f64 },
    Limit { funds: f64 },
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market { .. } => "market",
            OrderType::Limit { .. } => "limit",
        }
    }
}

/// Which pair of amounts a `change` message carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeAmounts {
    Size { new_size: f64, old_size: f64 },
    Funds { new_funds: f64, old_funds: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub time: DateTime<Utc>,
    pub product: String,
    pub sequence: u64,
    pub side: Side,
    pub order_id: String,
    pub order_type: OrderType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub time: DateTime<Utc>,
    pub product: String,
    pub sequence: u64,
    pub side: Side,
    pub order_id: String,
    pub price: f64,
    pub remaining_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Done {
    pub time: DateTime<Utc>,
    pub product: String,
    pub sequence: u64,
    pub side: Side,
    pub order_id: String,
    pub price: f64,
    pub remaining_size: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub time: DateTime<Utc>,
    pub product: String,
    pub sequence: u64,
    pub side: Side,
    pub maker_order_id: String,
    pub taker_order_id: String,
    pub price: f64,
    pub size: f64,
    pub trade_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub time: DateTime<Utc>,
    pub product: String,
    pub sequence: u64,
    pub side: Side,
    pub order_id: String,
    pub price: f64,
    pub amounts: ChangeAmounts,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginProfileUpdate {
    pub product: String,
    pub time: DateTime<Utc>,
    pub user_id: String,
    pub profile_id: String,
    pub nonce: u64,
    pub position: f64,
    pub position_size: f64,
    pub position_complement: f64,
    pub position_max_size: f64,
    pub call_side: Side,
    pub call_price: f64,
    pub call_size: f64,
    pub call_funds: f64,
    pub covered: bool,
    pub next_expire_time: String,
    pub base_balance: f64,
    pub base_funding: f64,
    pub quote_balance: f64,
    pub quote_funding: f64,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub sequence: u64,
    pub last_trade_id: u64,
    pub product: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub message: String,
    pub reason: Option<String>,
}

/// A classified feed message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Received(Received),
    Open(Open),
    Done(Done),
    Match(Match),
    Change(Change),
    MarginProfileUpdate(MarginProfileUpdate),
    Heartbeat(Heartbeat),
    Error(ErrorMessage),
}

impl FeedMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            FeedMessage::Received(_) => MessageKind::Received,
            FeedMessage::Open(_) => MessageKind::Open,
            FeedMessage::Done(_) => MessageKind::Done,
            FeedMessage::Match(_) => MessageKind::Match,
            FeedMessage::Change(_) => MessageKind::Change,
            FeedMessage::MarginProfileUpdate(_) => MessageKind::MarginProfileUpdate,
            FeedMessage::Heartbeat(_) => MessageKind::Heartbeat,
            FeedMessage::Error(_) => MessageKind::Error,
        }
    }

    pub fn product(&self) -> Option<&str> {
        match self {
            FeedMessage::Received(m) => Some(&m.product),
            FeedMessage::Open(m) => Some(&m.product),
            FeedMessage::Done(m) => Some(&m.product),
            FeedMessage::Match(m) => Some(&m.product),
            FeedMessage::Change(m) => Some(&m.product),
            FeedMessage::MarginProfileUpdate(m) => Some(&m.product),
            FeedMessage::Heartbeat(m) => Some(&m.product),
            FeedMessage::Error(_) => None,
        }
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self {
            FeedMessage::Received(m) => Some(m.time),
            FeedMessage::Open(m) => Some(m.time),
            FeedMessage::Done(m) => Some(m.time),
            FeedMessage::Match(m) => Some(m.time),
            FeedMessage::Change(m) => Some(m.time),
            FeedMessage::MarginProfileUpdate(m) => Some(m.time),
            FeedMessage::Heartbeat(m) => Some(m.time),
            FeedMessage::Error(_) => None,
        }
    }

    pub fn sequence(&self) -> Option<u64> {
        match self {
            FeedMessage::Received(m) => Some(m.sequence),
            FeedMessage::Open(m) => Some(m.sequence),
            FeedMessage::Done(m) => Some(m.sequence),
            FeedMessage::Match(m) => Some(m.sequence),
            FeedMessage::Change(m) => Some(m.sequence),
            FeedMessage::Heartbeat(m) => Some(m.sequence),
            FeedMessage::MarginProfileUpdate(_) | FeedMessage::Error(_) => None,
        }
    }
}

impl TryFrom<&RawRecord> for FeedMessage {
    type Error = MessageError;

    fn try_from(raw: &RawRecord) -> Result<Self, MessageError> {
        classify(raw)
    }
}

/// Classify a raw record into its typed message.
///
/// Fails with [`MessageError::Unrecognized`] when `type` is missing or not one
/// of the known kinds, and with a malformed-message error when a field the
/// kind requires is missing or does not convert.
pub fn classify(raw: &RawRecord) -> Result<FeedMessage, MessageError> {
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .and_then(MessageKind::from_type)
        .ok_or_else(|| MessageError::Unrecognized {
            raw: Value::Object(raw.clone()),
        })?;

    let fields = Fields { raw, kind };
    let msg = match kind {
        MessageKind::Received => FeedMessage::Received(fields.received()?),
        MessageKind::Open => FeedMessage::Open(fields.open()?),
        MessageKind::Done => FeedMessage::Done(fields.done()?),
        MessageKind::Match => FeedMessage::Match(fields.match_()?),
        MessageKind::Change => FeedMessage::Change(fields.change()?),
        MessageKind::MarginProfileUpdate => {
            FeedMessage::MarginProfileUpdate(fields.margin_profile_update()?)
        }
        MessageKind::Heartbeat => FeedMessage::Heartbeat(fields.heartbeat()?),
        MessageKind::Error => FeedMessage::Error(fields.error()?),
    };
    Ok(msg)
}

/// Fields shared by every order-book event.
struct OrderHeader {
    time: DateTime<Utc>,
    product: String,
    sequence: u64,
    side: Side,
}

/// Typed field access over a raw record of a known kind.
struct Fields<'a> {
    raw: &'a RawRecord,
    kind: MessageKind,
}

impl<'a> Fields<'a> {
    fn has(&self, field: &str) -> bool {
        matches!(self.raw.get(field), Some(v) if !v.is_null())
    }

    fn get(&self, field: &'static str) -> Result<&'a Value, MessageError> {
        match self.raw.get(field) {
            Some(value) if !value.is_null() => Ok(value),
            _ => Err(MessageError::MissingField {
                kind: self.kind,
                field,
            }),
        }
    }

    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> MessageError {
        MessageError::InvalidField {
            kind: self.kind,
            field,
            reason: reason.into(),
        }
    }

    fn string(&self, field: &'static str) -> Result<String, MessageError> {
        match self.get(field)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.invalid(field, format!("expected string, got {}", other))),
        }
    }

    fn float(&self, field: &'static str) -> Result<f64, MessageError> {
        match self.get(field)? {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| self.invalid(field, format!("not a float: {}", n))),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| self.invalid(field, format!("{:?}: {}", s, e))),
            other => Err(self.invalid(field, format!("expected number, got {}", other))),
        }
    }

    fn integer(&self, field: &'static str) -> Result<u64, MessageError> {
        match self.get(field)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| self.invalid(field, format!("not an unsigned integer: {}", n))),
            Value::String(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|e| self.invalid(field, format!("{:?}: {}", s, e))),
            other => Err(self.invalid(field, format!("expected integer, got {}", other))),
        }
    }

    fn boolean(&self, field: &'static str) -> Result<bool, MessageError> {
        match self.get(field)? {
            Value::Bool(b) => Ok(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(self.invalid(field, format!("expected boolean, got {}", other))),
        }
    }

    fn side(&self, field: &'static str) -> Result<Side, MessageError> {
        match self.string(field)?.as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(self.invalid(field, format!("unknown side {:?}", other))),
        }
    }

    fn time(&self, field: &'static str) -> Result<DateTime<Utc>, MessageError> {
        match self.get(field)? {
            Value::String(s) => parse_time(s).map_err(|e| self.invalid(field, e.to_string())),
            Value::Number(n) => n
                .as_f64()
                .and_then(from_epoch_seconds)
                .ok_or_else(|| self.invalid(field, format!("bad epoch time {}", n))),
            other => Err(self.invalid(field, format!("expected timestamp, got {}", other))),
        }
    }

    fn header(&self) -> Result<OrderHeader, MessageError> {
        Ok(OrderHeader {
            time: self.time("time")?,
            product: self.string("product_id")?,
            sequence: self.integer("sequence")?,
            side: self.side("side")?,
        })
    }

    fn received(&self) -> Result<Received, MessageError> {
        let OrderHeader {
            time,
            product,
            sequence,
            side,
        } = self.header()?;
        let order_type = match self.string("order_type")?.as_str() {
            "market" => OrderType::Market {
                size: self.float("size")?,
                price: self.float("price")?,
            },
            "limit" => OrderType::Limit {
                funds: self.float("funds")?,
            },
            other => {
                return Err(self.invalid("order_type", format!("unknown order type {:?}", other)))
            }
        };
        Ok(Received {
            time,
            product,
            sequence,
            side,
            order_id: self.string("order_id")?,
            order_type,
        })
    }

    fn open(&self) -> Result<Open, MessageError> {
        let OrderHeader {
            time,
            product,
            sequence,
            side,
        } = self.header()?;
        Ok(Open {
            time,
            product,
            sequence,
            side,
            order_id: self.string("order_id")?,
            price: self.float("price")?,
            remaining_size: self.float("remaining_size")?,
        })
    }

    fn done(&self) -> Result<Done, MessageError> {
        let OrderHeader {
            time,
            product,
            sequence,
            side,
        } = self.header()?;
        Ok(Done {
            time,
            product,
            sequence,
            side,
            order_id: self.string("order_id")?,
            price: self.float("price")?,
            remaining_size: self.float("remaining_size")?,
            reason: self.string("reason")?,
        })
    }

    fn match_(&self) -> Result<Match, MessageError> {
        let OrderHeader {
            time,
            product,
            sequence,
            side,
        } = self.header()?;
        Ok(Match {
            time,
            product,
            sequence,
            side,
            maker_order_id: self.string("maker_order_id")?,
            taker_order_id: self.string("taker_order_id")?,
            price: self.float("price")?,
            size: self.float("size")?,
            trade_id: self.integer("trade_id")?,
        })
    }

    fn change(&self) -> Result<Change, MessageError> {
        let OrderHeader {
            time,
            product,
            sequence,
            side,
        } = self.header()?;

        let has_size = self.has("new_size") || self.has("old_size");
        let has_funds = self.has("new_funds") || self.has("old_funds");
        let amounts = match (has_size, has_funds) {
            (true, false) => ChangeAmounts::Size {
                new_size: self.float("new_size")?,
                old_size: self.float("old_size")?,
            },
            (false, true) => ChangeAmounts::Funds {
                new_funds: self.float("new_funds")?,
                old_funds: self.float("old_funds")?,
            },
            (true, true) => {
                return Err(MessageError::Inconsistent {
                    kind: self.kind,
                    reason: "both size and funds amounts present".to_string(),
                })
            }
            (false, false) => {
                return Err(MessageError::Inconsistent {
                    kind: self.kind,
                    reason: "neither size nor funds amounts present".to_string(),
                })
            }
        };

        Ok(Change {
            time,
            product,
            sequence,
            side,
            order_id: self.string("order_id")?,
            price: self.float("price")?,
            amounts,
        })
    }

    fn margin_profile_update(&self) -> Result<MarginProfileUpdate, MessageError> {
        let time = if self.has("timestamp") {
            self.time("timestamp")?
        } else {
            self.time("time")?
        };
        Ok(MarginProfileUpdate {
            product: self.string("product_id")?,
            time,
            user_id: self.string("user_id")?,
            profile_id: self.string("profile_id")?,
            nonce: self.integer("nonce")?,
            position: self.float("position")?,
            position_size: self.float("position_size")?,
            position_complement: self.float("position_complement")?,
            position_max_size: self.float("position_max_size")?,
            call_side: self.side("call_side")?,
            call_price: self.float("call_price")?,
            call_size: self.float("call_size")?,
            call_funds: self.float("call_funds")?,
            covered: self.boolean("covered")?,
            next_expire_time: self.string("next_expire_time")?,
            base_balance: self.float("base_balance")?,
            base_funding: self.float("base_funding")?,
            quote_balance: self.float("quote_balance")?,
            quote_funding: self.float("quote_funding")?,
            private: self.boolean("private")?,
        })
    }

    fn heartbeat(&self) -> Result<Heartbeat, MessageError> {
        Ok(Heartbeat {
            sequence: self.integer("sequence")?,
            last_trade_id: self.integer("last_trade_id")?,
            product: self.string("product_id")?,
            time: self.time("time")?,
        })
    }

    fn error(&self) -> Result<ErrorMessage, MessageError> {
        let reason = if self.has("reason") {
            Some(self.string("reason")?)
        } else {
            None
        };
        Ok(ErrorMessage {
            message: self.string("message")?,
            reason,
        })
    }
}
