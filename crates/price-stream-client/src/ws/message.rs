/*
[INPUT]:  Raw WebSocket text frames / outbound client commands
[OUTPUT]: Parsed InboundFrame values and encoded command JSON
[POS]:    WebSocket layer - message parsing and validation
[UPDATE]: When adding new message types or changing format
*/

use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;

/// One price tick for one symbol.
///
/// `symbol` and a numeric `price` are required. The optional fields are
/// best-effort: a value of the wrong shape decodes as `None` instead of
/// dropping the whole tick.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PriceUpdate {
    pub symbol: String,
    #[serde(
        serialize_with = "rust_decimal::serde::float::serialize",
        deserialize_with = "json_number::decimal"
    )]
    pub price: Decimal,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub change: Option<Decimal>,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub change_percent: Option<Decimal>,
    #[serde(default, deserialize_with = "json_number::lenient_volume")]
    pub volume: Option<u64>,
    #[serde(default, deserialize_with = "json_number::lenient_timestamp")]
    pub timestamp: Option<String>,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub open: Option<Decimal>,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub high: Option<Decimal>,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub low: Option<Decimal>,
    #[serde(
        default,
        serialize_with = "rust_decimal::serde::float_option::serialize",
        deserialize_with = "json_number::lenient_decimal"
    )]
    pub previous_close: Option<Decimal>,
}

/// Field decoders for tick payloads. Prices accept JSON numbers only.
mod json_number {
    use super::*;
    use serde::de::Error as _;

    pub fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        let number = Number::deserialize(deserializer)?;
        number_to_decimal(&number)
            .ok_or_else(|| D::Error::custom(format!("price {number} is not a finite number")))
    }

    pub fn lenient_decimal<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Decimal>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(number) => number_to_decimal(&number),
            _ => None,
        })
    }

    pub fn lenient_volume<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::Number(number) => number.as_u64().or_else(|| {
                number
                    .as_f64()
                    .filter(|volume| volume.is_finite() && *volume >= 0.0)
                    .and_then(|volume| u64::from_f64(volume.round()))
            }),
            _ => None,
        })
    }

    /// ISO strings pass through; epoch numbers keep their JSON spelling.
    pub fn lenient_timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(timestamp) => Some(timestamp),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
    }

    /// Exact where the JSON text fits a `Decimal`, saturating beyond its range.
    fn number_to_decimal(number: &Number) -> Option<Decimal> {
        if let Some(value) = number.as_i64() {
            return Some(Decimal::from(value));
        }
        if let Some(value) = number.as_u64() {
            return Some(Decimal::from(value));
        }

        let value = number.as_f64().filter(|value| value.is_finite())?;
        let text = number.to_string();
        let exact = Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .ok()
            .or_else(|| Decimal::from_f64(value));

        Some(exact.unwrap_or(if value.abs() < 1.0 {
            Decimal::ZERO
        } else if value.is_sign_negative() {
            Decimal::MIN
        } else {
            Decimal::MAX
        }))
    }
}

/// Decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    PriceUpdate(PriceUpdate),
    Connected { message: Option<String> },
    Error { message: Option<String> },
    Ping,
    Pong,
    /// Well-formed frame with a `type` this client does not handle
    Unknown { kind: String },
}

/// Commands the client sends to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
    Ping,
    Pong,
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Subscribe { .. } => "subscribe",
            ClientCommand::Unsubscribe { .. } => "unsubscribe",
            ClientCommand::Ping => "ping",
            ClientCommand::Pong => "pong",
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Why a frame was dropped
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("price_update frame has no `data` object")]
    MissingData,

    #[error("price_update payload rejected: {0}")]
    InvalidPriceUpdate(serde_json::Error),
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundFrame, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = match object.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        _ => return Err(DecodeError::MissingType),
    };

    let frame = match kind.as_str() {
        "price_update" => {
            let data = match object.remove("data") {
                Some(data @ Value::Object(_)) => data,
                _ => return Err(DecodeError::MissingData),
            };
            let update = serde_json::from_value::<PriceUpdate>(data)
                .map_err(DecodeError::InvalidPriceUpdate)?;
            InboundFrame::PriceUpdate(update)
        }
        "connected" => InboundFrame::Connected {
            message: text_field(&object),
        },
        "error" => InboundFrame::Error {
            message: text_field(&object),
        },
        "ping" => InboundFrame::Ping,
        "pong" => InboundFrame::Pong,
        _ => InboundFrame::Unknown { kind },
    };

    Ok(frame)
}

fn text_field(object: &serde_json::Map<String, Value>) -> Option<String> {
    ["message", "error", "detail"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
