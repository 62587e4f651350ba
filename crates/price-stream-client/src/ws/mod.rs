/*
[INPUT]:  Stream configuration, subscription requests, server frames
[OUTPUT]: Typed price updates and connection changes for local handlers
[POS]:    WebSocket layer - real-time price stream
[UPDATE]: When adding frame types or changing connection logic
*/

pub mod client;
pub mod handlers;
pub mod message;
pub mod reconnect;
pub mod subscription;

pub use client::PriceStreamClient;
pub use handlers::{ConnectionHandler, HandlerRegistration, HandlerRegistry, MessageHandler};
pub use message::{ClientCommand, DecodeError, InboundFrame, PriceUpdate, decode_frame};
pub use reconnect::{ConnectionState, ReconnectTracker, RetryDecision, backoff_delay};
pub use subscription::{SubscriptionSet, normalize_symbol, normalize_symbols};
