/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public price stream client crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod config;
pub mod error;
pub mod ws;

pub use config::{HeartbeatConfig, ReconnectPolicy, StreamConfig};
pub use error::{Result, StreamError};

// Re-export commonly used types from ws
pub use ws::{
    ClientCommand,
    ConnectionState,
    HandlerRegistration,
    InboundFrame,
    PriceStreamClient,
    PriceUpdate,
};
