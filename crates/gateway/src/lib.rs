//! AI-protocol gateway core: MCP/A2A session handling, fan-out routing, and
//! the HTTP transports that carry them.

pub mod a2a;
pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod message;
pub mod router;
pub mod session;
pub mod sse;
pub mod transport;
pub mod upstream;

pub use config::Config;
pub use error::GatewayError;
pub use message::Message;
