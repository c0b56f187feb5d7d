// assistant-service/src/lib.rs

pub mod backend;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod quota;
pub mod registry;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod tools;
pub mod transcript;
pub mod transport;
pub mod verifier;
pub mod widgets;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod server;
#[cfg(feature = "server")]
pub mod shared_state;

// Public API exports
pub use config::{Config, SessionSettings};
pub use error::SessionError;
pub use protocol::{CloseStatus, ServerMessage};
pub use session::{Session, SessionParams, SessionServices};
pub use transport::DeviceTransport;

#[cfg(feature = "server")]
pub use server::run_server;
