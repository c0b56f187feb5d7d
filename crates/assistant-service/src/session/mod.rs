//! One conversation with a device, from upgrade to close.
pub mod engine;
pub mod pacing;
pub mod params;
pub mod system_prompt;
pub mod thread;

pub use engine::{Session, SessionServices};
pub use params::{Location, QueryParams, SessionParams};
pub use thread::StoredThread;
