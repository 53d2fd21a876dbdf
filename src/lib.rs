pub mod browser;
pub mod core;
pub mod dom;
pub mod extract;
pub mod http;
pub mod notify;
pub mod pipeline;
pub mod search;
pub mod watch;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::AppState;

pub use pipeline::{ScanSession, SessionSignal};
