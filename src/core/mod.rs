pub mod app_state;
pub mod config;
pub mod session;
pub mod types;

pub use app_state::{AppState, SessionEntry, SessionPage};
