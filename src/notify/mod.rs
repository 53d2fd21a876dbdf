pub mod clipboard;
#[cfg(all(feature = "desktop", target_os = "linux"))]
pub mod desktop;
pub mod host;
pub mod render;
pub mod scheduler;

pub use clipboard::{CommandClipboard, NoClipboard};
#[cfg(all(feature = "desktop", target_os = "linux"))]
pub use desktop::DesktopHost;
pub use host::{
    ClipboardError, ClipboardHost, HostEvent, HostEvents, MemoryClipboard, MemoryHost, NotificationHost,
    NotificationHostError, NotificationId, NotificationSpec,
};
pub use render::{Category, CopyAction, DriverInfo, Notice};
pub use scheduler::{ClickOutcome, NotificationScheduler, NotifyOutcome, SchedulerSettings};
