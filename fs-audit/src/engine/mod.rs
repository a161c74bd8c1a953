//! Watch adapter: OS notifications in, classified events out

pub mod file_monitor;
pub mod identity;
pub mod ignore;

pub use file_monitor::{FileMonitor, MonitorError, Notification, RenamePairer, WatchAdapter};
pub use ignore::IgnorePolicy;
