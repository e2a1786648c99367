//! Health watchers.
//!
//! Two watchdogs share the heartbeat interval: the extension-side watcher
//! pings the manager and exits the process when it disappears; the
//! manager-side watcher pings every registered extension and deregisters
//! the ones that stay unreachable for two consecutive scans.

mod extension;
mod manager;

pub use extension::{ExtensionWatcher, start_extension_watcher};
pub use manager::{FailureMap, ManagerWatcher};
