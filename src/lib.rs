//! Corvid extension manager.
//!
//! Auxiliary processes ("extensions") register themselves with the Corvid
//! host over a local endpoint, contribute plugin catalogs to the host's
//! registry, answer queries, and are health-monitored. Both roles live in
//! this crate:
//!
//! - **Manager** (inside the host): [`manager::start_extension_manager`]
//!   serves the primary endpoint, merges extension broadcasts into the
//!   [`registry::Registry`], and health-checks every registration.
//! - **Extension** (inside each extension process):
//!   [`extension::start_extension`] registers with the manager, serves its
//!   own endpoint, and exits when the manager disappears.
//!
//! # Architecture
//!
//! - **Endpoint Module**: unix sockets / named pipes behind one interface
//! - **RPC Module**: newline-delimited JSON framing, one-shot clients
//! - **Watcher Module**: heartbeat loops with two-failure hysteresis
//! - **Autoload Module**: discovery of extension binaries with a safety
//!   filter
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use corvid::config::ExtensionsConfig;
//! use corvid::manager::{NullQueryExecutor, start_extension_manager};
//! use corvid::registry::Registry;
//! use corvid::service::ProcessShutdown;
//!
//! let config = ExtensionsConfig::default();
//! let registry = Arc::new(Registry::new());
//! let manager = start_extension_manager(
//!     &config,
//!     registry,
//!     Arc::new(NullQueryExecutor),
//!     Arc::new(ProcessShutdown),
//! )
//! .expect("manager failed to start");
//! // Serve until the host shuts down...
//! manager.join();
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::field_reassign_with_default)]

pub mod autoload;
pub mod config;
pub mod delay;
pub mod endpoint;
pub mod error;
pub mod extension;
pub mod facade;
pub mod fsutil;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod rpc;
pub mod service;
pub mod watcher;

// Re-export main types
pub use config::ExtensionsConfig;
pub use error::ExtensionError;
pub use extension::{ExtensionHandle, start_extension};
pub use manager::{ExtensionManagerHandle, QueryExecutor, start_extension_manager};
pub use registry::{Broadcast, Registry, RouteUuid};
pub use rpc::protocol::{ExtensionInfo, ExtensionResponse, ExtensionStatus};
pub use watcher::{ExtensionWatcher, ManagerWatcher};
