//! Integration tests for the register/serve/deregister lifecycle.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use corvid::config::HOST_VERSION;
use corvid::facade;
use corvid::manager::start_extension_manager;
use corvid::registry::Registry;
use corvid::rpc::RpcClient;
use corvid::service::RecordingShutdown;
use corvid::start_extension;

use common::{StaticExecutor, extension_registry, test_config, wait_until};

// ============================================================================
// Registration
// ============================================================================

mod registration_tests {
    use super::*;

    #[test]
    fn test_register_then_listed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let extension = start_extension(
            &config,
            extension_registry(),
            "E",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let extensions = facade::get_extensions(&config).unwrap();
        let core = extensions.get(&0).unwrap();
        assert_eq!(core.name, "core");
        assert_eq!(core.version, HOST_VERSION);

        let record = extensions.get(&extension.uuid()).unwrap();
        assert_eq!(record.name, "E");
        assert_eq!(record.version, "1.0.0");
        assert_eq!(record.min_sdk_version, "0.0.0");

        extension.join();
        manager.join();
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let first = start_extension(
            &config,
            extension_registry(),
            "E",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        // A second registry so the duplicate name is the only conflict.
        let second_registry = Arc::new(Registry::new());
        let err = start_extension(
            &config,
            second_registry,
            "E",
            "1.0.1",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate"), "got: {err}");

        let extensions = facade::get_extensions(&config).unwrap();
        let named: Vec<_> = extensions.values().filter(|e| e.name == "E").collect();
        assert_eq!(named.len(), 1);

        first.join();
        manager.join();
    }

    #[test]
    fn test_duplicate_broadcast_item_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let first = start_extension(
            &config,
            extension_registry(),
            "E1",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        // Same broadcast contents, different name.
        let err = start_extension(
            &config,
            extension_registry(),
            "E2",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate registry item"), "got: {err}");

        first.join();
        manager.join();
    }

    #[test]
    fn test_uuids_are_unique_and_endpoints_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let a_registry = Arc::new(Registry::new());
        a_registry.add_plugin(
            "table",
            "alpha",
            "",
            false,
            Arc::new(common::EchoPlugin),
        );
        let a = start_extension(
            &config,
            a_registry,
            "A",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let b_registry = Arc::new(Registry::new());
        b_registry.add_plugin("table", "beta", "", false, Arc::new(common::EchoPlugin));
        let b = start_extension(
            &config,
            b_registry,
            "B",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        assert_ne!(a.uuid(), b.uuid());
        assert_ne!(a.path(), b.path());
        assert!(a.path().ends_with(&format!(".{}", a.uuid())));

        a.join();
        b.join();
        manager.join();
    }
}

// ============================================================================
// Calls through the registered catalog
// ============================================================================

mod call_tests {
    use super::*;

    #[test]
    fn test_call_extension_directly() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();
        let extension = start_extension(
            &config,
            extension_registry(),
            "E",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let mut request = BTreeMap::new();
        request.insert("action".to_string(), "generate".to_string());
        let rows =
            facade::call_extension(&config, extension.uuid(), "table", "echo", &request).unwrap();
        assert_eq!(rows, vec![request]);

        extension.join();
        manager.join();
    }

    #[test]
    fn test_manager_forwards_call_to_owning_extension() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();
        let extension = start_extension(
            &config,
            extension_registry(),
            "E",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let mut request = BTreeMap::new();
        request.insert("key".to_string(), "value".to_string());
        let mut client = RpcClient::connect(&config.extensions_socket).unwrap();
        let response = client.call("table", "echo", &request).unwrap();
        assert!(response.status.ok());
        assert_eq!(response.rows, vec![request]);

        extension.join();
        manager.join();
    }

    #[test]
    fn test_call_unknown_item_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        let mut client = RpcClient::connect(&config.extensions_socket).unwrap();
        let response = client.call("table", "missing", &BTreeMap::new()).unwrap();
        assert!(!response.status.ok());
        assert!(response.rows.is_empty());

        manager.join();
    }
}

// ============================================================================
// Deregistration (clean lifecycle end)
// ============================================================================

mod deregistration_tests {
    use super::*;

    #[test]
    fn test_dead_extension_is_deregistered_by_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();
        let extension = start_extension(
            &config,
            extension_registry(),
            "E",
            "1.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();
        let uuid = extension.uuid();

        assert!(facade::get_extensions(&config).unwrap().contains_key(&uuid));

        // Extension shuts down; its endpoint disappears.
        extension.join();

        // Within two heartbeat intervals the watcher observes the loss,
        // counts two failures, and withdraws the registration.
        let deregistered = wait_until(Duration::from_secs(6), || {
            !facade::get_extensions(&config)
                .map(|list| list.contains_key(&uuid))
                .unwrap_or(true)
        });
        assert!(deregistered, "extension was never deregistered");

        let extensions = facade::get_extensions(&config).unwrap();
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions.get(&0).unwrap().name, "core");

        // The freed name is immediately reusable.
        let replacement = start_extension(
            &config,
            extension_registry(),
            "E",
            "2.0.0",
            "0.0.0",
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();
        assert_ne!(replacement.uuid(), uuid);

        replacement.join();
        manager.join();
    }
}
