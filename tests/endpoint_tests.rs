//! Integration tests for endpoint reclamation and readiness.

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use corvid::endpoint;
use corvid::facade;
use corvid::manager::start_extension_manager;
use corvid::registry::Registry;
use corvid::service::RecordingShutdown;

use common::{StaticExecutor, test_config};

mod reclaim_tests {
    use super::*;

    #[test]
    fn test_stale_socket_is_reclaimed_on_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        // A crashed predecessor left its socket file behind.
        std::fs::write(&config.extensions_socket, b"").unwrap();

        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        // The fresh endpoint answers.
        facade::ping_extension(&config, &config.extensions_socket).unwrap();
        manager.join();
    }

    #[test]
    fn test_reclaim_twice_leaves_path_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twice.em");
        std::fs::write(&path, b"").unwrap();
        let path_str = path.to_str().unwrap();

        endpoint::reclaim(path_str).unwrap();
        endpoint::reclaim(path_str).unwrap();
        assert!(!path.exists());
    }
}

mod readiness_tests {
    use super::*;

    #[test]
    fn test_ready_times_out_within_configured_bound() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let missing = dir.path().join("missing.em");
        let missing = missing.to_str().unwrap();

        let start = Instant::now();
        let err = endpoint::ready(missing, &config, true).unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.to_string().starts_with("Extension socket not available:"));
        // extensions_timeout is "1": at least one second, bounded well
        // under two timeouts.
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(2500));
    }

    #[test]
    fn test_zero_timeout_still_polls_floor() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.extensions_timeout = "0".to_string();
        let missing = dir.path().join("missing.em");

        let start = Instant::now();
        let _ = endpoint::ready(missing.to_str().unwrap(), &config, true);
        // Clamped to 10 probes at 20 ms.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_ready_succeeds_against_live_manager() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let manager = start_extension_manager(
            &config,
            Arc::new(Registry::new()),
            Arc::new(StaticExecutor),
            Arc::new(RecordingShutdown::new()),
        )
        .unwrap();

        endpoint::ready(&config.extensions_socket, &config, false).unwrap();
        endpoint::ready(&config.extensions_socket, &config, true).unwrap();
        manager.join();
    }

    #[test]
    fn test_plain_file_is_writable_but_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let path = dir.path().join("file.em");
        std::fs::write(&path, b"").unwrap();
        let path_str = path.to_str().unwrap();

        assert!(endpoint::writable(path_str));
        assert!(endpoint::ready(path_str, &config, false).is_err());
    }
}
