// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - command line and signal handling

#[cfg(test)]
mod tests {
    use crate::Cli;
    use clap::Parser;
    use std::time::Duration;
    use tokio::time::timeout;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["cloudplane"]).expect("parse");

        assert_eq!(cli.resync_seconds, 60);
        assert_eq!(cli.oci_profile, "DEFAULT");
        assert_eq!(cli.workers, 1);
        assert_eq!(cli.metrics_port, 8080);
        assert!(!cli.ipr);
        assert!(!cli.disable_cloud);
        assert!(!cli.no_leader_elect);

        let config = cli.manager_config();
        assert_eq!(config.resync, Some(Duration::from_secs(60)));
        assert!(!config.disable_cloud);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "cloudplane",
            "--ociconfig",
            "/etc/oci/config",
            "--oci-profile",
            "PROD",
            "--resync-seconds",
            "0",
            "--ipr",
            "--disable-cloud",
            "--namespace",
            "cloudplane-system",
            "--workers",
            "0",
            "--no-leader-elect",
        ])
        .expect("parse");

        assert_eq!(cli.ociconfig, "/etc/oci/config");
        assert_eq!(cli.oci_profile, "PROD");
        assert!(cli.ipr);
        assert!(cli.no_leader_elect);
        assert_eq!(cli.namespace.as_deref(), Some("cloudplane-system"));

        let config = cli.manager_config();
        assert_eq!(config.resync, None);
        assert_eq!(config.workers, 1);
        assert!(config.disable_cloud);
    }

    #[test]
    fn test_rejects_non_numeric_resync() {
        assert!(Cli::try_parse_from(["cloudplane", "--resync-seconds", "soon"]).is_err());
    }

    /// Test that SIGTERM signal handler can be created on Unix platforms
    #[tokio::test]
    #[cfg(unix)]
    async fn test_sigterm_signal_handler_creation() {
        use tokio::signal::unix::{signal, SignalKind};

        let result = signal(SignalKind::terminate());
        assert!(
            result.is_ok(),
            "Should be able to create SIGTERM signal handler"
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_waits_for_a_signal() {
        let result = timeout(Duration::from_millis(100), crate::shutdown_signal()).await;

        assert!(result.is_err(), "no signal was sent");
    }
}
