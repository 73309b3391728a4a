// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use crate::config::{CloudConfig, ConfigError};
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONFIG: &str = "\
# comment
[DEFAULT]
tenancy=ocid1.tenancy.oc1..aaaa
region=us-ashburn-1
fingerprint = aa:bb

[staging]
region=eu-frankfurt-1
endpoint=https://gateway.staging.example.com
";

    #[test]
    fn test_default_profile() {
        let config = CloudConfig::parse(CONFIG, "DEFAULT").expect("parse");
        assert_eq!(config.tenancy, "ocid1.tenancy.oc1..aaaa");
        assert_eq!(config.region, "us-ashburn-1");
        assert_eq!(config.endpoint, "https://iaas.us-ashburn-1.oraclecloud.com");
        assert_eq!(config.fingerprint.as_deref(), Some("aa:bb"));
    }

    #[test]
    fn test_named_profile_inherits_default() {
        let config = CloudConfig::parse(CONFIG, "staging").expect("parse");
        assert_eq!(config.tenancy, "ocid1.tenancy.oc1..aaaa");
        assert_eq!(config.region, "eu-frankfurt-1");
        assert_eq!(config.endpoint, "https://gateway.staging.example.com");
    }

    #[test]
    fn test_rejects_malformed_endpoint() {
        let text = "[DEFAULT]\ntenancy=t\nregion=r\nendpoint=gateway without scheme\n";
        assert!(matches!(
            CloudConfig::parse(text, "DEFAULT"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_missing_profile_and_key() {
        assert!(matches!(
            CloudConfig::parse(CONFIG, "prod"),
            Err(ConfigError::MissingProfile(p)) if p == "prod"
        ));
        assert!(matches!(
            CloudConfig::parse("[DEFAULT]\nregion=x\n", "DEFAULT"),
            Err(ConfigError::MissingKey { key, .. }) if key == "tenancy"
        ));
    }

    #[test]
    fn test_from_file_and_token_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "tok-123\n").expect("write token");

        let config_path = dir.path().join("config");
        let mut file = std::fs::File::create(&config_path).expect("create");
        writeln!(
            file,
            "[DEFAULT]\ntenancy=t\nregion=r\nsecurity_token_file={}",
            token_path.display()
        )
        .expect("write");

        let config = CloudConfig::from_file(&config_path, "DEFAULT").expect("load");
        assert_eq!(config.bearer_token().expect("token").as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = CloudConfig::from_file(&dir.path().join("nope"), "DEFAULT").expect_err("missing");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn test_instance_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/opc/v2/instance/"))
            .and(header("Authorization", "Bearer Oracle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "canonicalRegionName": "us-phoenix-1",
                "tenantId": "ocid1.tenancy.oc1..imds",
                "shape": "VM.Standard2.1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/opc/v2/identity/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ipr-token\n"))
            .mount(&server)
            .await;

        let config = CloudConfig::from_instance_metadata(&reqwest::Client::new(), &server.uri())
            .await
            .expect("metadata");
        assert_eq!(config.region, "us-phoenix-1");
        assert_eq!(config.tenancy, "ocid1.tenancy.oc1..imds");
        assert_eq!(config.endpoint, "https://iaas.us-phoenix-1.oraclecloud.com");
        assert_eq!(config.bearer_token().expect("token").as_deref(), Some("ipr-token"));
    }

    #[tokio::test]
    async fn test_instance_metadata_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let err = CloudConfig::from_instance_metadata(&reqwest::Client::new(), &server.uri())
            .await
            .expect_err("fails");
        assert!(matches!(err, ConfigError::Metadata(_)));
    }
}
