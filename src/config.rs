// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud provider credentials and endpoint.
//!
//! Two sources are supported:
//!
//! - an INI-style profile file (`--ociconfig`), e.g.
//!
//!   ```text
//!   [DEFAULT]
//!   tenancy=ocid1.tenancy.oc1..aaaa
//!   region=us-ashburn-1
//!   security_token_file=~/.oci/token
//!   ```
//!
//! - the instance metadata service (`--ipr`), which reports the region and
//!   tenancy of the instance the controller runs on and hands out a token

use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default profile name in the config file
pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Instance metadata service base URL
pub const METADATA_BASE_URL: &str = "http://169.254.169.254";

/// Errors loading cloud configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("profile [{0}] not found")]
    MissingProfile(String),

    #[error("profile [{profile}] has no '{key}'")]
    MissingKey { profile: String, key: String },

    #[error("instance metadata: {0}")]
    Metadata(String),

    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

/// Resolved cloud configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CloudConfig {
    pub tenancy: String,
    pub region: String,
    /// Gateway endpoint; defaults from the region
    pub endpoint: String,
    pub user: Option<String>,
    pub fingerprint: Option<String>,
    pub key_file: Option<PathBuf>,
    pub security_token_file: Option<PathBuf>,
    /// Token obtained from instance metadata
    pub token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceMetadata {
    canonical_region_name: String,
    tenant_id: String,
}

impl CloudConfig {
    /// Default endpoint for a region.
    #[must_use]
    pub fn default_endpoint(region: &str) -> String {
        format!("https://iaas.{region}.oraclecloud.com")
    }

    /// Load a profile from a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the profile is incomplete.
    pub fn from_file(path: &Path, profile: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), profile = %profile, "loading cloud config");
        Self::parse(&contents, profile)
    }

    /// Parse a profile out of INI text.
    ///
    /// Keys of `[DEFAULT]` are inherited by every other profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile is missing or lacks `tenancy` / `region`.
    pub fn parse(contents: &str, profile: &str) -> Result<Self, ConfigError> {
        let sections = parse_ini(contents);
        let mut values = sections.get(DEFAULT_PROFILE).cloned().unwrap_or_default();
        match sections.get(profile) {
            Some(own) => values.extend(own.clone()),
            None if profile == DEFAULT_PROFILE && !values.is_empty() => {}
            None => return Err(ConfigError::MissingProfile(profile.to_string())),
        }

        let required = |key: &str| {
            values
                .get(key)
                .cloned()
                .ok_or_else(|| ConfigError::MissingKey {
                    profile: profile.to_string(),
                    key: key.to_string(),
                })
        };
        let tenancy = required("tenancy")?;
        let region = required("region")?;
        let endpoint = values
            .get("endpoint")
            .cloned()
            .unwrap_or_else(|| Self::default_endpoint(&region));
        validate_endpoint(&endpoint)?;

        Ok(Self {
            tenancy,
            region,
            endpoint,
            user: values.get("user").cloned(),
            fingerprint: values.get("fingerprint").cloned(),
            key_file: values.get("key_file").map(|p| expand_home(p)),
            security_token_file: values.get("security_token_file").map(|p| expand_home(p)),
            token: None,
        })
    }

    /// Build the configuration from the instance metadata service.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata service is unreachable or answers garbage.
    pub async fn from_instance_metadata(
        http: &HttpClient,
        base_url: &str,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.trim_end_matches('/');
        let body = metadata_get(http, &format!("{base_url}/opc/v2/instance/")).await?;
        let instance: InstanceMetadata = serde_json::from_str(&body)
            .map_err(|e| ConfigError::Metadata(format!("invalid instance document: {e}")))?;
        let token = metadata_get(http, &format!("{base_url}/opc/v2/identity/token")).await?;

        Ok(Self {
            endpoint: Self::default_endpoint(&instance.canonical_region_name),
            tenancy: instance.tenant_id,
            region: instance.canonical_region_name,
            token: Some(token.trim().to_string()),
            ..Self::default()
        })
    }

    /// Bearer token: the metadata token, else the contents of `security_token_file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token file cannot be read.
    pub fn bearer_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.clone()));
        }
        let Some(path) = &self.security_token_file else {
            return Ok(None);
        };
        let token = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Some(token.trim().to_string()))
    }
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    url::Url::parse(endpoint)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            source,
        })
}

async fn metadata_get(http: &HttpClient, url: &str) -> Result<String, ConfigError> {
    let response = http
        .get(url)
        .header("Authorization", "Bearer Oracle")
        .send()
        .await
        .map_err(|e| ConfigError::Metadata(format!("failed to reach {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ConfigError::Metadata(format!("{url} returned {status}")));
    }
    response
        .text()
        .await
        .map_err(|e| ConfigError::Metadata(format!("failed to read {url}: {e}")))
}

fn parse_ini(contents: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current = DEFAULT_PROFILE.to_string();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

/// Expand a leading `~/` to `$HOME`.
#[must_use]
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
