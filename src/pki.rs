// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Certificate authority and kubeconfig rendering for self-managed clusters.
//!
//! The CA key pair and the node bootstrap token are generated once and kept
//! in a Secret, so every reconcile signs with the same authority. The admin
//! kubeconfig embeds the CA certificate and a client certificate for
//! `system:masters` signed by it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Secret key holding the CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret key holding the CA private key
pub const CA_KEY_KEY: &str = "ca.key";

/// Secret key holding the node bootstrap token
pub const BOOTSTRAP_TOKEN_KEY: &str = "token";

/// Persisted authority of one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterCa {
    pub cert_pem: String,
    pub key_pem: String,
    /// `[a-z0-9]{6}.[a-z0-9]{16}`, used by nodes to join
    pub bootstrap_token: String,
}

fn ca_params(cluster_name: &str) -> Result<CertificateParams, rcgen::Error> {
    let mut params = CertificateParams::new(Vec::<String>::new())?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, format!("{cluster_name}-ca"));
    dn.push(DnType::OrganizationName, "cloudplane");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    Ok(params)
}

fn token_part(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|c| char::from(c).to_ascii_lowercase())
        .take(len)
        .collect()
}

impl ClusterCa {
    /// Generate a new authority for `cluster_name`.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or self-signing fails.
    pub fn generate(cluster_name: &str) -> Result<Self, rcgen::Error> {
        let key = KeyPair::generate()?;
        let cert = ca_params(cluster_name)?.self_signed(&key)?;
        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            bootstrap_token: format!("{}.{}", token_part(6), token_part(16)),
        })
    }

    /// Text values to store in the CA Secret.
    #[must_use]
    pub fn to_secret_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CA_CERT_KEY.to_string(), self.cert_pem.clone()),
            (CA_KEY_KEY.to_string(), self.key_pem.clone()),
            (BOOTSTRAP_TOKEN_KEY.to_string(), self.bootstrap_token.clone()),
        ])
    }

    /// Read an authority back from Secret data; `None` when a key is missing.
    #[must_use]
    pub fn from_secret_data(data: &BTreeMap<String, ByteString>) -> Option<Self> {
        let text = |key: &str| {
            data.get(key)
                .and_then(|b| String::from_utf8(b.0.clone()).ok())
        };
        Some(Self {
            cert_pem: text(CA_CERT_KEY)?,
            key_pem: text(CA_KEY_KEY)?,
            bootstrap_token: text(BOOTSTRAP_TOKEN_KEY)?,
        })
    }

    /// Issue an admin client certificate; returns `(cert_pem, key_pem)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored key cannot be parsed or signing fails.
    pub fn issue_admin(&self, cluster_name: &str) -> Result<(String, String), rcgen::Error> {
        let ca_key = KeyPair::from_pem(&self.key_pem)?;
        // Same subject and key as the stored certificate, so signatures chain to it
        let issuer: Certificate = ca_params(cluster_name)?.self_signed(&ca_key)?;

        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "cloudplane-admin");
        dn.push(DnType::OrganizationName, "system:masters");
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];

        let client_key = KeyPair::generate()?;
        let cert = params.signed_by(&client_key, &issuer, &ca_key)?;
        Ok((cert.pem(), client_key.serialize_pem()))
    }
}

#[derive(Serialize, Deserialize)]
struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    clusters: Vec<NamedCluster>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: String,
    users: Vec<NamedUser>,
}

#[derive(Serialize, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: ClusterEntry,
}

#[derive(Serialize, Deserialize)]
struct ClusterEntry {
    server: String,
    #[serde(rename = "certificate-authority-data", default)]
    certificate_authority_data: String,
}

#[derive(Serialize, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextEntry,
}

#[derive(Serialize, Deserialize)]
struct ContextEntry {
    cluster: String,
    user: String,
}

#[derive(Serialize, Deserialize)]
struct NamedUser {
    name: String,
    user: UserEntry,
}

#[derive(Serialize, Deserialize)]
struct UserEntry {
    #[serde(rename = "client-certificate-data", default)]
    client_certificate_data: String,
    #[serde(rename = "client-key-data", default)]
    client_key_data: String,
}

/// Render an admin kubeconfig whose only context is named after the cluster.
///
/// # Errors
///
/// Returns an error if YAML serialization fails.
pub fn render_kubeconfig(
    cluster_name: &str,
    server: &str,
    ca_pem: &str,
    client_cert_pem: &str,
    client_key_pem: &str,
) -> Result<String, serde_yaml::Error> {
    let user = format!("{cluster_name}-admin");
    serde_yaml::to_string(&Kubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster_name.to_string(),
            cluster: ClusterEntry {
                server: server.to_string(),
                certificate_authority_data: BASE64.encode(ca_pem),
            },
        }],
        contexts: vec![NamedContext {
            name: cluster_name.to_string(),
            context: ContextEntry {
                cluster: cluster_name.to_string(),
                user: user.clone(),
            },
        }],
        current_context: cluster_name.to_string(),
        users: vec![NamedUser {
            name: user,
            user: UserEntry {
                client_certificate_data: BASE64.encode(client_cert_pem),
                client_key_data: BASE64.encode(client_key_pem),
            },
        }],
    })
}

/// `(server, current-context)` of a rendered kubeconfig.
#[must_use]
pub fn kubeconfig_summary(kubeconfig: &str) -> Option<(String, String)> {
    let parsed: Kubeconfig = serde_yaml::from_str(kubeconfig).ok()?;
    let server = parsed.clusters.first()?.cluster.server.clone();
    Some((server, parsed.current_context))
}

#[cfg(test)]
#[path = "pki_tests.rs"]
mod pki_tests;
