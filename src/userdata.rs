// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Instance user-data scripts.
//!
//! Instances receive base64-encoded user-data. Cpods get a shell script that
//! installs a container runtime and starts each container; self-managed
//! cluster nodes get kubeadm bootstrap scripts pointing at the cluster's
//! load balancer.

use crate::constants::APISERVER_PORT;
use crate::crd::cloud::Container;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt::Write as _;

/// Base64 form expected by the instance API.
#[must_use]
pub fn encode(plain: &str) -> String {
    BASE64.encode(plain)
}

/// Quote a value for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell script running every container of a Cpod.
#[must_use]
pub fn cpod_script(containers: &[Container]) -> String {
    let mut script = String::from(
        "#!/bin/bash\nset -euo pipefail\n\n\
         if ! command -v docker >/dev/null 2>&1; then\n  \
         curl -fsSL https://get.docker.com | sh\nfi\n\
         systemctl enable --now docker\n",
    );
    for container in containers {
        let _ = write!(
            script,
            "\ndocker rm -f {name} >/dev/null 2>&1 || true\ndocker run -d --restart=always --name {name}",
            name = shell_quote(&container.name)
        );
        for (key, value) in &container.env {
            let _ = write!(script, " -e {}", shell_quote(&format!("{key}={value}")));
        }
        for port in &container.ports {
            let _ = write!(script, " -p {}", shell_quote(port));
        }
        let _ = write!(script, " {}", shell_quote(&container.image));
        for arg in &container.args {
            let _ = write!(script, " {}", shell_quote(arg));
        }
        script.push('\n');
    }
    script
}

fn kubeadm_prelude(kubernetes_version: &str) -> String {
    format!(
        "#!/bin/bash\nset -euo pipefail\n\n\
         K8S_VERSION={version}\n\
         curl -fsSL https://pkgs.k8s.io/core:/stable:/v${{K8S_VERSION%.*}}/deb/Release.key \
         | gpg --dearmor -o /etc/apt/keyrings/kubernetes.gpg\n\
         echo \"deb [signed-by=/etc/apt/keyrings/kubernetes.gpg] \
         https://pkgs.k8s.io/core:/stable:/v${{K8S_VERSION%.*}}/deb/ /\" \
         > /etc/apt/sources.list.d/kubernetes.list\n\
         apt-get update && apt-get install -y containerd kubelet kubeadm kubectl\n\
         systemctl enable --now containerd kubelet\n",
        version = shell_quote(kubernetes_version.trim_start_matches('v'))
    )
}

/// kubeadm init on the first master, using the persisted cluster CA.
#[must_use]
pub fn master_script(
    kubernetes_version: &str,
    bootstrap_token: &str,
    lb_address: &str,
    ca_cert_pem: &str,
    ca_key_pem: &str,
) -> String {
    let mut script = kubeadm_prelude(kubernetes_version);
    let _ = write!(
        script,
        "\nmkdir -p /etc/kubernetes/pki\n\
         cat > /etc/kubernetes/pki/ca.crt <<'EOF'\n{ca_cert_pem}EOF\n\
         cat > /etc/kubernetes/pki/ca.key <<'EOF'\n{ca_key_pem}EOF\n\
         chmod 600 /etc/kubernetes/pki/ca.key\n\n\
         kubeadm init --token {token} --token-ttl 0 \
         --control-plane-endpoint {endpoint} --apiserver-cert-extra-sans {address} \
         --upload-certs\n",
        token = shell_quote(bootstrap_token),
        endpoint = shell_quote(&format!("{lb_address}:{APISERVER_PORT}")),
        address = shell_quote(lb_address),
    );
    script
}

/// kubeadm join for workers, trusting the bootstrap token.
#[must_use]
pub fn worker_script(kubernetes_version: &str, bootstrap_token: &str, lb_address: &str) -> String {
    let mut script = kubeadm_prelude(kubernetes_version);
    let _ = write!(
        script,
        "\nkubeadm join {endpoint} --token {token} \
         --discovery-token-unsafe-skip-ca-verification\n",
        endpoint = shell_quote(&format!("{lb_address}:{APISERVER_PORT}")),
        token = shell_quote(bootstrap_token),
    );
    script
}

#[cfg(test)]
#[path = "userdata_tests.rs"]
mod userdata_tests;
