// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `userdata.rs`

#[cfg(test)]
mod tests {
    use crate::crd::cloud::Container;
    use crate::userdata::{cpod_script, encode, master_script, shell_quote, worker_script};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::collections::BTreeMap;

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_cpod_script_runs_each_container() {
        let containers = vec![
            Container {
                name: "web".into(),
                image: "nginx:1.27".into(),
                ports: vec!["80:80".into()],
                env: BTreeMap::from([("MODE".to_string(), "prod".to_string())]),
                ..Default::default()
            },
            Container {
                name: "worker".into(),
                image: "busybox".into(),
                args: vec!["sleep".into(), "3600".into()],
                ..Default::default()
            },
        ];
        let script = cpod_script(&containers);
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains(
            "docker run -d --restart=always --name 'web' -e 'MODE=prod' -p '80:80' 'nginx:1.27'"
        ));
        assert!(script.contains("--name 'worker' 'busybox' 'sleep' '3600'"));
    }

    #[test]
    fn test_node_scripts_target_load_balancer() {
        let master = master_script("v1.31.2", "abcdef.0123456789abcdef", "129.146.0.2", "CERT\n", "KEY\n");
        assert!(master.contains("K8S_VERSION='1.31.2'"));
        assert!(master.contains("--control-plane-endpoint '129.146.0.2:6443'"));
        assert!(master.contains("--token 'abcdef.0123456789abcdef'"));
        assert!(master.contains("CERT\nEOF"));

        let worker = worker_script("1.31.2", "abcdef.0123456789abcdef", "129.146.0.2");
        assert!(worker.contains("kubeadm join '129.146.0.2:6443'"));
    }

    #[test]
    fn test_encode_is_standard_base64() {
        let encoded = encode("#!/bin/bash\n");
        assert_eq!(BASE64.decode(encoded).expect("decode"), b"#!/bin/bash\n");
    }
}
