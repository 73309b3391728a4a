// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Generates Kubernetes CRD YAML files from the Rust types in `src/crd/`.
//! This keeps the YAML files in deploy/crds/ in sync with the schemas the
//! control plane registers at startup.
//!
//! Usage:
//!   cargo run --bin crdgen
//!
//! Generated files will be written to deploy/crds/ as `<plural>.<group>.yaml`.

use cloudplane::crd::crds;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use std::fs;
use std::path::Path;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd/
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = Path::new("deploy/crds");

    // Ensure output directory exists
    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd/...");

    let crds = crds();
    for crd in &crds {
        generate_crd(crd, output_dir)?;
    }

    println!("✓ Successfully generated {} CRD YAML files in deploy/crds/", crds.len());
    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f deploy/crds/");

    Ok(())
}

fn generate_crd(
    crd: &CustomResourceDefinition,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = crd
        .metadata
        .name
        .as_deref()
        .ok_or("CRD without metadata.name")?;
    let filename = format!("{name}.yaml");

    let yaml = serde_yaml::to_string(crd)?;
    let content = format!("{COPYRIGHT_HEADER}{yaml}");

    fs::write(output_dir.join(&filename), content)?;
    println!("  ✓ Generated {filename}");

    Ok(())
}
