// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use super::{in_compartment, required_secret_value};
use crate::adapters::{AdapterContext, ParentRef, Parents, PrimitiveAdapter};
use crate::cloud::{CloudRequest, ResourceType};
use crate::crd::resources::DbAutonomous;
use crate::errors::ReconcileError;
use async_trait::async_trait;
use kube::ResourceExt;

/// Secret key holding the admin password.
pub const ADMIN_PASSWORD_KEY: &str = "password";

/// Autonomous databases; the admin password is read from a Secret and never
/// stored in status.
pub struct DbAutonomousAdapter;

#[async_trait]
impl PrimitiveAdapter for DbAutonomousAdapter {
    type Kind = DbAutonomous;
    const RESOURCE_TYPE: ResourceType = ResourceType::AutonomousDatabase;

    fn check(&self, obj: &DbAutonomous) -> Result<(), ReconcileError> {
        if obj.spec.db_name.is_empty() {
            return Err(ReconcileError::validation("spec.dbName", "must not be empty"));
        }
        if obj.spec.cpu_core_count < 1 {
            return Err(ReconcileError::validation(
                "spec.cpuCoreCount",
                "must be at least 1",
            ));
        }
        if obj.spec.data_storage_size_in_tbs < 1 {
            return Err(ReconcileError::validation(
                "spec.dataStorageSizeInTBs",
                "must be at least 1",
            ));
        }
        if obj.spec.admin_password_secret.is_empty() {
            return Err(ReconcileError::validation(
                "spec.adminPasswordSecret",
                "must name a Secret",
            ));
        }
        Ok(())
    }

    fn parent_refs(&self, obj: &DbAutonomous) -> Vec<ParentRef> {
        in_compartment(obj, [])
    }

    async fn request(
        &self,
        ctx: &AdapterContext,
        obj: &DbAutonomous,
        parents: &Parents,
    ) -> Result<CloudRequest, ReconcileError> {
        let namespace = obj.namespace().unwrap_or_default();
        let password = required_secret_value(
            ctx,
            &namespace,
            &obj.spec.admin_password_secret,
            ADMIN_PASSWORD_KEY,
        )
        .await?;
        Ok(CloudRequest::new(&parents.compartment_id()?, &obj.name_any())
            .attr("dbName", obj.spec.db_name.clone())
            .attr("cpuCoreCount", obj.spec.cpu_core_count.to_string())
            .attr(
                "dataStorageSizeInTBs",
                obj.spec.data_storage_size_in_tbs.to_string(),
            )
            .sensitive("adminPassword", password))
    }
}
