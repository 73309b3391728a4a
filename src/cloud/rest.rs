// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! JSON client for a cloud provider gateway.
//!
//! Routes, relative to the configured endpoint:
//!
//! | Operation | Route |
//! |---|---|
//! | create | `POST /{collection}` |
//! | get | `GET /{collection}/{id}` |
//! | update | `PUT /{collection}/{id}` |
//! | delete | `DELETE /{collection}/{id}` |
//! | availability domains | `GET /availabilityDomains?compartmentId=...` |
//! | managed cluster kubeconfig | `GET /clusters/{id}/kubeconfig` |
//!
//! Reads, updates and deletes are retried on throttling and 5xx responses.
//! Creates are not: a retried create could produce a duplicate object, so the
//! work queue handles that failure instead.

use super::{CloudApi, CloudRequest, ResourceType};
use crate::crd::CloudResource;
use crate::errors::CloudError;
use crate::metrics::record_cloud_call;
use crate::retry::retry_cloud_call;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Deserialize)]
struct AvailabilityDomain {
    name: String,
}

/// Cloud provider client speaking JSON over HTTPS.
pub struct RestCloud {
    http: HttpClient,
    endpoint: String,
    token: Option<String>,
    tenancy: String,
}

impl RestCloud {
    /// Create a client for `endpoint`. `token` is sent as a bearer token when present.
    #[must_use]
    pub fn new(http: HttpClient, endpoint: &str, tenancy: &str, token: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            tenancy: tenancy.to_string(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send<B: Serialize + Sync>(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&B>,
        resource: &str,
        id: &str,
    ) -> Result<String, CloudError> {
        debug!(method = %method, url = %url, "cloud API request");

        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_cloud_call(operation, false);
                return Err(CloudError::Transient(format!(
                    "failed to send request to {url}: {e}"
                )));
            }
        };

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        record_cloud_call(operation, status.is_success());

        if !status.is_success() {
            error!(
                method = %method,
                url = %url,
                status = %status,
                error = %text,
                "cloud API request failed"
            );
            return Err(CloudError::from_status(status.as_u16(), resource, id, text));
        }
        Ok(text)
    }

    fn collection_url(&self, resource_type: ResourceType) -> String {
        format!("{}/{}", self.endpoint, resource_type.path())
    }

    fn object_url(&self, resource_type: ResourceType, id: &str) -> String {
        format!("{}/{}/{}", self.endpoint, resource_type.path(), id)
    }
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T, CloudError> {
    serde_json::from_str(text).map_err(|e| CloudError::Other(format!("invalid response: {e}")))
}

#[async_trait]
impl CloudApi for RestCloud {
    async fn create(
        &self,
        resource_type: ResourceType,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError> {
        let url = self.collection_url(resource_type);
        let resource = resource_type.to_string();
        let text = self
            .send(
                "create",
                Method::POST,
                &url,
                Some(request),
                &resource,
                &request.display_name,
            )
            .await?;
        parse(&text)
    }

    async fn get(
        &self,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<CloudResource, CloudError> {
        let url = self.object_url(resource_type, id);
        let resource = resource_type.to_string();
        let text = retry_cloud_call(
            || self.send("get", Method::GET, &url, None::<&()>, &resource, id),
            "get",
        )
        .await?;
        parse(&text)
    }

    async fn update(
        &self,
        resource_type: ResourceType,
        id: &str,
        request: &CloudRequest,
    ) -> Result<CloudResource, CloudError> {
        let url = self.object_url(resource_type, id);
        let resource = resource_type.to_string();
        let text = retry_cloud_call(
            || self.send("update", Method::PUT, &url, Some(request), &resource, id),
            "update",
        )
        .await?;
        parse(&text)
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<(), CloudError> {
        let url = self.object_url(resource_type, id);
        let resource = resource_type.to_string();
        retry_cloud_call(
            || self.send("delete", Method::DELETE, &url, None::<&()>, &resource, id),
            "delete",
        )
        .await?;
        Ok(())
    }

    async fn availability_domains(&self, compartment_id: &str) -> Result<Vec<String>, CloudError> {
        let url = format!(
            "{}/availabilityDomains?compartmentId={compartment_id}",
            self.endpoint
        );
        let text = retry_cloud_call(
            || {
                self.send(
                    "availability_domains",
                    Method::GET,
                    &url,
                    None::<&()>,
                    "availabilitydomain",
                    compartment_id,
                )
            },
            "availability_domains",
        )
        .await?;
        let ads: Vec<AvailabilityDomain> = parse(&text)?;
        Ok(ads.into_iter().map(|ad| ad.name).collect())
    }

    async fn cluster_kubeconfig(&self, cluster_id: &str) -> Result<String, CloudError> {
        let url = format!("{}/clusters/{cluster_id}/kubeconfig", self.endpoint);
        retry_cloud_call(
            || {
                self.send(
                    "cluster_kubeconfig",
                    Method::GET,
                    &url,
                    None::<&()>,
                    "cluster",
                    cluster_id,
                )
            },
            "cluster_kubeconfig",
        )
        .await
    }

    fn tenancy_id(&self) -> &str {
        &self.tenancy
    }
}

#[cfg(test)]
#[path = "rest_tests.rs"]
mod rest_tests;
