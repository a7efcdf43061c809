// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-signed URL coordination for workspace blobs. Real bucket/credential
//! resolution is per-organization and lives outside this workspace; this
//! trait is the seam a concrete S3 (or compatible) implementation plugs
//! into. Its absence is a configuration error, not a per-invocation one:
//! `WorkspaceS3NotConfigured` is never retried.

use async_trait::async_trait;
use gateway_core::error::GatewayError;
use uuid::Uuid;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn presign_download(
        &self,
        organization_id: Uuid,
        object_key: &str,
    ) -> Result<String, GatewayError>;

    async fn presign_upload(
        &self,
        organization_id: Uuid,
        object_key: &str,
    ) -> Result<String, GatewayError>;
}

/// The default when no bucket/credentials are resolvable for an
/// organization: every presign call fails fast.
pub struct NotConfiguredObjectStore;

#[async_trait]
impl ObjectStore for NotConfiguredObjectStore {
    async fn presign_download(&self, _organization_id: Uuid, _object_key: &str) -> Result<String, GatewayError> {
        Err(GatewayError::WorkspaceS3NotConfigured)
    }

    async fn presign_upload(&self, _organization_id: Uuid, _object_key: &str) -> Result<String, GatewayError> {
        Err(GatewayError::WorkspaceS3NotConfigured)
    }
}

/// Deterministic fake for tests: returns a URL naming the key, no network.
#[derive(Default)]
pub struct InMemoryObjectStore;

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn presign_download(&self, organization_id: Uuid, object_key: &str) -> Result<String, GatewayError> {
        Ok(format!("https://fake-store.invalid/{organization_id}/{object_key}?op=download"))
    }

    async fn presign_upload(&self, organization_id: Uuid, object_key: &str) -> Result<String, GatewayError> {
        Ok(format!("https://fake-store.invalid/{organization_id}/{object_key}?op=upload"))
    }
}

#[cfg(test)]
#[path = "object_store_tests.rs"]
mod tests;
