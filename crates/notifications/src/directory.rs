//! Tenant owners and their registered devices.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{TenantId, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Result;

/// A device registered for push notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub user_id: UserId,
    pub token: String,
    pub platform: String,
    pub last_active_at: DateTime<Utc>,
}

/// Looks up who to notify for a tenant.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Returns the user owning a tenant, if any.
    async fn owner_for_tenant(&self, tenant_id: TenantId) -> Result<Option<UserId>>;

    /// Returns the device tokens registered by a user.
    async fn tokens_for_user(&self, user_id: UserId) -> Result<Vec<DeviceToken>>;
}

#[derive(Default)]
struct DirectoryState {
    owners: HashMap<TenantId, UserId>,
    devices: HashMap<UserId, Vec<DeviceToken>>,
}

/// In-memory device directory.
#[derive(Clone, Default)]
pub struct InMemoryDeviceDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the owner of a tenant.
    pub async fn set_owner(&self, tenant_id: TenantId, user_id: UserId) {
        self.state.write().await.owners.insert(tenant_id, user_id);
    }

    /// Registers a device, replacing an existing registration of the same token.
    pub async fn register_device(&self, device: DeviceToken) {
        let mut state = self.state.write().await;
        let devices = state.devices.entry(device.user_id).or_default();
        devices.retain(|d| d.token != device.token);
        devices.push(device);
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn owner_for_tenant(&self, tenant_id: TenantId) -> Result<Option<UserId>> {
        Ok(self.state.read().await.owners.get(&tenant_id).copied())
    }

    async fn tokens_for_user(&self, user_id: UserId) -> Result<Vec<DeviceToken>> {
        Ok(self
            .state
            .read()
            .await
            .devices
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// PostgreSQL-backed device directory over `tenant_owners` and `device_tokens`.
#[derive(Clone)]
pub struct PostgresDeviceDirectory {
    pool: PgPool,
}

impl PostgresDeviceDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeviceDirectory for PostgresDeviceDirectory {
    async fn owner_for_tenant(&self, tenant_id: TenantId) -> Result<Option<UserId>> {
        let owner: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM tenant_owners WHERE tenant_id = $1")
                .bind(tenant_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(owner.map(UserId::from_uuid))
    }

    async fn tokens_for_user(&self, user_id: UserId) -> Result<Vec<DeviceToken>> {
        let rows = sqlx::query(
            r#"
            SELECT token, platform, last_active_at
            FROM device_tokens
            WHERE user_id = $1
            ORDER BY last_active_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<DeviceToken> {
                Ok(DeviceToken {
                    user_id,
                    token: row.try_get("token")?,
                    platform: row.try_get("platform")?,
                    last_active_at: row.try_get("last_active_at")?,
                })
            })
            .collect()
    }
}
