//! Persistence boundary.
//!
//! The platform's database is an external collaborator. Services talk to it
//! through [`RouterStore`]; [`MemoryStore`] backs tests and embedders that keep
//! state in process.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::credential::EncryptedSecret;
use crate::error::ProvisionError;
use crate::model::{
    ConfigType, DeploymentStatus, ProvisioningStage, Router, RouterService, ServiceVlan, SnmpCredentials, TenantIpPool,
};
use crate::script::ObjectRef;

/// A composed script persisted for one router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigRecord {
    pub router_id: String,
    pub config_type: ConfigType,
    pub content: String,
    /// Hex SHA-256 of `content`.
    pub digest: String,
    /// Objects the post-deploy validator expects to find.
    pub expected: Vec<ObjectRef>,
    #[serde(default)]
    pub service_ids: Vec<String>,
    /// VLAN rows to record once the script is deployed.
    #[serde(default)]
    pub vlans: Vec<ServiceVlan>,
    pub generated_at: DateTime<Utc>,
}

impl ConfigRecord {
    pub fn new(
        router_id: impl Into<String>,
        config_type: ConfigType,
        content: String,
        expected: Vec<ObjectRef>,
        service_ids: Vec<String>,
    ) -> Self {
        Self {
            router_id: router_id.into(),
            config_type,
            digest: content_digest(&content),
            content,
            expected,
            service_ids,
            vlans: Vec::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn with_vlans(mut self, vlans: Vec<ServiceVlan>) -> Self {
        self.vlans = vlans;
        self
    }

    /// Whether `content` still matches the stored digest.
    pub fn is_intact(&self) -> bool {
        content_digest(&self.content) == self.digest
    }
}

pub fn content_digest(content: &str) -> String {
    Sha256::digest(content.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Router rows and composed scripts.
pub trait RouterStore: Send + Sync {
    /// A router by id; soft-deleted rows are returned too.
    fn router(&self, id: &str) -> impl Future<Output = Result<Router, ProvisionError>> + Send;

    /// Routers that are not soft-deleted, optionally limited to one tenant.
    fn routers(
        &self,
        tenant_id: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Router>, ProvisionError>> + Send;

    fn services(
        &self,
        router_id: &str,
    ) -> impl Future<Output = Result<Vec<RouterService>, ProvisionError>> + Send;

    fn ip_pool(&self, id: &str) -> impl Future<Output = Result<TenantIpPool, ProvisionError>> + Send;

    /// Stores a new encrypted key and its rotation timestamp.
    fn update_ssh_key(
        &self,
        router_id: &str,
        key: EncryptedSecret,
        rotated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Stores a router's first key; the rotation timestamp is cleared.
    fn initialize_ssh_key(
        &self,
        router_id: &str,
        key: EncryptedSecret,
        created_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Moves the stage forward; never backwards.
    fn advance_stage(
        &self,
        router_id: &str,
        stage: ProvisioningStage,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn update_snmp(
        &self,
        router_id: &str,
        snmp: SnmpCredentials,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn update_service_status(
        &self,
        service_id: &str,
        status: DeploymentStatus,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    /// Replaces the VLAN rows of every service on `router_id`.
    fn replace_service_vlans(
        &self,
        router_id: &str,
        vlans: Vec<ServiceVlan>,
    ) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn service_vlans(&self, router_id: &str) -> impl Future<Output = Result<Vec<ServiceVlan>, ProvisionError>> + Send;

    fn save_config(&self, record: ConfigRecord) -> impl Future<Output = Result<(), ProvisionError>> + Send;

    fn load_config(
        &self,
        router_id: &str,
        config_type: ConfigType,
    ) -> impl Future<Output = Result<ConfigRecord, ProvisionError>> + Send;
}

#[derive(Default)]
struct Tables {
    routers: HashMap<String, Router>,
    services: HashMap<String, RouterService>,
    pools: HashMap<String, TenantIpPool>,
    vlans: HashMap<String, Vec<ServiceVlan>>,
    configs: HashMap<(String, ConfigType), ConfigRecord>,
}

/// In-process [`RouterStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_router(&self, router: Router) {
        self.tables.write().await.routers.insert(router.id.clone(), router);
    }

    pub async fn insert_service(&self, service: RouterService) {
        self.tables.write().await.services.insert(service.id.clone(), service);
    }

    pub async fn insert_pool(&self, pool: TenantIpPool) {
        self.tables.write().await.pools.insert(pool.id.clone(), pool);
    }

    pub async fn service(&self, id: &str) -> Option<RouterService> {
        self.tables.read().await.services.get(id).cloned()
    }
}

fn router_mut<'a>(tables: &'a mut Tables, id: &str) -> Result<&'a mut Router, ProvisionError> {
    tables
        .routers
        .get_mut(id)
        .ok_or_else(|| ProvisionError::RouterNotFound(id.to_string()))
}

impl RouterStore for MemoryStore {
    async fn router(&self, id: &str) -> Result<Router, ProvisionError> {
        self.tables
            .read()
            .await
            .routers
            .get(id)
            .cloned()
            .ok_or_else(|| ProvisionError::RouterNotFound(id.to_string()))
    }

    async fn routers(&self, tenant_id: Option<&str>) -> Result<Vec<Router>, ProvisionError> {
        let tables = self.tables.read().await;
        let mut routers: Vec<Router> = tables
            .routers
            .values()
            .filter(|r| !r.is_deleted())
            .filter(|r| tenant_id.is_none_or(|t| r.tenant_id.as_deref() == Some(t)))
            .cloned()
            .collect();
        routers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(routers)
    }

    async fn services(&self, router_id: &str) -> Result<Vec<RouterService>, ProvisionError> {
        let tables = self.tables.read().await;
        let mut services: Vec<RouterService> = tables
            .services
            .values()
            .filter(|s| s.router_id == router_id)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(services)
    }

    async fn ip_pool(&self, id: &str) -> Result<TenantIpPool, ProvisionError> {
        self.tables
            .read()
            .await
            .pools
            .get(id)
            .cloned()
            .ok_or_else(|| ProvisionError::Persistence(format!("ip pool {id} not found")))
    }

    async fn update_ssh_key(
        &self,
        router_id: &str,
        key: EncryptedSecret,
        rotated_at: DateTime<Utc>,
    ) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        let router = router_mut(&mut tables, router_id)?;
        router.ssh_key_created_at.get_or_insert(rotated_at);
        router.ssh_key = Some(key);
        router.ssh_key_rotated_at = Some(rotated_at);
        Ok(())
    }

    async fn initialize_ssh_key(
        &self,
        router_id: &str,
        key: EncryptedSecret,
        created_at: DateTime<Utc>,
    ) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        let router = router_mut(&mut tables, router_id)?;
        router.ssh_key = Some(key);
        router.ssh_key_created_at = Some(created_at);
        router.ssh_key_rotated_at = None;
        Ok(())
    }

    async fn advance_stage(&self, router_id: &str, stage: ProvisioningStage) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        router_mut(&mut tables, router_id)?.advance_stage(stage);
        Ok(())
    }

    async fn update_snmp(&self, router_id: &str, snmp: SnmpCredentials) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        router_mut(&mut tables, router_id)?.snmp = Some(snmp);
        Ok(())
    }

    async fn update_service_status(
        &self,
        service_id: &str,
        status: DeploymentStatus,
    ) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        let service = tables
            .services
            .get_mut(service_id)
            .ok_or_else(|| ProvisionError::Persistence(format!("service {service_id} not found")))?;
        service.status = status;
        Ok(())
    }

    async fn replace_service_vlans(&self, router_id: &str, vlans: Vec<ServiceVlan>) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        router_mut(&mut tables, router_id)?;
        tables.vlans.insert(router_id.to_string(), vlans);
        Ok(())
    }

    async fn service_vlans(&self, router_id: &str) -> Result<Vec<ServiceVlan>, ProvisionError> {
        Ok(self.tables.read().await.vlans.get(router_id).cloned().unwrap_or_default())
    }

    async fn save_config(&self, record: ConfigRecord) -> Result<(), ProvisionError> {
        let mut tables = self.tables.write().await;
        if !tables.routers.contains_key(&record.router_id) {
            return Err(ProvisionError::RouterNotFound(record.router_id));
        }
        tables
            .configs
            .insert((record.router_id.clone(), record.config_type), record);
        Ok(())
    }

    async fn load_config(&self, router_id: &str, config_type: ConfigType) -> Result<ConfigRecord, ProvisionError> {
        self.tables
            .read()
            .await
            .configs
            .get(&(router_id.to_string(), config_type))
            .cloned()
            .ok_or_else(|| ProvisionError::ConfigNotFound {
                router_id: router_id.to_string(),
                config_type: config_type.as_str().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deleted_routers_are_hidden_from_listings() {
        let store = MemoryStore::new();
        let mut gone = Router::new("R2", "10.0.0.2", "rosprov");
        gone.deleted_at = Some(Utc::now());
        store.insert_router(Router::new("R1", "10.0.0.1", "rosprov")).await;
        store.insert_router(gone).await;

        let ids: Vec<String> = store.routers(None).await.expect("list").into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["R1".to_string()]);
        assert!(store.router("R2").await.expect("row").is_deleted());
    }

    #[tokio::test]
    async fn configs_are_keyed_by_router_and_type() {
        let store = MemoryStore::new();
        store.insert_router(Router::new("R1", "10.0.0.1", "rosprov")).await;
        let record = ConfigRecord::new("R1", ConfigType::Service, "/ip pool add name=p".to_string(), vec![], vec![]);
        assert!(record.is_intact());
        store.save_config(record.clone()).await.expect("save");

        assert_eq!(store.load_config("R1", ConfigType::Service).await.expect("load"), record);
        assert!(matches!(
            store.load_config("R1", ConfigType::Hardening).await,
            Err(ProvisionError::ConfigNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stage_never_moves_backwards() {
        let store = MemoryStore::new();
        store.insert_router(Router::new("R1", "10.0.0.1", "rosprov")).await;
        store.advance_stage("R1", ProvisioningStage::Configured).await.expect("advance");
        store.advance_stage("R1", ProvisioningStage::ConnectivityVerified).await.expect("advance");
        assert_eq!(store.router("R1").await.expect("row").stage, ProvisioningStage::Configured);
    }
}
