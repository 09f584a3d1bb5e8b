//! Configuration orchestration.
//!
//! [`ConfigurationService`] composes generator output per router, persists it
//! through a [`RouterStore`], and deploys it with the executor's retry
//! primitive. Deployments and key rotations of one router serialize on
//! [`RouterLocks`].

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::Settings;
use crate::credential::CredentialVault;
use crate::error::ProvisionError;
use crate::generator::{
    ConfigGenerator, HardeningGenerator, HardeningOptions, SecurityScore, ServiceOptions, ServicePlan, SnmpGenerator,
    SnmpOptions, TenantContext, Topology, check_service_layout, security_score, service_vlans,
};
use crate::model::{ConfigType, DeploymentStatus, ProvisioningStage, Router, RouterService, ServiceType};
use crate::script::{Script, commands_from_text};
use crate::session::{BatchOutcome, Connector, ExpectedObjects, SshExecutor};
use crate::store::{ConfigRecord, RouterStore};

/// Table size past which unused router locks are pruned.
const PRUNE_AT: usize = 1024;

/// Guard returned by [`RouterLocks::acquire`].
pub type RouterGuard = OwnedMutexGuard<()>;

/// Per-router async mutexes.
///
/// An entry lives while anyone holds or waits on it, so a held lock is never
/// replaced by a fresh one. Idle entries are dropped once the table passes
/// `PRUNE_AT`.
#[derive(Clone, Default)]
pub struct RouterLocks {
    locks: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RouterLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of routers with a lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, router_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= PRUNE_AT && !locks.contains_key(router_id) {
            // holders and waiters keep their own Arc
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        locks
            .entry(router_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits at most `wait` for the router's lock.
    pub async fn acquire(&self, router_id: &str, wait: Duration) -> Result<RouterGuard, ProvisionError> {
        let lock = self.entry(router_id);
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                warn!(router_id = router_id, operation = "lock"; "router busy after {}s", wait.as_secs());
                Err(ProvisionError::RouterBusy(router_id.to_string()))
            }
        }
    }
}

/// Services to compose into one router script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceRequest {
    #[serde(default)]
    pub tenant: TenantContext,
    pub plans: Vec<ServicePlan>,
}

/// How a saved script reaches the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// One SSH command per script line.
    Inline,
    /// Upload as `.rsc` and run `/import`.
    Import,
    /// Inline up to `Settings::inline_command_limit` commands, import above.
    #[default]
    Auto,
}

/// Result of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeploymentReport {
    pub router_id: String,
    pub config_type: ConfigType,
    /// Path actually taken; never `Auto`.
    pub mode: DeployMode,
    pub warnings: Vec<String>,
    pub outcome: BatchOutcome,
}

impl DeploymentReport {
    pub fn success(&self) -> bool {
        self.outcome.success
    }
}

static DANGEROUS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^/system\s+reset-configuration\b", "resets the device configuration"),
        (r"^/system\s+reboot\b", "reboots the device"),
        (r"^/user\s+remove\b", "removes device users"),
        (r"^/file\s+remove\b", "removes files outside guarded cleanup"),
    ]
    .into_iter()
    .map(|(pattern, why)| (Regex::new(pattern).expect("valid dangerous command regex"), why))
    .collect()
});

/// Checks a script before it is saved or deployed.
///
/// Returns warnings for dangerous commands. Empty scripts and lines with an
/// unterminated string are errors.
pub fn validate_configuration(text: &str) -> Result<Vec<String>, ProvisionError> {
    let commands = commands_from_text(text);
    if commands.is_empty() {
        return Err(ProvisionError::InvalidConfiguration(
            "script contains no commands".to_string(),
        ));
    }
    let mut warnings = Vec::new();
    for (index, command) in commands.iter().enumerate() {
        if !quotes_balanced(command) {
            return Err(ProvisionError::InvalidConfiguration(format!(
                "unterminated string in command {}",
                index + 1
            )));
        }
        for (pattern, why) in DANGEROUS.iter() {
            if pattern.is_match(command.trim_start()) {
                warnings.push(format!("command {} {why}: {}", index + 1, command.trim()));
            }
        }
    }
    Ok(warnings)
}

fn quotes_balanced(line: &str) -> bool {
    let mut open = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if open => {
                chars.next();
            }
            '"' => open = !open,
            _ => {}
        }
    }
    !open
}

/// Composes, persists and deploys router configuration.
pub struct ConfigurationService<C: Connector, S: RouterStore> {
    connector: Arc<C>,
    store: Arc<S>,
    vault: Arc<CredentialVault>,
    settings: Settings,
    locks: RouterLocks,
}

impl<C: Connector, S: RouterStore> ConfigurationService<C, S> {
    pub fn new(
        connector: Arc<C>,
        store: Arc<S>,
        vault: Arc<CredentialVault>,
        settings: Settings,
        locks: RouterLocks,
    ) -> Self {
        Self {
            connector,
            store,
            vault,
            settings,
            locks,
        }
    }

    pub fn locks(&self) -> &RouterLocks {
        &self.locks
    }

    /// Generates every planned service, composes one script and saves it.
    pub async fn generate_service_config(
        &self,
        router_id: &str,
        request: ServiceRequest,
    ) -> Result<ConfigRecord, ProvisionError> {
        let router = self.live_router(router_id).await?;
        let tenant = resolve_tenant(&router, request.tenant)?;

        let plans: Vec<ServicePlan> = request
            .plans
            .into_iter()
            .filter(|p| p.service_type != ServiceType::None)
            .collect();
        if plans.is_empty() {
            return Err(ProvisionError::NoServiceSelected);
        }
        check_service_layout(&plans)?;

        let mut per_type: HashMap<ServiceType, usize> = HashMap::new();
        for plan in &plans {
            *per_type.entry(plan.service_type).or_default() += 1;
        }
        let mut seen: HashMap<ServiceType, usize> = HashMap::new();

        let services = self.store.services(&router.id).await?;
        let mut script = Script::new("service configuration", &router.id);
        let mut service_ids = Vec::new();
        let mut vlans = Vec::new();
        for plan in plans {
            let Some(topology) = Topology::for_service(plan.service_type) else {
                continue;
            };
            let mut options = plan.options;
            if per_type.get(&plan.service_type).copied().unwrap_or(0) > 1 {
                let ordinal = seen.entry(plan.service_type).or_default();
                *ordinal += 1;
                options.service_index = Some(*ordinal);
            }
            let service = plan
                .service_id
                .as_deref()
                .and_then(|id| services.iter().find(|s| s.id == id));
            if let Some(service) = service {
                self.apply_tenant_pool(&tenant, service, &mut options).await?;
            }
            let part = topology.generate_config(&tenant, &plan.interfaces, &router.id, &options)?;
            script.extend(part);
            if let Some(id) = plan.service_id {
                vlans.extend(service_vlans(&id, plan.service_type, &plan.interfaces, &router.id, &options));
                service_ids.push(id);
            }
        }

        let content = script.render();
        for warning in validate_configuration(&content)? {
            warn!(router_id = router.id.as_str(), operation = "generate"; "{warning}");
        }
        let record = ConfigRecord::new(
            &router.id,
            ConfigType::Service,
            content,
            script.created_objects(),
            service_ids,
        )
        .with_vlans(vlans);
        self.store.save_config(record.clone()).await?;
        info!(
            router_id = router.id.as_str(),
            operation = "generate",
            success = true;
            "service configuration saved ({} objects)",
            record.expected.len()
        );
        Ok(record)
    }

    /// Pushes the saved service script and records the result on the services.
    pub async fn deploy_service_config(
        &self,
        router_id: &str,
        mode: DeployMode,
    ) -> Result<DeploymentReport, ProvisionError> {
        let _guard = self.locks.acquire(router_id, self.settings.lock_wait()).await?;
        let router = self.live_router(router_id).await?;
        let record = self.saved_config(router_id, ConfigType::Service).await?;
        let warnings = validate_configuration(&record.content)?;

        for id in &record.service_ids {
            self.store.update_service_status(id, DeploymentStatus::Deploying).await?;
        }
        let report = self.deploy(&router, &record, mode, warnings).await;
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.mark_services(&record.service_ids, DeploymentStatus::Failed).await;
                return Err(e);
            }
        };

        let status = if report.success() {
            DeploymentStatus::Deployed
        } else {
            DeploymentStatus::Failed
        };
        self.mark_services(&record.service_ids, status).await;
        if report.success() {
            self.store.replace_service_vlans(router_id, record.vlans.clone()).await?;
            self.store.advance_stage(router_id, ProvisioningStage::Configured).await?;
        }
        Ok(report)
    }

    /// Fills pool, gateway and DNS from the tenant pool assigned to `service`.
    ///
    /// Values already present in the plan win. Hybrid plans carry their own
    /// per-VLAN pools and are left alone.
    async fn apply_tenant_pool(
        &self,
        tenant: &TenantContext,
        service: &RouterService,
        options: &mut ServiceOptions,
    ) -> Result<(), ProvisionError> {
        let Some(pool_id) = service.ip_pool_id.as_deref() else {
            return Ok(());
        };
        if options.ip_pool.is_some() || service.service_type == ServiceType::Hybrid {
            return Ok(());
        }
        let pool = self.store.ip_pool(pool_id).await?;
        pool.ensure_serves(service.service_type)?;
        if tenant.tenant_id.as_deref() != Some(pool.tenant_id.as_str()) {
            return Err(ProvisionError::InvalidConfiguration(format!(
                "ip pool {} belongs to tenant {}",
                pool.id, pool.tenant_id
            )));
        }
        if pool.available_ips() == 0 {
            return Err(ProvisionError::invalid_option(
                "ip_pool",
                format!("pool {} has no free addresses", pool.id),
            ));
        }
        options.ip_pool = Some(pool.range()?.to_string());
        if options.gateway.is_none() {
            options.gateway = Some(pool.gateway_ip.clone());
        }
        if options.dns_servers.is_empty() {
            options.dns_servers = pool.dns_servers();
        }
        debug!(service_id = service.id.as_str(), pool_id = pool.id.as_str(); "using tenant pool");
        Ok(())
    }

    /// Logs in and reads the router identity.
    pub async fn verify_connectivity(&self, router_id: &str) -> Result<String, ProvisionError> {
        let router = self.live_router(router_id).await?;
        let mut executor = self.executor(&router)?;
        let result = executor.exec("/system identity print").await;
        executor.disconnect().await;
        let identity = result?
            .stdout
            .lines()
            .find_map(|l| l.trim().strip_prefix("name:"))
            .map(|name| name.trim().to_string())
            .unwrap_or_default();
        self.store
            .advance_stage(router_id, ProvisioningStage::ConnectivityVerified)
            .await?;
        info!(router_id = router_id, operation = "verify_connectivity", success = true; "identity '{identity}'");
        Ok(identity)
    }

    pub async fn generate_hardening(
        &self,
        router_id: &str,
        options: &HardeningOptions,
    ) -> Result<ConfigRecord, ProvisionError> {
        let router = self.live_router(router_id).await?;
        let script = HardeningGenerator.generate(&router, options)?;
        self.save_script(&router, ConfigType::Hardening, script, Vec::new()).await
    }

    /// Imports the saved hardening script and marks the router hardened.
    pub async fn apply_hardening(&self, router_id: &str) -> Result<DeploymentReport, ProvisionError> {
        let _guard = self.locks.acquire(router_id, self.settings.lock_wait()).await?;
        let router = self.live_router(router_id).await?;
        let record = self.saved_config(router_id, ConfigType::Hardening).await?;
        let warnings = validate_configuration(&record.content)?;
        let report = self.deploy(&router, &record, DeployMode::Import, warnings).await?;
        if report.success() {
            self.store.advance_stage(router_id, ProvisioningStage::Hardened).await?;
        }
        Ok(report)
    }

    /// Generates and saves the SNMP script; v3 secrets go to the router record
    /// encrypted.
    pub async fn generate_snmp_config(
        &self,
        router_id: &str,
        options: &SnmpOptions,
    ) -> Result<ConfigRecord, ProvisionError> {
        let router = self.live_router(router_id).await?;
        let script = SnmpGenerator.generate(&router.id, options)?;
        let credentials = options.credentials(&self.vault)?;
        let record = self.save_script(&router, ConfigType::Snmp, script, Vec::new()).await?;
        self.store.update_snmp(&router.id, credentials).await?;
        Ok(record)
    }

    pub async fn apply_snmp_config(&self, router_id: &str) -> Result<DeploymentReport, ProvisionError> {
        let _guard = self.locks.acquire(router_id, self.settings.lock_wait()).await?;
        let router = self.live_router(router_id).await?;
        let record = self.saved_config(router_id, ConfigType::Snmp).await?;
        let warnings = validate_configuration(&record.content)?;
        self.deploy(&router, &record, DeployMode::Inline, warnings).await
    }

    /// Grades the router's running configuration from `/export`.
    pub async fn security_audit(&self, router_id: &str) -> Result<SecurityScore, ProvisionError> {
        let router = self.live_router(router_id).await?;
        let mut executor = self.executor(&router)?;
        let result = executor.exec("/export").await;
        executor.disconnect().await;
        let score = security_score(&result?.stdout);
        info!(
            router_id = router_id,
            operation = "security_audit";
            "score {}/{} ({:?})",
            score.score,
            score.max_score,
            score.rating
        );
        Ok(score)
    }

    async fn deploy(
        &self,
        router: &Router,
        record: &ConfigRecord,
        mode: DeployMode,
        warnings: Vec<String>,
    ) -> Result<DeploymentReport, ProvisionError> {
        let commands = commands_from_text(&record.content);
        let mode = match mode {
            DeployMode::Auto if commands.len() <= self.settings.inline_command_limit => DeployMode::Inline,
            DeployMode::Auto => DeployMode::Import,
            explicit => explicit,
        };
        debug!(
            router_id = router.id.as_str(),
            operation = "deploy";
            "{} {} commands via {:?}",
            commands.len(),
            record.config_type.as_str(),
            mode
        );

        let validator = ExpectedObjects::new(record.expected.clone());
        let policy = self.settings.retry_policy();
        let mut executor = self.executor(router)?;
        let outcome = match mode {
            DeployMode::Import => {
                let file = format!("rosprov_{}_{}.rsc", record.config_type.as_str(), router.id);
                executor
                    .deploy_file_with_retry(&file, &record.content, &policy, Some(&validator))
                    .await
            }
            _ => executor.exec_batch_with_retry(&commands, &policy, Some(&validator)).await,
        };
        executor.disconnect().await;

        if outcome.success {
            info!(
                router_id = router.id.as_str(),
                operation = "deploy",
                attempt = outcome.attempt,
                success = true;
                "{} configuration deployed",
                record.config_type.as_str()
            );
        } else {
            error!(
                router_id = router.id.as_str(),
                operation = "deploy",
                attempt = outcome.attempt,
                success = false;
                "{}",
                outcome.message
            );
        }
        Ok(DeploymentReport {
            router_id: router.id.clone(),
            config_type: record.config_type,
            mode,
            warnings,
            outcome,
        })
    }

    async fn save_script(
        &self,
        router: &Router,
        config_type: ConfigType,
        script: Script,
        service_ids: Vec<String>,
    ) -> Result<ConfigRecord, ProvisionError> {
        let content = script.render();
        validate_configuration(&content)?;
        let record = ConfigRecord::new(&router.id, config_type, content, script.created_objects(), service_ids);
        self.store.save_config(record.clone()).await?;
        info!(router_id = router.id.as_str(), operation = "generate", success = true; "{} configuration saved", config_type.as_str());
        Ok(record)
    }

    async fn saved_config(&self, router_id: &str, config_type: ConfigType) -> Result<ConfigRecord, ProvisionError> {
        let record = self.store.load_config(router_id, config_type).await?;
        if !record.is_intact() {
            return Err(ProvisionError::InvalidConfiguration(format!(
                "saved {} script for {router_id} does not match its digest",
                config_type.as_str()
            )));
        }
        Ok(record)
    }

    async fn mark_services(&self, service_ids: &[String], status: DeploymentStatus) {
        for id in service_ids {
            if let Err(e) = self.store.update_service_status(id, status).await {
                warn!(operation = "service_status"; "could not mark service {id} {status:?}: {e}");
            }
        }
    }

    async fn live_router(&self, router_id: &str) -> Result<Router, ProvisionError> {
        let router = self.store.router(router_id).await?;
        if router.is_deleted() {
            return Err(ProvisionError::RouterNotFound(router_id.to_string()));
        }
        Ok(router)
    }

    fn executor(&self, router: &Router) -> Result<SshExecutor<C>, ProvisionError> {
        SshExecutor::new(router, &self.vault, self.connector.clone(), &self.settings)
    }
}

/// The request tenant, falling back to the router's; the two must agree.
fn resolve_tenant(router: &Router, requested: TenantContext) -> Result<TenantContext, ProvisionError> {
    match (&router.tenant_id, &requested.tenant_id) {
        (Some(owner), Some(asked)) if owner != asked => Err(ProvisionError::InvalidConfiguration(format!(
            "router {} does not belong to tenant {asked}",
            router.id
        ))),
        (Some(owner), None) => Ok(TenantContext::new(owner.clone())),
        _ => Ok(requested),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scripts_are_invalid() {
        assert!(matches!(
            validate_configuration("# only a comment\n\n"),
            Err(ProvisionError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn dangerous_commands_warn() {
        let warnings = validate_configuration("/ip pool add name=p ranges=10.0.0.2-10.0.0.9\n/system reboot\n")
            .expect("valid script");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("reboots"));

        let guarded = ":do { /file remove [find where name=\"x.rsc\"] } on-error={}\n";
        assert!(validate_configuration(guarded).expect("valid script").is_empty());
    }

    #[test]
    fn unterminated_strings_are_rejected() {
        assert!(validate_configuration("/system identity set name=\"R1\n").is_err());
        assert!(validate_configuration("/system identity set name=\"R\\\"1\"\n").is_ok());
    }

    #[test]
    fn tenant_must_match_router_owner() {
        let mut router = Router::new("R1", "10.0.0.1", "rosprov");
        router.tenant_id = Some("acme".to_string());
        assert_eq!(
            resolve_tenant(&router, TenantContext::default()).expect("inherit").tenant_id.as_deref(),
            Some("acme")
        );
        assert!(resolve_tenant(&router, TenantContext::new("other")).is_err());
    }

    #[tokio::test]
    async fn second_lock_holder_gets_busy() {
        let locks = RouterLocks::new();
        let held = locks.acquire("R1", Duration::from_millis(10)).await.expect("first");
        assert!(matches!(
            locks.acquire("R1", Duration::from_millis(10)).await,
            Err(ProvisionError::RouterBusy(_))
        ));
        assert!(locks.acquire("R2", Duration::from_millis(10)).await.is_ok());
        drop(held);
        assert!(locks.acquire("R1", Duration::from_millis(10)).await.is_ok());
    }

    #[tokio::test]
    async fn pruning_never_replaces_a_held_lock() {
        let locks = RouterLocks::new();
        let held = locks.acquire("R1", Duration::from_millis(10)).await.expect("R1");
        for i in 0..PRUNE_AT + 10 {
            let guard = locks.acquire(&format!("other-{i}"), Duration::from_millis(10)).await.expect("other");
            drop(guard);
        }
        assert!(locks.len() <= PRUNE_AT);
        assert!(matches!(
            locks.acquire("R1", Duration::from_millis(10)).await,
            Err(ProvisionError::RouterBusy(_))
        ));
        drop(held);
        assert!(locks.acquire("R1", Duration::from_millis(10)).await.is_ok());
    }
}
