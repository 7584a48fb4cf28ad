//! Supervisor registry
//!
//! Process-wide table of tenant id → runner handle. This is the only shared
//! mutable structure in the bridge; it lives behind an async `RwLock` and
//! supports concurrent add/stop/status/list calls from the control-plane.
//! Everything tenant-internal stays inside the runner tasks.
//!
//! `add` is intentionally synchronous from the caller's point of view: it
//! blocks for a bounded startup window until the runner reports running,
//! then verifies the backend accepts the tenant's credential before letting
//! the runner live on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::BridgeError;
use crate::forward::BackendClient;
use crate::runner::RunnerHandle;
use crate::tenant::{RunnerStatus, Subscription, TenantConfig};

/// Bound on waiting for a freshly spawned runner to report running.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Supervisor owning every tenant's client runner.
///
/// Created once at process start; `shutdown` drains it at process exit.
pub struct Supervisor {
    runners: RwLock<HashMap<i64, Arc<RunnerHandle>>>,
    backend: BackendClient,
}

impl Supervisor {
    /// Creates an empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            runners: RwLock::new(HashMap::new()),
            backend: BackendClient::new(),
        }
    }

    /// Registers a tenant and starts its client runner.
    ///
    /// Blocks for a bounded interval until the runner loop reports running,
    /// then probes the backend with the tenant's credential. On probe
    /// failure the runner is stopped and deregistered again, and the
    /// returned status reports `running: false`.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidArgument`] for a malformed backend URL.
    /// - [`BridgeError::DuplicateTenant`] when a runner for the tenant id
    ///   already exists; the existing runner is left untouched.
    pub async fn add(&self, config: TenantConfig) -> Result<RunnerStatus, BridgeError> {
        config.validate()?;
        let tenant_id = config.tenant_id;

        let handle = {
            let mut runners = self.runners.write().await;
            if runners.contains_key(&tenant_id) {
                return Err(BridgeError::DuplicateTenant(tenant_id));
            }
            let handle = RunnerHandle::spawn(config.clone());
            runners.insert(tenant_id, Arc::clone(&handle));
            handle
        };
        info!(tenant = tenant_id, "client runner registered");

        if !handle.wait_running(STARTUP_TIMEOUT).await {
            warn!(
                tenant = tenant_id,
                "runner did not report running within startup window"
            );
        }

        if !self
            .backend
            .check(&config.backend_url, &config.backend_token)
            .await
        {
            warn!(
                tenant = tenant_id,
                "backend connectivity check failed, stopping runner"
            );
            handle.stop().await;
            self.runners.write().await.remove(&tenant_id);
        }

        Ok(handle.status())
    }

    /// Stops a tenant's runner, waits for its task to exit, and removes it
    /// from the table.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TenantNotFound`] if no runner exists.
    pub async fn stop(&self, tenant_id: i64) -> Result<RunnerStatus, BridgeError> {
        let handle = self
            .runners
            .write()
            .await
            .remove(&tenant_id)
            .ok_or(BridgeError::TenantNotFound(tenant_id))?;
        info!(tenant = tenant_id, "stopping client runner");
        handle.stop().await;
        Ok(handle.status())
    }

    /// Status snapshot of a tenant's runner.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TenantNotFound`] if no runner exists.
    pub async fn status(&self, tenant_id: i64) -> Result<RunnerStatus, BridgeError> {
        let runners = self.runners.read().await;
        let handle = runners
            .get(&tenant_id)
            .ok_or(BridgeError::TenantNotFound(tenant_id))?;
        Ok(handle.status())
    }

    /// Configurations of all registered tenants, secrets redacted,
    /// ordered by tenant id.
    pub async fn list(&self) -> Vec<TenantConfig> {
        let runners = self.runners.read().await;
        let mut configs: Vec<TenantConfig> = runners
            .values()
            .map(|handle| handle.config().redacted())
            .collect();
        configs.sort_by_key(|config| config.tenant_id);
        configs
    }

    /// Adds a subscription to a tenant's connection.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TenantNotFound`] when the tenant has no runner; no
    ///   broker interaction happens in that case.
    /// - [`BridgeError::BrokerRejected`] when the subscribe is refused.
    pub async fn add_subscription(
        &self,
        tenant_id: i64,
        subscription: Subscription,
    ) -> Result<Subscription, BridgeError> {
        let handle = self.handle(tenant_id).await?;
        handle.add_subscription(subscription).await
    }

    /// Removes a subscription from a tenant's connection.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TenantNotFound`] or
    /// [`BridgeError::SubscriptionNotFound`].
    pub async fn remove_subscription(
        &self,
        tenant_id: i64,
        subscription_id: i64,
    ) -> Result<(), BridgeError> {
        let handle = self.handle(tenant_id).await?;
        handle.remove_subscription(subscription_id).await
    }

    /// All subscriptions across all tenants, ordered by id. Best-effort: a
    /// runner that does not answer in time is skipped with a warning.
    pub async fn list_subscriptions(&self) -> Vec<Subscription> {
        let handles: Vec<Arc<RunnerHandle>> =
            self.runners.read().await.values().cloned().collect();
        let mut subscriptions = Vec::new();
        for handle in handles {
            match handle.subscriptions().await {
                Ok(subs) => subscriptions.extend(subs),
                Err(err) => warn!(
                    tenant = handle.config().tenant_id,
                    error = %err,
                    "skipping tenant in subscription listing"
                ),
            }
        }
        subscriptions.sort_by_key(|sub| sub.id);
        subscriptions
    }

    /// Looks a subscription up by id across all tenants.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SubscriptionNotFound`] when no tenant has it.
    pub async fn subscription_status(
        &self,
        subscription_id: i64,
    ) -> Result<Subscription, BridgeError> {
        let handles: Vec<Arc<RunnerHandle>> =
            self.runners.read().await.values().cloned().collect();
        for handle in handles {
            if let Ok(subs) = handle.subscriptions().await {
                if let Some(sub) = subs.into_iter().find(|sub| sub.id == subscription_id) {
                    return Ok(sub);
                }
            }
        }
        Err(BridgeError::SubscriptionNotFound(subscription_id))
    }

    /// Stops every runner. Called on process shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<(i64, Arc<RunnerHandle>)> =
            self.runners.write().await.drain().collect();
        for (tenant_id, handle) in handles {
            info!(tenant = tenant_id, "stopping client runner for shutdown");
            handle.stop().await;
        }
    }

    async fn handle(&self, tenant_id: i64) -> Result<Arc<RunnerHandle>, BridgeError> {
        self.runners
            .read()
            .await
            .get(&tenant_id)
            .cloned()
            .ok_or(BridgeError::TenantNotFound(tenant_id))
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
