//! Kernel boot: wires the store, the verifier and the funnel service.

use crate::error::KernelError;
use crate::funnel::FunnelService;
use leadfunnel_memory::{LeadStore, SqliteLeadStore};
use leadfunnel_runtime::drivers::create_verifier;
use leadfunnel_runtime::verifier::PhoneVerifier;
use leadfunnel_types::config::FunnelConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The assembled funnel backend.
pub struct LeadFunnelKernel {
    pub config: FunnelConfig,
    pub store: Arc<dyn LeadStore>,
    pub funnel: Arc<FunnelService>,
}

impl LeadFunnelKernel {
    /// Load config from `config_path` (or the default location) and boot.
    pub fn boot(config_path: Option<&Path>) -> Result<Self, KernelError> {
        let config = FunnelConfig::load(config_path)?;
        Self::boot_with_config(config)
    }

    /// Boot with an explicit config. Opens the database and builds the
    /// configured verifier; any misconfiguration fails here.
    pub fn boot_with_config(config: FunnelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let store = Arc::new(SqliteLeadStore::open(
            &config.store.database_url,
            Duration::from_millis(config.store.busy_timeout_ms),
        )?);
        let verifier = create_verifier(&config.verification)?;
        Ok(Self::assemble(config, store, verifier))
    }

    /// Boot with injected collaborators. Used by tests and embedders.
    pub fn with_parts(
        config: FunnelConfig,
        store: Arc<dyn LeadStore>,
        verifier: Arc<dyn PhoneVerifier>,
    ) -> Self {
        Self::assemble(config, store, verifier)
    }

    fn assemble(
        config: FunnelConfig,
        store: Arc<dyn LeadStore>,
        verifier: Arc<dyn PhoneVerifier>,
    ) -> Self {
        info!(
            provider = verifier.name(),
            database = %config.store.database_url,
            "Lead funnel kernel booted"
        );
        let funnel = Arc::new(FunnelService::from_config(store.clone(), verifier, &config));
        Self {
            config,
            store,
            funnel,
        }
    }
}
