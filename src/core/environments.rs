//! Per-tenant environment registry.
//!
//! Each tenant owns the four environments of the ladder. They are
//! provisioned lazily the first time any operation touches the tenant.
//! A locked environment rejects every variable mutation until unlocked.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{EnvVariable, EnvironmentConfig, EnvironmentId, VariableInput};
use crate::storage::{document_key, Collection, Store};

/// Registry of environment configurations and variables
pub struct EnvironmentRegistry {
    store: Arc<Store>,
    write_lock: Mutex<()>,
}

fn env_key(tenant_id: &str, env: EnvironmentId) -> String {
    document_key(&[tenant_id, env.as_str()])
}

impl EnvironmentRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Provision any missing environments for `tenant_id` and return all four
    pub fn ensure_environments(&self, tenant_id: &str) -> Vec<EnvironmentConfig> {
        let _guard = self.write_lock.lock();
        self.ensure_locked(tenant_id)
    }

    fn ensure_locked(&self, tenant_id: &str) -> Vec<EnvironmentConfig> {
        EnvironmentId::ALL
            .iter()
            .map(|&env| {
                let key = env_key(tenant_id, env);
                match self
                    .store
                    .get::<EnvironmentConfig>(Collection::Environments, &key)
                    .filter(|config| config.tenant_id == tenant_id && config.environment == env)
                {
                    Some(config) => config,
                    None => {
                        let config = EnvironmentConfig::provision(tenant_id, env);
                        self.store.put(Collection::Environments, &key, &config);
                        debug!(tenant = tenant_id, env = %env, "Provisioned environment");
                        config
                    }
                }
            })
            .collect()
    }

    /// Load one environment, provisioning the tenant if needed
    fn load(&self, tenant_id: &str, env: EnvironmentId) -> EnvironmentConfig {
        self.ensure_locked(tenant_id)
            .into_iter()
            .find(|config| config.environment == env)
            .unwrap_or_else(|| EnvironmentConfig::provision(tenant_id, env))
    }

    fn save(&self, config: &EnvironmentConfig) {
        self.store.put(
            Collection::Environments,
            &env_key(&config.tenant_id, config.environment),
            config,
        );
    }

    /// One environment with secret values masked
    pub fn get_environment(&self, tenant_id: &str, env: EnvironmentId) -> EnvironmentConfig {
        let _guard = self.write_lock.lock();
        self.load(tenant_id, env).redacted()
    }

    /// All four environments in ladder order, secrets masked
    pub fn list_environments(&self, tenant_id: &str) -> Vec<EnvironmentConfig> {
        self.ensure_environments(tenant_id)
            .iter()
            .map(EnvironmentConfig::redacted)
            .collect()
    }

    /// Change the label and/or description of an environment
    pub fn update_environment(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        label: Option<String>,
        description: Option<String>,
    ) -> EnvironmentConfig {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        if let Some(label) = label {
            config.label = label;
        }
        if let Some(description) = description {
            config.description = description;
        }
        config.updated_at = Utc::now();
        self.save(&config);

        config.redacted()
    }

    /// Create or replace a variable; `None` when the environment is locked
    #[allow(clippy::too_many_arguments)]
    pub fn set_variable(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        key: &str,
        value: &str,
        is_secret: bool,
        description: Option<String>,
        updated_by: &str,
    ) -> Option<EnvVariable> {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        if config.is_locked {
            warn!(tenant = tenant_id, env = %env, key, "Variable change rejected: environment locked");
            return None;
        }

        let now = Utc::now();
        let variable = EnvVariable {
            value: value.to_string(),
            is_secret,
            description,
            updated_by: updated_by.to_string(),
            updated_at: now,
        };
        config.variables.insert(key.to_string(), variable.clone());
        config.updated_at = now;
        self.save(&config);

        info!(tenant = tenant_id, env = %env, key, secret = is_secret, "Variable set");
        Some(variable)
    }

    /// Remove a variable; `false` when locked or missing
    pub fn delete_variable(&self, tenant_id: &str, env: EnvironmentId, key: &str) -> bool {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        if config.is_locked {
            warn!(tenant = tenant_id, env = %env, key, "Variable delete rejected: environment locked");
            return false;
        }
        if config.variables.remove(key).is_none() {
            return false;
        }

        config.updated_at = Utc::now();
        self.save(&config);
        info!(tenant = tenant_id, env = %env, key, "Variable deleted");
        true
    }

    /// Set several variables at once.
    ///
    /// Either every variable is written or none is; returns the number
    /// written, or `None` when the environment is locked.
    pub fn bulk_set_variables(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        variables: Vec<VariableInput>,
        updated_by: &str,
    ) -> Option<usize> {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        if config.is_locked {
            warn!(tenant = tenant_id, env = %env, "Bulk variable change rejected: environment locked");
            return None;
        }

        let now = Utc::now();
        let count = variables.len();
        for input in variables {
            config.variables.insert(
                input.key,
                EnvVariable {
                    value: input.value,
                    is_secret: input.is_secret,
                    description: input.description,
                    updated_by: updated_by.to_string(),
                    updated_at: now,
                },
            );
        }
        config.updated_at = now;
        self.save(&config);

        info!(tenant = tenant_id, env = %env, count, "Variables set");
        Some(count)
    }

    /// Variables of an environment; secret values are masked unless `include_secrets`
    pub fn get_variables(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        include_secrets: bool,
    ) -> BTreeMap<String, EnvVariable> {
        let _guard = self.write_lock.lock();
        let config = self.load(tenant_id, env);

        if include_secrets {
            config.variables
        } else {
            config.redacted().variables
        }
    }

    /// Lock an environment (re-locking re-stamps locker and time)
    pub fn lock_environment(&self, tenant_id: &str, env: EnvironmentId, locked_by: &str) -> EnvironmentConfig {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        let now = Utc::now();
        config.is_locked = true;
        config.locked_by = Some(locked_by.to_string());
        config.locked_at = Some(now);
        config.updated_at = now;
        self.save(&config);

        info!(tenant = tenant_id, env = %env, locked_by, "Environment locked");
        config.redacted()
    }

    pub fn unlock_environment(&self, tenant_id: &str, env: EnvironmentId) -> EnvironmentConfig {
        let _guard = self.write_lock.lock();
        let mut config = self.load(tenant_id, env);

        config.is_locked = false;
        config.locked_by = None;
        config.locked_at = None;
        config.updated_at = Utc::now();
        self.save(&config);

        info!(tenant = tenant_id, env = %env, "Environment unlocked");
        config.redacted()
    }
}
