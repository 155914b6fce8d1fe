use std::time::Duration;

use config::{Config, Environment, File};
use groupcomm_net::ScopeId;
use serde::Deserialize;

use crate::errors::{ServiceError, ServiceResult};

pub const DEFAULT_GROUP_NAME: &str = "DefaultPartition";
pub const DEFAULT_METHOD_CALL_TIMEOUT_MS: u64 = 60000;
pub const DEFAULT_STATE_TRANSFER_TIMEOUT_MS: u64 = 60000;
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 100;

/// Settings for one service instance. Every field has a default so partial configuration
/// sources are fine. `worker_threads` of zero means local async work runs inline and state
/// transfers each get their own thread.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub group_name: String,
    pub scope_id: Option<ScopeId>,
    pub method_call_timeout_ms: u64,
    pub state_transfer_timeout_ms: u64,
    pub allow_synchronous_membership_notifications: bool,
    pub max_history_length: usize,
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            group_name: DEFAULT_GROUP_NAME.to_owned(),
            scope_id: None,
            method_call_timeout_ms: DEFAULT_METHOD_CALL_TIMEOUT_MS,
            state_transfer_timeout_ms: DEFAULT_STATE_TRANSFER_TIMEOUT_MS,
            allow_synchronous_membership_notifications: false,
            max_history_length: DEFAULT_MAX_HISTORY_LENGTH,
            worker_threads: 0,
        }
    }
}

impl ServiceConfig {
    /// Merges `Settings`, then `Settings.<environment>`, then `GROUPCOMM_*` environment
    /// variables. Missing files are skipped.
    pub fn load(environment: &str) -> ServiceResult<Self> {
        let config = Config::builder()
            .add_source(File::with_name("Settings").required(false))
            .add_source(File::with_name(&("Settings.".to_owned() + environment)).required(false))
            .add_source(Environment::with_prefix("GROUPCOMM").try_parsing(true))
            .build()
            .map_err(|err| ServiceError::Configuration(format!("{err}")))?;

        config
            .try_deserialize::<ServiceConfig>()
            .map_err(|err| ServiceError::Configuration(format!("{err}")))
    }

    pub fn with_group_name(mut self: Self, group_name: &str) -> Self {
        self.group_name = group_name.to_owned();
        self
    }

    pub fn with_scope_id(mut self: Self, scope_id: ScopeId) -> Self {
        self.scope_id = Some(scope_id);
        self
    }

    pub fn with_method_call_timeout(mut self: Self, timeout: Duration) -> Self {
        self.method_call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_state_transfer_timeout(mut self: Self, timeout: Duration) -> Self {
        self.state_transfer_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_synchronous_notifications(mut self: Self, allow: bool) -> Self {
        self.allow_synchronous_membership_notifications = allow;
        self
    }

    pub fn with_max_history_length(mut self: Self, max_history_length: usize) -> Self {
        self.max_history_length = max_history_length;
        self
    }

    pub fn with_worker_threads(mut self: Self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn method_call_timeout(self: &Self) -> Duration {
        Duration::from_millis(self.method_call_timeout_ms)
    }

    pub fn state_transfer_timeout(self: &Self) -> Duration {
        Duration::from_millis(self.state_transfer_timeout_ms)
    }
}
