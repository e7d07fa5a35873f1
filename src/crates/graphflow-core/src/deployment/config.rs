//! Deployment configuration: worker pool size, immutable-mode default, and
//! an optional per-task timeout, constructible via a builder or parsed from
//! TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GraphFlowError, Result};

/// Configuration shared by every [`super::Deployment`] implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Number of worker threads for [`super::WorkerPoolDeployment`].
    /// Ignored by [`super::SequentialDeployment`].
    pub worker_count: usize,

    /// Whether graphs run by this deployment default to immutable mode
    /// (completed tasks are never rerun) when not overridden by
    /// [`crate::graph::Graph::new_immutable`].
    pub immutable_default: bool,

    /// Optional wall-clock budget for a single task's `run`. `None` means
    /// no timeout.
    #[serde(with = "humantime_duration", default)]
    pub task_timeout: Option<Duration>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self { worker_count: 4, immutable_default: false, task_timeout: None }
    }
}

impl DeploymentConfig {
    /// Starts a builder seeded with the defaults.
    pub fn builder() -> DeploymentConfigBuilder {
        DeploymentConfigBuilder { config: Self::default() }
    }

    /// Parses a configuration from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| GraphFlowError::Configuration(e.to_string()))
    }
}

/// Builder for [`DeploymentConfig`].
pub struct DeploymentConfigBuilder {
    config: DeploymentConfig,
}

impl DeploymentConfigBuilder {
    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n;
        self
    }

    pub fn immutable_default(mut self, v: bool) -> Self {
        self.config.immutable_default = v;
        self
    }

    pub fn task_timeout(mut self, d: Duration) -> Self {
        self.config.task_timeout = Some(d);
        self
    }

    pub fn build(self) -> DeploymentConfig {
        self.config
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
        let millis: Option<u64> = Option::deserialize(d)?;
        Ok(millis.map(Duration::from_millis))
    }
}
