//! Protocol Configuration
//!
//! TOML-backed settings for one protocol endpoint:
//!
//! ```toml
//! name = "client"
//! id_kind = "client"
//! scheduler = "single_thread"
//!
//! [wire]
//! max_message_size = 1048576
//! max_pending_per_id = 256
//! ```

use crate::error::{Error, Result};
use codec::IdKind;
use network::{TransportError, WireConfig};
use reactive::{ImmediateScheduler, ManualScheduler, Scheduler, SingleThreadScheduler};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Which scheduler a protocol dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    /// Inline on the calling thread
    Immediate,
    /// Dedicated worker thread
    #[default]
    SingleThread,
    /// Pumped explicitly
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Endpoint name used in logs and thread names
    pub name: String,
    pub id_kind: IdKind,
    pub scheduler: SchedulerKind,
    pub wire: WireConfig,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: "protocol".to_string(),
            id_kind: IdKind::Client,
            scheduler: SchedulerKind::SingleThread,
            wire: WireConfig::default(),
        }
    }
}

impl ProtocolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::configuration(e.to_string(), None))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loading protocol configuration");
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("name must not be empty", Some("name")));
        }
        self.wire.validate().map_err(|e| match e {
            TransportError::Configuration { message, field } => Error::Configuration {
                message,
                field: field.map(|field| format!("wire.{}", field)),
            },
            other => Error::Transport(other),
        })
    }

    /// Construct the configured scheduler
    ///
    /// A manual scheduler built here can only be flushed through the trait;
    /// tests that pump explicitly construct [`ManualScheduler`] themselves.
    pub fn build_scheduler(&self) -> Result<Arc<dyn Scheduler>> {
        Ok(match self.scheduler {
            SchedulerKind::Immediate => Arc::new(ImmediateScheduler::new(self.name.clone())),
            SchedulerKind::SingleThread => {
                let name = format!("{}-scheduler", self.name);
                let scheduler = SingleThreadScheduler::new(name.clone())
                    .map_err(|source| Error::Scheduler { name, source })?;
                Arc::new(scheduler)
            }
            SchedulerKind::Manual => Arc::new(ManualScheduler::new(self.name.clone())),
        })
    }
}
