//! Plugin configuration.
//!
//! The hosting runtime hands the gate a small config block with a single
//! required key, `modSecurityUrl`. It arrives as JSON or YAML depending on
//! how the runtime is configured.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Configuration for one gate instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    /// Base URL of the oracle, e.g. `http://modsecurity:8080`.
    ///
    /// The inbound request target is appended to it verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mod_security_url: String,
}

impl GateConfig {
    /// Config pointing at the given oracle base URL.
    pub fn new(mod_security_url: impl Into<String>) -> Self {
        Self {
            mod_security_url: mod_security_url.into(),
        }
    }

    /// Parse a JSON plugin block.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| GateError::Config(format!("invalid config: {e}")))
    }

    /// Parse a YAML plugin block.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yml::from_str(raw).map_err(|e| GateError::Config(format!("invalid config: {e}")))
    }

    /// Check the construction-time invariants.
    ///
    /// # Errors
    ///
    /// Returns `GateError::Config` when `modSecurityUrl` is empty.
    pub fn validate(&self) -> Result<()> {
        if self.mod_security_url.is_empty() {
            return Err(GateError::Config("modSecurityUrl cannot be empty".into()));
        }
        Ok(())
    }
}
