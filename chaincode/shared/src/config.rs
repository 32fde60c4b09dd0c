use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::functions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Deployment-specific identity and bootstrap settings.
///
/// Every field has a default matching the reference network, so an empty
/// JSON object is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChaincodeConfig {
    /// Literal id treated as the superuser and used for the bootstrap admin record
    #[serde(default = "default_superuser_id")]
    pub superuser_id: String,
    #[serde(default = "default_superuser_name")]
    pub superuser_name: String,
    /// Affiliations whose peer-admin identities may run bootstrap operations
    #[serde(default = "default_bootstrap_affiliations")]
    pub bootstrap_affiliations: Vec<String>,
    /// Operations those affiliations may run without an identity check
    #[serde(default = "default_bootstrap_functions")]
    pub bootstrap_functions: Vec<String>,
    /// Substrings marking a certificate issued to the shared front-end identity
    #[serde(default = "default_shared_identity_markers")]
    pub shared_identity_markers: Vec<String>,
    #[serde(default = "default_common_name_marker")]
    pub common_name_marker: String,
    #[serde(default = "default_common_name_delimiter")]
    pub common_name_delimiter: char,
    /// Transient key carrying the impersonated end-user id
    #[serde(default = "default_transient_user_key")]
    pub transient_user_key: String,
    /// Certificate attribute carrying an explicit user id
    #[serde(default = "default_identity_attribute")]
    pub identity_attribute: String,
    /// MIME type recorded for attachments submitted without one
    #[serde(default = "default_file_type")]
    pub default_file_type: String,
}

fn default_superuser_id() -> String {
    "admin".to_string()
}

fn default_superuser_name() -> String {
    "System Administrator".to_string()
}

fn default_bootstrap_affiliations() -> Vec<String> {
    vec!["Org1MSP".to_string(), "Org2MSP".to_string()]
}

fn default_bootstrap_functions() -> Vec<String> {
    vec![
        functions::INIT_LEDGER.to_string(),
        functions::CREATE_DOCTOR.to_string(),
    ]
}

fn default_shared_identity_markers() -> Vec<String> {
    vec!["user1".to_string(), "admin".to_string()]
}

fn default_common_name_marker() -> String {
    "CN=".to_string()
}

fn default_common_name_delimiter() -> char {
    ':'
}

fn default_transient_user_key() -> String {
    "userId".to_string()
}

fn default_identity_attribute() -> String {
    "id".to_string()
}

fn default_file_type() -> String {
    "application/octet-stream".to_string()
}

impl Default for ChaincodeConfig {
    fn default() -> Self {
        Self {
            superuser_id: default_superuser_id(),
            superuser_name: default_superuser_name(),
            bootstrap_affiliations: default_bootstrap_affiliations(),
            bootstrap_functions: default_bootstrap_functions(),
            shared_identity_markers: default_shared_identity_markers(),
            common_name_marker: default_common_name_marker(),
            common_name_delimiter: default_common_name_delimiter(),
            transient_user_key: default_transient_user_key(),
            identity_attribute: default_identity_attribute(),
            default_file_type: default_file_type(),
        }
    }
}

impl ChaincodeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn is_bootstrap_affiliation(&self, affiliation: &str) -> bool {
        self.bootstrap_affiliations.iter().any(|a| a == affiliation)
    }

    pub fn is_bootstrap_function(&self, function: &str) -> bool {
        self.bootstrap_functions.iter().any(|f| f == function)
    }
}
