//! Medical Management Shared Runtime
//!
//! This crate provides common functionality for every unit deployed into the
//! ledger runtime:
//! - Runtime interfaces (world-state stub, per-call credential context)
//! - Effective caller identity resolution
//! - Admin/doctor access control
//! - Configuration
//! - Error taxonomy surfaced verbatim to callers

use serde::{de::DeserializeOwned, Deserialize, Serialize};

// Re-export commonly used items
pub use access_control::*;
pub use config::*;
pub use context::*;
pub use errors::*;
pub use identity::*;
pub use memory::*;
pub use stub::*;

/// Admin/doctor authorization policy
pub mod access_control;

/// Chaincode configuration with serde defaults
pub mod config;

/// Effective caller identity resolution
pub mod identity;

/// In-memory world state used by tests and the in-process gateway
pub mod memory;

/// Names of the operations exposed to the runtime
pub mod functions {
    pub const INIT_LEDGER: &str = "initLedger";
    pub const CREATE_DOCTOR: &str = "createDoctor";
    pub const CREATE_PATIENT: &str = "createPatient";
    pub const ADD_MEDICAL_RECORD: &str = "addMedicalRecord";
    pub const GET_MEDICAL_RECORD: &str = "getMedicalRecord";
    pub const GET_PATIENT_MEDICAL_RECORDS: &str = "getPatientMedicalRecords";
    pub const GET_USER_PROFILE: &str = "getUserProfile";
    pub const LIST_ALL_PATIENTS: &str = "listAllPatients";
    pub const LIST_ALL_DOCTORS: &str = "listAllDoctors";
}

/// Role claimed by a user id for its whole lifetime
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Doctor,
    Patient,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
            Role::Patient => write!(f, "patient"),
        }
    }
}

/// Error taxonomy for ledger transitions
pub mod errors {
    use thiserror::Error;

    /// Kinds of entity a lookup can miss or a creation can collide with
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum EntityKind {
        User,
        Doctor,
        Patient,
        MedicalRecord,
    }

    impl std::fmt::Display for EntityKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                EntityKind::User => write!(f, "User"),
                EntityKind::Doctor => write!(f, "Doctor"),
                EntityKind::Patient => write!(f, "Patient"),
                EntityKind::MedicalRecord => write!(f, "Medical record"),
            }
        }
    }

    /// Stable error categories for callers that branch on failure type
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum ErrorKind {
        NotFound,
        AlreadyExists,
        Unauthorized,
        InvalidAssignment,
        Validation,
        Serialization,
        Storage,
    }

    /// Failure of a transition or query.
    ///
    /// The `Display` text is what the runtime hands back to its caller, so
    /// messages are written for end users.
    #[derive(Debug, Error, Clone, PartialEq, Eq)]
    pub enum ChaincodeError {
        #[error("{kind} {id} does not exist")]
        NotFound { kind: EntityKind, id: String },

        #[error("{kind} with ID {id} already exists")]
        AlreadyExists { kind: EntityKind, id: String },

        #[error("{0}")]
        Unauthorized(String),

        #[error("{0}")]
        InvalidAssignment(String),

        #[error("Validation failed: {0}")]
        Validation(String),

        #[error("Failed to decode ledger entry {key}: {message}")]
        Serialization { key: String, message: String },

        #[error("World state error: {0}")]
        Storage(String),
    }

    impl ChaincodeError {
        pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
            ChaincodeError::NotFound {
                kind,
                id: id.into(),
            }
        }

        pub fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
            ChaincodeError::AlreadyExists {
                kind,
                id: id.into(),
            }
        }

        pub fn kind(&self) -> ErrorKind {
            match self {
                ChaincodeError::NotFound { .. } => ErrorKind::NotFound,
                ChaincodeError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
                ChaincodeError::Unauthorized(_) => ErrorKind::Unauthorized,
                ChaincodeError::InvalidAssignment(_) => ErrorKind::InvalidAssignment,
                ChaincodeError::Validation(_) => ErrorKind::Validation,
                ChaincodeError::Serialization { .. } => ErrorKind::Serialization,
                ChaincodeError::Storage(_) => ErrorKind::Storage,
            }
        }
    }

    pub type ChaincodeResult<T> = Result<T, ChaincodeError>;
}

/// Per-call credential context supplied by the runtime
pub mod context {
    use chrono::{DateTime, SecondsFormat, Utc};
    use std::collections::BTreeMap;

    /// Caller evidence attached to a single invocation. Never persisted.
    #[derive(Clone, Debug, Default)]
    pub struct CredentialContext {
        /// Structured subject/issuer descriptor of the signing certificate
        pub identity: String,
        /// Organizational affiliation tag (membership service id)
        pub affiliation: String,
        /// Certificate attributes
        pub attributes: BTreeMap<String, String>,
        /// Transient data bag: attached to the call, not recorded on the ledger
        pub transient: BTreeMap<String, Vec<u8>>,
        /// Creator id embedded in the signed proposal, when the runtime exposes one
        pub creator_id: Option<String>,
        /// Invoked function name
        pub function: String,
        /// Positional arguments, function name excluded
        pub args: Vec<String>,
        /// Call timestamp assigned by the runtime
        pub timestamp: DateTime<Utc>,
    }

    impl CredentialContext {
        pub fn new(identity: impl Into<String>, affiliation: impl Into<String>) -> Self {
            Self {
                identity: identity.into(),
                affiliation: affiliation.into(),
                ..Self::default()
            }
        }

        pub fn invoking<I, S>(mut self, function: impl Into<String>, args: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            self.function = function.into();
            self.args = args.into_iter().map(Into::into).collect();
            self
        }

        pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
            self.attributes.insert(name.into(), value.into());
            self
        }

        pub fn with_transient(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
            self.transient.insert(key.into(), value.into());
            self
        }

        pub fn with_creator(mut self, creator_id: impl Into<String>) -> Self {
            self.creator_id = Some(creator_id.into());
            self
        }

        pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
            self.timestamp = timestamp;
            self
        }

        /// Set the call timestamp from whole Unix seconds
        pub fn at_seconds(self, seconds: i64) -> Self {
            let timestamp = DateTime::from_timestamp(seconds, 0).unwrap_or_default();
            self.at(timestamp)
        }

        /// Non-empty UTF-8 transient value
        pub fn transient_str(&self, key: &str) -> Option<&str> {
            self.transient
                .get(key)
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .filter(|value| !value.is_empty())
        }

        /// Non-empty attribute value
        pub fn attribute(&self, name: &str) -> Option<&str> {
            self.attributes
                .get(name)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        }

        /// Non-empty embedded creator id
        pub fn creator(&self) -> Option<&str> {
            self.creator_id.as_deref().filter(|value| !value.is_empty())
        }

        pub fn is_invoking(&self, function: &str) -> bool {
            self.function == function
        }

        /// Call timestamp truncated to whole seconds
        pub fn tx_seconds(&self) -> i64 {
            self.timestamp.timestamp()
        }

        /// Call timestamp as an RFC 3339 string with millisecond precision,
        /// truncated to whole seconds (e.g. `2024-01-01T00:00:00.000Z`)
        pub fn tx_time_iso(&self) -> String {
            DateTime::from_timestamp(self.tx_seconds(), 0)
                .unwrap_or_default()
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    }
}

/// World-state interface consumed from the transaction runtime
pub mod stub {
    use super::*;

    /// Lazily produced `(key, value)` pairs of a range scan
    pub type StateIterator<'a> = Box<dyn Iterator<Item = (String, Vec<u8>)> + 'a>;

    /// Deterministic key-value store of the runtime.
    ///
    /// The runtime invokes transitions one at a time per ledger and makes the
    /// writes of a single call visible all together or not at all. Nothing
    /// here may assume atomicity across calls.
    pub trait LedgerStub {
        /// Read a value; an empty value is reported as absent
        fn get_state(&self, key: &str) -> ChaincodeResult<Option<Vec<u8>>>;

        fn put_state(&mut self, key: &str, value: Vec<u8>) -> ChaincodeResult<()>;

        /// Scan keys in `[start, end)` in lexical order. An empty bound is open.
        fn range_scan(&self, start: &str, end: &str) -> ChaincodeResult<StateIterator<'_>>;
    }

    pub fn state_exists<S: LedgerStub + ?Sized>(stub: &S, key: &str) -> ChaincodeResult<bool> {
        Ok(stub.get_state(key)?.is_some())
    }

    /// Read and decode a JSON document
    pub fn get_json<T, S>(stub: &S, key: &str) -> ChaincodeResult<Option<T>>
    where
        T: DeserializeOwned,
        S: LedgerStub + ?Sized,
    {
        match stub.get_state(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ChaincodeError::Serialization {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Encode and write a JSON document
    pub fn put_json<T, S>(stub: &mut S, key: &str, value: &T) -> ChaincodeResult<()>
    where
        T: Serialize,
        S: LedgerStub + ?Sized,
    {
        let bytes = serde_json::to_vec(value).map_err(|e| ChaincodeError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        stub.put_state(key, bytes)
    }

    /// Role field of the user document stored under `id`, if any
    pub fn lookup_role<S: LedgerStub + ?Sized>(stub: &S, id: &str) -> ChaincodeResult<Option<Role>> {
        #[derive(Deserialize)]
        struct RoleEntry {
            role: Role,
        }

        Ok(get_json::<RoleEntry, S>(stub, id)?.map(|entry| entry.role))
    }
}
