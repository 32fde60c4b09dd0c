//! Medical Record Attachments
//!
//! Encrypted files ride inside medical records on the ledger while their
//! keys live in a separate key store. This crate keeps the two consistent:
//! - `KeyStore`: the external key store (in-memory and JSON file backed)
//! - `LedgerGateway`: named-operation access to the ledger
//! - `AttachmentManager`: the write saga, authorized download and recovery

use medledger_health_crypto::CryptoError;
use medledger_shared::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gateway::*;
pub use key_store::*;
pub use manager::*;

/// Ledger client: trait plus in-process implementation
pub mod gateway;

/// Attachment key stores
pub mod key_store;

/// Attachment lifecycle
pub mod manager;

// ==================== ERRORS ====================

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("You are not authorized to download this file")]
    Forbidden,

    #[error("No file attached to this record")]
    NoAttachment,

    /// Ciphertext is on the ledger but its key is gone
    #[error("Encryption key not found for this file (Record ID: {record_id})")]
    KeyLoss { record_id: String },

    #[error(transparent)]
    Ledger(#[from] GatewayError),

    #[error("Unrecognized ledger response: {0}")]
    UnrecognizedResponse(String),

    #[error("Malformed medical record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl AttachmentError {
    /// HTTP status a front-end should answer with
    pub fn status(&self) -> u16 {
        match self {
            AttachmentError::Forbidden => 403,
            AttachmentError::NoAttachment => 404,
            AttachmentError::Ledger(err) => match err.kind() {
                Some(ErrorKind::NotFound) => 404,
                Some(ErrorKind::Unauthorized) => 403,
                Some(ErrorKind::AlreadyExists | ErrorKind::InvalidAssignment | ErrorKind::Validation) => 400,
                _ => 500,
            },
            AttachmentError::KeyLoss { .. }
            | AttachmentError::UnrecognizedResponse(_)
            | AttachmentError::MalformedRecord(_)
            | AttachmentError::KeyStore(_)
            | AttachmentError::Crypto(_) => 500,
        }
    }
}

// ==================== CONFIG ====================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentConfig {
    /// Prefix marking key-store ids not yet reconciled with a record
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    /// Age after which an unreconciled key counts as orphaned
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_temp_prefix() -> String {
    "TEMP_".to_string()
}

fn default_stale_after_secs() -> u64 {
    3600
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            temp_prefix: default_temp_prefix(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}
