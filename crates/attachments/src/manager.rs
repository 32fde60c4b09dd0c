//! Attachment write saga and authorized download

use chrono::{DateTime, Utc};
use medledger_health_crypto::{open, seal, AttachmentKey};
use medledger_shared::{functions, Role};
use records::NewMedicalRecord;
use records_integrity::{parse_record_added_message, wire::base64_encode, MedicalRecord};
use tracing::{debug, error, info, warn};

use crate::gateway::Clock;
use crate::{
    AttachmentConfig, AttachmentError, CallIdentity, KeyEntry, KeyStore, LedgerGateway,
};

/// File encrypted by the submitter, with the key that opens it
#[derive(Clone, Debug)]
pub struct SealedAttachment {
    pub file_name: String,
    pub file_type: String,
    pub ciphertext: Vec<u8>,
    pub key: AttachmentKey,
}

impl SealedAttachment {
    /// Encrypt `plaintext` under a fresh key
    pub fn seal(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        plaintext: &[u8],
    ) -> Result<Self, AttachmentError> {
        let key = AttachmentKey::generate()?;
        let ciphertext = seal(&key, plaintext)?;
        Ok(Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            ciphertext,
            key,
        })
    }
}

/// Outcome of a successful record submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordAdded {
    pub record_id: String,
    pub message: String,
}

/// Decrypted attachment ready for delivery
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadedAttachment {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub file_type: String,
}

impl std::fmt::Debug for DownloadedAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadedAttachment")
            .field("len", &self.bytes.len())
            .field("file_name", &self.file_name)
            .field("file_type", &self.file_type)
            .finish()
    }
}

/// Coordinates attachment keys in the key store with records on the ledger.
///
/// A key is stored under a temporary id before the record is submitted and
/// ends in one of two states: moved to the permanent record id when the
/// ledger accepts the record, or deleted when it does not.
pub struct AttachmentManager<G, K> {
    gateway: G,
    keys: K,
    config: AttachmentConfig,
    clock: Clock,
}

impl<G: LedgerGateway, K: KeyStore> AttachmentManager<G, K> {
    pub fn new(gateway: G, keys: K, config: AttachmentConfig) -> Self {
        Self {
            gateway,
            keys,
            config,
            clock: Box::new(Utc::now),
        }
    }

    /// Clock used to stamp temporary key ids
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }

    /// Temporary key-store id: `{prefix}{millis}_{key fingerprint}`
    pub fn temporary_id(&self, now: DateTime<Utc>, key: &AttachmentKey) -> String {
        format!(
            "{}{}_{}",
            self.config.temp_prefix,
            now.timestamp_millis(),
            key.fingerprint()
        )
    }

    fn is_temporary(&self, id: &str) -> bool {
        id.starts_with(&self.config.temp_prefix)
    }

    /// Creation time (Unix millis) embedded in a temporary id
    fn temporary_created_at(&self, id: &str) -> Option<i64> {
        let rest = id.strip_prefix(&self.config.temp_prefix)?;
        rest.split('_').next()?.parse::<i64>().ok()
    }

    // ==================== WRITE PATH ====================

    /// Submit `record` on behalf of `caller`, attaching `attachment` if any
    pub fn add_medical_record(
        &self,
        caller: &CallIdentity,
        mut record: NewMedicalRecord,
        attachment: Option<SealedAttachment>,
    ) -> Result<RecordAdded, AttachmentError> {
        let Some(attachment) = attachment else {
            let message = self.submit_record(caller, &record)?;
            let record_id = parse_record_added_message(&message)
                .ok_or_else(|| AttachmentError::UnrecognizedResponse(message.clone()))?
                .to_string();
            return Ok(RecordAdded { record_id, message });
        };

        let temp_id = self.temporary_id((self.clock)(), &attachment.key);
        self.keys.put(&temp_id, KeyEntry::from(&attachment.key))?;
        info!(
            temp_id = %temp_id,
            key = %attachment.key.fingerprint(),
            "attachment key stored under temporary id"
        );

        record.ciphertext = attachment.ciphertext;
        record.file_name = attachment.file_name;
        record.file_type = attachment.file_type;

        let message = match self.submit_record(caller, &record) {
            Ok(message) => message,
            Err(err) => {
                self.purge(&temp_id);
                return Err(err);
            }
        };

        let Some(record_id) = parse_record_added_message(&message).map(str::to_string) else {
            warn!(response = %message, "record id not found in ledger response");
            self.purge(&temp_id);
            return Err(AttachmentError::UnrecognizedResponse(message));
        };

        if let Err(err) = self.keys.rekey(&temp_id, &record_id) {
            error!(temp_id = %temp_id, record = %record_id, error = %err, "failed to reconcile attachment key");
            self.purge(&temp_id);
            return Err(err.into());
        }
        info!(temp_id = %temp_id, record = %record_id, "attachment key reconciled");

        Ok(RecordAdded { record_id, message })
    }

    fn submit_record(&self, caller: &CallIdentity, record: &NewMedicalRecord) -> Result<String, AttachmentError> {
        let file_data = if record.ciphertext.is_empty() {
            String::new()
        } else {
            base64_encode(&record.ciphertext)
        };
        let args = vec![
            record.patient_id.clone(),
            record.diagnosis_date.clone(),
            record.diagnosis.clone(),
            record.treatment.clone(),
            record.medications.clone(),
            record.notes.clone(),
            file_data,
            record.file_name.clone(),
            record.file_type.clone(),
        ];
        Ok(self.gateway.submit(caller, functions::ADD_MEDICAL_RECORD, &args)?)
    }

    /// Best-effort removal of a temporary key; a leftover is collected by
    /// `sweep_stale_temporaries`
    fn purge(&self, temp_id: &str) {
        match self.keys.delete(temp_id) {
            Ok(_) => info!(temp_id = %temp_id, "temporary attachment key purged"),
            Err(err) => error!(temp_id = %temp_id, error = %err, "failed to purge temporary attachment key"),
        }
    }

    // ==================== READ PATH ====================

    /// Decrypt the attachment of `record_id` for `caller`.
    ///
    /// Admins, the authoring doctor and the owning patient may download.
    pub fn download(&self, caller: &CallIdentity, record_id: &str) -> Result<DownloadedAttachment, AttachmentError> {
        let json = self
            .gateway
            .evaluate(caller, functions::GET_MEDICAL_RECORD, &[record_id.to_string()])?;
        let record: MedicalRecord =
            serde_json::from_str(&json).map_err(|e| AttachmentError::MalformedRecord(e.to_string()))?;

        if !may_download(caller, &record) {
            warn!(caller = %caller.user_id, record = record_id, "attachment download denied");
            return Err(AttachmentError::Forbidden);
        }

        let attachment = record.attachment().ok_or(AttachmentError::NoAttachment)?;

        let Some(entry) = self.keys.get(record_id)? else {
            error!(record = record_id, "attachment key missing for stored ciphertext");
            return Err(AttachmentError::KeyLoss {
                record_id: record_id.to_string(),
            });
        };

        let key = entry.to_key()?;
        let bytes = open(&key, &attachment.ciphertext)?;
        debug!(record = record_id, key = %key.fingerprint(), len = bytes.len(), "attachment decrypted");

        Ok(DownloadedAttachment {
            bytes,
            file_name: attachment.file_name,
            file_type: attachment.file_type,
        })
    }

    // ==================== RECOVERY ====================

    /// Delete temporary keys older than the configured age. Returns the
    /// deleted ids.
    pub fn sweep_stale_temporaries(&self, now: DateTime<Utc>) -> Result<Vec<String>, AttachmentError> {
        let max_age_ms = i64::try_from(self.config.stale_after_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let now_ms = now.timestamp_millis();
        let mut purged = Vec::new();

        for id in self.keys.record_ids()? {
            if !self.is_temporary(&id) {
                continue;
            }
            let stale = match self.temporary_created_at(&id) {
                Some(created_ms) => now_ms.saturating_sub(created_ms) >= max_age_ms,
                // Unparseable temporary ids are never reconcilable
                None => true,
            };
            if stale && self.keys.delete(&id)? {
                info!(temp_id = %id, "stale temporary attachment key swept");
                purged.push(id);
            }
        }

        Ok(purged)
    }
}

fn may_download(caller: &CallIdentity, record: &MedicalRecord) -> bool {
    caller.role == Role::Admin
        || caller.user_id == record.patient_id
        || (caller.role == Role::Doctor && caller.user_id == record.doctor_id)
}
