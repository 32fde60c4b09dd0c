//! Medical Management Integrity
//!
//! Entry types persisted in the world state, record-id generation, the
//! success-message format of record creation, and pure entry validation.
//! Nothing in this crate touches the runtime.

use medledger_shared::Role;
use serde::{Deserialize, Serialize};

pub mod validation;
pub mod wire;

pub use validation::*;

/// Prefix of every medical record id
pub const RECORD_ID_PREFIX: &str = "REC_";

/// Document discriminator for user entries
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    User,
}

/// User entry. Ids form one flat namespace shared by every role, and an id
/// keeps its role for its whole lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub doc_type: DocType,
    pub id: String,
    pub name: String,
    pub created_at: String,
    #[serde(flatten)]
    pub profile: UserProfile,
}

/// Role-specific part of a user entry, tagged by `role`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum UserProfile {
    Admin,
    Doctor(DoctorProfile),
    Patient(PatientProfile),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DoctorProfile {
    pub specialization: String,
    pub contact: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub date_of_birth: String,
    pub contact: String,
    pub address: String,
    /// Assigned doctor; set at creation only
    #[serde(default)]
    pub doctor_id: Option<String>,
    /// Ids of this patient's medical records in creation order. Append-only.
    #[serde(default, rename = "medicalRecords")]
    pub medical_record_ids: Vec<String>,
}

impl PatientProfile {
    /// Assigned doctor id, treating an empty string as unassigned
    pub fn assigned_doctor(&self) -> Option<&str> {
        self.doctor_id.as_deref().filter(|id| !id.is_empty())
    }
}

impl UserRecord {
    pub fn admin(id: impl Into<String>, name: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            doc_type: DocType::User,
            id: id.into(),
            name: name.into(),
            created_at: created_at.into(),
            profile: UserProfile::Admin,
        }
    }

    pub fn doctor(
        id: impl Into<String>,
        name: impl Into<String>,
        profile: DoctorProfile,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            doc_type: DocType::User,
            id: id.into(),
            name: name.into(),
            created_at: created_at.into(),
            profile: UserProfile::Doctor(profile),
        }
    }

    pub fn patient(
        id: impl Into<String>,
        name: impl Into<String>,
        profile: PatientProfile,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            doc_type: DocType::User,
            id: id.into(),
            name: name.into(),
            created_at: created_at.into(),
            profile: UserProfile::Patient(profile),
        }
    }

    pub fn role(&self) -> Role {
        match self.profile {
            UserProfile::Admin => Role::Admin,
            UserProfile::Doctor(_) => Role::Doctor,
            UserProfile::Patient(_) => Role::Patient,
        }
    }

    pub fn as_patient(&self) -> Option<&PatientProfile> {
        match &self.profile {
            UserProfile::Patient(patient) => Some(patient),
            _ => None,
        }
    }

    pub fn as_patient_mut(&mut self) -> Option<&mut PatientProfile> {
        match &mut self.profile {
            UserProfile::Patient(patient) => Some(patient),
            _ => None,
        }
    }
}

/// Medical record entry. Immutable once written.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: String,
    pub doctor_id: String,
    pub patient_id: String,
    pub diagnosis_date: String,
    pub diagnosis: String,
    pub treatment: String,
    pub medications: String,
    pub notes: String,
    pub timestamp: String,
    #[serde(default)]
    pub has_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Attachment bytes as encrypted by the submitter
    #[serde(
        default,
        rename = "fileData",
        with = "wire::base64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub ciphertext: Option<Vec<u8>>,
}

/// Encrypted attachment carried by a medical record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub file_type: String,
    pub ciphertext: Vec<u8>,
}

impl MedicalRecord {
    /// Attachment, if the record carries one with ciphertext present
    pub fn attachment(&self) -> Option<Attachment> {
        if !self.has_file {
            return None;
        }
        let ciphertext = self.ciphertext.as_ref().filter(|c| !c.is_empty())?;
        Some(Attachment {
            file_name: self.file_name.clone().unwrap_or_default(),
            file_type: self.file_type.clone().unwrap_or_default(),
            ciphertext: ciphertext.clone(),
        })
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.has_file = true;
        self.file_name = Some(attachment.file_name);
        self.file_type = Some(attachment.file_type);
        self.ciphertext = Some(attachment.ciphertext);
    }
}

/// Whether a decoded world-state document is a user entry
pub fn is_user_document(doc: &serde_json::Value) -> bool {
    doc.get("docType").and_then(|v| v.as_str()) == Some("user")
}

/// Whether a decoded world-state document is a medical record entry.
/// Records carry no `docType`; they are told apart by their patient id.
pub fn is_record_document(doc: &serde_json::Value) -> bool {
    doc.get("docType").is_none() && doc.get("patientId").and_then(|v| v.as_str()).is_some()
}

/// Base id of a record created for `patient_id` at `tx_seconds`
pub fn medical_record_id(patient_id: &str, tx_seconds: i64) -> String {
    format!("{RECORD_ID_PREFIX}{patient_id}_{tx_seconds}")
}

/// Id to use when `base` is already taken; `attempt` starts at 2
pub fn suffixed_record_id(base: &str, attempt: u32) -> String {
    format!("{base}_{attempt}")
}

/// Success message of record creation
pub fn record_added_message(record_id: &str, patient_id: &str) -> String {
    format!("Medical record {record_id} added for patient {patient_id}")
}

/// Record id out of a record-creation success message
pub fn parse_record_added_message(message: &str) -> Option<&str> {
    let rest = message.trim().strip_prefix("Medical record ")?;
    let (record_id, tail) = rest.split_once(char::is_whitespace)?;
    if !record_id.starts_with(RECORD_ID_PREFIX) || !tail.starts_with("added") {
        return None;
    }
    Some(record_id)
}
