//! Medical Management Coordinator
//!
//! Guarded transitions and queries over user and medical-record entries.
//! Every transition consults the access guard before touching the world
//! state and checks all of its preconditions before its first write, so a
//! failed call leaves nothing behind even without runtime rollback.
//!
//! Queries are ungated; attachment download authorization lives with the
//! attachment manager.

use std::sync::Arc;

use medledger_shared::{
    functions, get_json, put_json, state_exists, AccessGuard, CertificateIdentityResolver,
    ChaincodeConfig, ChaincodeError, ChaincodeResult, CredentialContext, EntityKind,
    IdentityResolver, LedgerStub, Role,
};
use records_integrity::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

mod dispatch;

pub use dispatch::invoke;

pub(crate) const ADD_RECORD_DENIED: &str = "Only doctors can add medical records";

// ==================== INPUTS ====================

/// Input for creating a doctor
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDoctor {
    pub id: String,
    pub name: String,
    pub specialization: String,
    pub contact: String,
}

/// Input for creating a patient
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub id: String,
    pub name: String,
    pub date_of_birth: String,
    pub contact: String,
    pub address: String,
    /// Empty when no doctor is assigned
    pub doctor_id: String,
}

/// Input for adding a medical record
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedicalRecord {
    pub patient_id: String,
    pub diagnosis_date: String,
    pub diagnosis: String,
    pub treatment: String,
    pub medications: String,
    pub notes: String,
    /// Attachment bytes, already encrypted by the caller
    pub ciphertext: Vec<u8>,
    pub file_name: String,
    pub file_type: String,
}

// ==================== CONTRACT ====================

/// The medical management contract
pub struct MedicalManagement<R: IdentityResolver = CertificateIdentityResolver> {
    config: Arc<ChaincodeConfig>,
    resolver: R,
}

impl MedicalManagement {
    pub fn new(config: Arc<ChaincodeConfig>) -> Self {
        let resolver = CertificateIdentityResolver::new(config.clone());
        Self { config, resolver }
    }
}

impl Default for MedicalManagement {
    fn default() -> Self {
        Self::new(Arc::new(ChaincodeConfig::default()))
    }
}

impl<R: IdentityResolver> MedicalManagement<R> {
    pub fn with_resolver(config: Arc<ChaincodeConfig>, resolver: R) -> Self {
        Self { config, resolver }
    }

    pub fn config(&self) -> &ChaincodeConfig {
        &self.config
    }

    pub fn guard(&self) -> AccessGuard<'_, R> {
        AccessGuard::new(&self.config, &self.resolver)
    }

    // ==================== TRANSITIONS ====================

    /// Create the admin record if it does not exist yet. Safe to repeat.
    pub fn init_ledger<S: LedgerStub + ?Sized>(
        &self,
        stub: &mut S,
        ctx: &CredentialContext,
    ) -> ChaincodeResult<String> {
        info!("initializing ledger");
        self.guard()
            .require_admin(stub, ctx, "Only admin can initialize the ledger")?;

        let admin_id = self.config.superuser_id.as_str();
        if state_exists(stub, admin_id)? {
            debug!(admin = admin_id, "admin already exists, skipping creation");
        } else {
            let admin = UserRecord::admin(admin_id, self.config.superuser_name.as_str(), ctx.tx_time_iso());
            put_json(stub, admin_id, &admin)?;
            info!(admin = admin_id, "admin record created");
        }

        Ok("Ledger initialized successfully".to_string())
    }

    pub fn create_doctor<S: LedgerStub + ?Sized>(
        &self,
        stub: &mut S,
        ctx: &CredentialContext,
        input: NewDoctor,
    ) -> ChaincodeResult<String> {
        info!(doctor = %input.id, "creating doctor");
        self.guard()
            .require_admin(stub, ctx, "Only admin can create doctors")?;
        validate_new_user(&input.id, &input.name).into_result()?;

        if state_exists(stub, &input.id)? {
            return Err(ChaincodeError::already_exists(EntityKind::Doctor, input.id));
        }

        let doctor = UserRecord::doctor(
            input.id.as_str(),
            input.name,
            DoctorProfile {
                specialization: input.specialization,
                contact: input.contact,
            },
            ctx.tx_time_iso(),
        );
        put_json(stub, &input.id, &doctor)?;

        Ok(format!("Doctor {} has been created successfully", input.id))
    }

    pub fn create_patient<S: LedgerStub + ?Sized>(
        &self,
        stub: &mut S,
        ctx: &CredentialContext,
        input: NewPatient,
    ) -> ChaincodeResult<String> {
        info!(patient = %input.id, "creating patient");
        self.guard()
            .require_admin(stub, ctx, "Only admin can create patients")?;
        validate_new_patient(&input.id, &input.name, &input.doctor_id).into_result()?;

        if state_exists(stub, &input.id)? {
            return Err(ChaincodeError::already_exists(EntityKind::Patient, input.id));
        }

        let doctor_id = if input.doctor_id.is_empty() {
            None
        } else {
            let doctor = read_user(stub, &input.doctor_id)?;
            if doctor.map(|d| d.role()) != Some(Role::Doctor) {
                return Err(ChaincodeError::not_found(EntityKind::Doctor, input.doctor_id));
            }
            Some(input.doctor_id)
        };

        let patient = UserRecord::patient(
            input.id.as_str(),
            input.name,
            PatientProfile {
                date_of_birth: input.date_of_birth,
                contact: input.contact,
                address: input.address,
                doctor_id,
                medical_record_ids: Vec::new(),
            },
            ctx.tx_time_iso(),
        );
        put_json(stub, &input.id, &patient)?;

        Ok(format!("Patient {} has been created successfully", input.id))
    }

    /// Add a record authored by the calling doctor to their assigned patient.
    ///
    /// The record id is `REC_{patientId}_{seconds}`; when that key is already
    /// taken the first free `_{n}` suffix (n >= 2) is used instead.
    pub fn add_medical_record<S: LedgerStub + ?Sized>(
        &self,
        stub: &mut S,
        ctx: &CredentialContext,
        input: NewMedicalRecord,
    ) -> ChaincodeResult<String> {
        info!(patient = %input.patient_id, "adding medical record");
        let doctor = self
            .guard()
            .require_doctor(stub, ctx, ADD_RECORD_DENIED)?;
        validate_new_record(&input.patient_id, &input.diagnosis_date, &input.diagnosis)
            .into_result()?;

        let mut patient = read_user(stub, &input.patient_id)?
            .filter(|user| user.role() == Role::Patient)
            .ok_or_else(|| ChaincodeError::not_found(EntityKind::Patient, input.patient_id.as_str()))?;

        let assigned = patient
            .as_patient()
            .and_then(PatientProfile::assigned_doctor)
            .map(str::to_string);
        match assigned {
            None => {
                return Err(ChaincodeError::InvalidAssignment(
                    "This patient doesn't have an assigned doctor. Please contact an administrator."
                        .to_string(),
                ))
            }
            Some(assigned) if assigned != doctor.id => {
                warn!(doctor = %doctor.id, assigned = %assigned, "record author is not the assigned doctor");
                return Err(ChaincodeError::InvalidAssignment(format!(
                    "You are not authorized to add records for this patient. The patient is assigned to doctor {assigned}."
                )));
            }
            Some(_) => {}
        }

        let record_id = self.free_record_id(stub, &input.patient_id, ctx.tx_seconds())?;

        let mut record = MedicalRecord {
            id: record_id.clone(),
            doctor_id: doctor.id,
            patient_id: input.patient_id.clone(),
            diagnosis_date: input.diagnosis_date,
            diagnosis: input.diagnosis,
            treatment: input.treatment,
            medications: input.medications,
            notes: input.notes,
            timestamp: ctx.tx_time_iso(),
            has_file: false,
            file_name: None,
            file_type: None,
            ciphertext: None,
        };
        if !input.ciphertext.is_empty() && !input.file_name.is_empty() {
            let file_type = if input.file_type.is_empty() {
                self.config.default_file_type.clone()
            } else {
                input.file_type
            };
            record.attach(Attachment {
                file_name: input.file_name,
                file_type,
                ciphertext: input.ciphertext,
            });
        }

        if let Some(profile) = patient.as_patient_mut() {
            profile.medical_record_ids.push(record_id.clone());
        }

        put_json(stub, &record_id, &record)?;
        put_json(stub, &input.patient_id, &patient)?;
        info!(record = %record_id, has_file = record.has_file, "medical record added");

        Ok(record_added_message(&record_id, &input.patient_id))
    }

    fn free_record_id<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        patient_id: &str,
        tx_seconds: i64,
    ) -> ChaincodeResult<String> {
        let base = medical_record_id(patient_id, tx_seconds);
        if !state_exists(stub, &base)? {
            return Ok(base);
        }

        let mut attempt = 2;
        loop {
            let candidate = suffixed_record_id(&base, attempt);
            if !state_exists(stub, &candidate)? {
                debug!(record = %candidate, "record id taken within the same second, using suffix");
                return Ok(candidate);
            }
            attempt += 1;
        }
    }

    // ==================== QUERIES ====================

    pub fn get_medical_record<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        record_id: &str,
    ) -> ChaincodeResult<MedicalRecord> {
        read_record(stub, record_id)?
            .ok_or_else(|| ChaincodeError::not_found(EntityKind::MedicalRecord, record_id))
    }

    /// Records of a patient in creation order; ids that no longer resolve
    /// are skipped
    pub fn get_patient_medical_records<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        patient_id: &str,
    ) -> ChaincodeResult<Vec<MedicalRecord>> {
        let patient = read_user(stub, patient_id)?
            .ok_or_else(|| ChaincodeError::not_found(EntityKind::Patient, patient_id))?;
        let Some(profile) = patient.as_patient() else {
            return Err(ChaincodeError::not_found(EntityKind::Patient, patient_id));
        };

        let mut records = Vec::with_capacity(profile.medical_record_ids.len());
        for record_id in &profile.medical_record_ids {
            match read_record(stub, record_id)? {
                Some(record) => records.push(record),
                None => warn!(patient = patient_id, record = %record_id, "listed record does not resolve"),
            }
        }
        Ok(records)
    }

    pub fn get_user_profile<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        user_id: &str,
    ) -> ChaincodeResult<UserRecord> {
        read_user(stub, user_id)?.ok_or_else(|| ChaincodeError::not_found(EntityKind::User, user_id))
    }

    /// Admins see every patient, doctors their assigned patients, anyone
    /// else nothing
    pub fn list_all_patients<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
    ) -> ChaincodeResult<Vec<UserRecord>> {
        let guard = self.guard();
        let patients = scan_users(stub, Role::Patient)?;

        if guard.is_admin(stub, ctx) {
            return Ok(patients);
        }

        let caller = guard.caller(ctx);
        match guard.is_doctor(stub, ctx) {
            Ok(true) => Ok(patients
                .into_iter()
                .filter(|patient| {
                    patient
                        .as_patient()
                        .and_then(PatientProfile::assigned_doctor)
                        == Some(caller.id.as_str())
                })
                .collect()),
            Ok(false) => Ok(Vec::new()),
            Err(err) => {
                debug!(caller = %caller.id, error = %err, "caller cannot list patients");
                Ok(Vec::new())
            }
        }
    }

    /// Admin-gated, except that a recognized peer affiliation may always
    /// call this one operation
    pub fn list_all_doctors<S: LedgerStub + ?Sized>(
        &self,
        stub: &S,
        ctx: &CredentialContext,
    ) -> ChaincodeResult<Vec<UserRecord>> {
        let peer_call = self.config.is_bootstrap_affiliation(&ctx.affiliation)
            && ctx.is_invoking(functions::LIST_ALL_DOCTORS);
        if !peer_call {
            self.guard()
                .require_admin(stub, ctx, "Only admin can list all doctors")?;
        }
        scan_users(stub, Role::Doctor)
    }
}

/// Users of `role` across the whole key space. Entries that are not user
/// documents are skipped; malformed user documents are skipped with a warning.
fn scan_users<S: LedgerStub + ?Sized>(stub: &S, role: Role) -> ChaincodeResult<Vec<UserRecord>> {
    let mut users = Vec::new();

    for (key, bytes) in stub.range_scan("", "")? {
        let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            debug!(key = %key, "skipping non-JSON entry");
            continue;
        };
        if !is_user_document(&doc) {
            continue;
        }
        if doc.get("role").and_then(|v| v.as_str()) != Some(role.to_string().as_str()) {
            continue;
        }
        match serde_json::from_value::<UserRecord>(doc) {
            Ok(user) => users.push(user),
            Err(err) => warn!(key = %key, error = %err, "skipping malformed user entry"),
        }
    }

    Ok(users)
}

/// User entry stored under `id`. A key holding any other kind of entry
/// reads as absent.
fn read_user<S: LedgerStub + ?Sized>(stub: &S, id: &str) -> ChaincodeResult<Option<UserRecord>> {
    read_entry(stub, id, is_user_document)
}

/// Medical record stored under `id`. A key holding any other kind of entry
/// reads as absent.
fn read_record<S: LedgerStub + ?Sized>(stub: &S, id: &str) -> ChaincodeResult<Option<MedicalRecord>> {
    read_entry(stub, id, is_record_document)
}

fn read_entry<T, S>(stub: &S, key: &str, is_kind: fn(&serde_json::Value) -> bool) -> ChaincodeResult<Option<T>>
where
    T: serde::de::DeserializeOwned,
    S: LedgerStub + ?Sized,
{
    let Some(doc) = get_json::<serde_json::Value, S>(stub, key)? else {
        return Ok(None);
    };
    if !is_kind(&doc) {
        debug!(key = %key, "entry is of another kind");
        return Ok(None);
    }
    serde_json::from_value(doc)
        .map(Some)
        .map_err(|e| ChaincodeError::Serialization {
            key: key.to_string(),
            message: e.to_string(),
        })
}
