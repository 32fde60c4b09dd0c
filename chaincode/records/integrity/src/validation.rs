//! Entry validation run before any write.
//!
//! Validators accumulate every problem they find so a caller sees all of
//! them in one error message.

use medledger_shared::{ChaincodeError, ChaincodeResult};
use serde::{Deserialize, Serialize};

/// Validation error with detailed context
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: ValidationErrorCode,
}

/// Specific validation error codes for programmatic handling
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ValidationErrorCode {
    Required,
    InvalidCharacters,
    TooLong,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result that can accumulate multiple errors
#[derive(Clone, Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add_error(&mut self, field: &str, message: &str, code: ValidationErrorCode) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
            code,
        });
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> ChaincodeResult<()> {
        if self.is_valid() {
            return Ok(());
        }
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        Err(ChaincodeError::Validation(messages.join("; ")))
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
    }
}

/// Longest id accepted for users and records
pub const MAX_ID_LEN: usize = 128;

/// Ids are ledger keys: non-empty, bounded, no whitespace or control characters
pub fn validate_id(field: &str, id: &str) -> ValidationResult {
    let mut result = ValidationResult::new();

    if id.is_empty() {
        result.add_error(field, "is required", ValidationErrorCode::Required);
        return result;
    }

    if id.len() > MAX_ID_LEN {
        result.add_error(field, "is too long", ValidationErrorCode::TooLong);
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        result.add_error(
            field,
            "must not contain whitespace or control characters",
            ValidationErrorCode::InvalidCharacters,
        );
    }

    result
}

pub fn validate_required(field: &str, value: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    if value.trim().is_empty() {
        result.add_error(field, "is required", ValidationErrorCode::Required);
    }
    result
}

pub fn validate_new_user(id: &str, name: &str) -> ValidationResult {
    let mut result = validate_id("id", id);
    result.merge(validate_required("name", name));
    result
}

/// `doctor_id` may be empty (no doctor assigned)
pub fn validate_new_patient(id: &str, name: &str, doctor_id: &str) -> ValidationResult {
    let mut result = validate_new_user(id, name);
    if !doctor_id.is_empty() {
        result.merge(validate_id("doctorId", doctor_id));
    }
    result
}

pub fn validate_new_record(patient_id: &str, diagnosis_date: &str, diagnosis: &str) -> ValidationResult {
    let mut result = validate_id("patientId", patient_id);
    result.merge(validate_required("diagnosisDate", diagnosis_date));
    result.merge(validate_required("diagnosis", diagnosis));
    result
}
