//! Positional-argument entry point used by the runtime

use medledger_shared::{
    functions, ChaincodeError, ChaincodeResult, CredentialContext, IdentityResolver, LedgerStub,
};
use records_integrity::wire::base64_decode;
use serde::Serialize;

use crate::{MedicalManagement, NewDoctor, NewMedicalRecord, NewPatient, ADD_RECORD_DENIED};

/// Positional arguments of one call
struct Args<'a> {
    function: &'a str,
    values: &'a [String],
}

impl<'a> Args<'a> {
    fn required(&self, index: usize, name: &str) -> ChaincodeResult<String> {
        self.values.get(index).cloned().ok_or_else(|| {
            ChaincodeError::Validation(format!(
                "{} expects argument {} ({name})",
                self.function,
                index + 1
            ))
        })
    }

    /// Missing trailing arguments read as empty
    fn optional(&self, index: usize) -> String {
        self.values.get(index).cloned().unwrap_or_default()
    }
}

fn to_json<T: Serialize>(value: &T) -> ChaincodeResult<String> {
    serde_json::to_string(value).map_err(|e| ChaincodeError::Serialization {
        key: "response".to_string(),
        message: e.to_string(),
    })
}

/// Run `ctx.function` with `ctx.args`.
///
/// Transitions return their success message, queries a JSON document.
/// The attachment ciphertext travels as base64 text.
pub fn invoke<S, R>(
    contract: &MedicalManagement<R>,
    stub: &mut S,
    ctx: &CredentialContext,
) -> ChaincodeResult<String>
where
    S: LedgerStub + ?Sized,
    R: IdentityResolver,
{
    let args = Args {
        function: &ctx.function,
        values: &ctx.args,
    };

    match ctx.function.as_str() {
        functions::INIT_LEDGER => contract.init_ledger(stub, ctx),
        functions::CREATE_DOCTOR => {
            let input = NewDoctor {
                id: args.required(0, "doctorId")?,
                name: args.required(1, "name")?,
                specialization: args.required(2, "specialization")?,
                contact: args.required(3, "contact")?,
            };
            contract.create_doctor(stub, ctx, input)
        }
        functions::CREATE_PATIENT => {
            let input = NewPatient {
                id: args.required(0, "patientId")?,
                name: args.required(1, "name")?,
                date_of_birth: args.required(2, "dateOfBirth")?,
                contact: args.required(3, "contact")?,
                address: args.required(4, "address")?,
                doctor_id: args.optional(5),
            };
            contract.create_patient(stub, ctx, input)
        }
        functions::ADD_MEDICAL_RECORD => {
            // Authorization comes before any argument decoding
            contract.guard().require_doctor(stub, ctx, ADD_RECORD_DENIED)?;
            let file_data = args.optional(6);
            let ciphertext = if file_data.is_empty() {
                Vec::new()
            } else {
                base64_decode(&file_data)
                    .map_err(|e| ChaincodeError::Validation(format!("fileData: {e}")))?
            };
            let input = NewMedicalRecord {
                patient_id: args.required(0, "patientId")?,
                diagnosis_date: args.required(1, "diagnosisDate")?,
                diagnosis: args.required(2, "diagnosis")?,
                treatment: args.optional(3),
                medications: args.optional(4),
                notes: args.optional(5),
                ciphertext,
                file_name: args.optional(7),
                file_type: args.optional(8),
            };
            contract.add_medical_record(stub, ctx, input)
        }
        functions::GET_MEDICAL_RECORD => {
            let record_id = args.required(0, "recordId")?;
            to_json(&contract.get_medical_record(stub, &record_id)?)
        }
        functions::GET_PATIENT_MEDICAL_RECORDS => {
            let patient_id = args.required(0, "patientId")?;
            to_json(&contract.get_patient_medical_records(stub, &patient_id)?)
        }
        functions::GET_USER_PROFILE => {
            let user_id = args.required(0, "userId")?;
            to_json(&contract.get_user_profile(stub, &user_id)?)
        }
        functions::LIST_ALL_PATIENTS => to_json(&contract.list_all_patients(stub, ctx)?),
        functions::LIST_ALL_DOCTORS => to_json(&contract.list_all_doctors(stub, ctx)?),
        other => Err(ChaincodeError::Validation(format!("Unknown function {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::cert;
    use medledger_shared::{ErrorKind, MemoryLedger};
    use records_integrity::{wire::base64_encode, MedicalRecord, UserRecord};

    fn run(
        ledger: &mut MemoryLedger,
        contract: &MedicalManagement,
        caller: &str,
        function: &str,
        args: &[&str],
    ) -> ChaincodeResult<String> {
        let ctx = CredentialContext::new(cert(caller), "Org3MSP")
            .invoking(function, args.iter().copied())
            .at_seconds(1_704_067_200);
        ledger.execute(|tx| invoke(contract, tx, &ctx))
    }

    #[test]
    fn test_dispatch_full_flow() {
        let contract = MedicalManagement::default();
        let mut ledger = MemoryLedger::new();

        assert_eq!(
            run(&mut ledger, &contract, "admin", "initLedger", &[]).unwrap(),
            "Ledger initialized successfully"
        );
        assert_eq!(
            run(&mut ledger, &contract, "admin", "createDoctor", &["DOC1", "Dr A", "Cardiology", "555-0100"])
                .unwrap(),
            "Doctor DOC1 has been created successfully"
        );
        assert_eq!(
            run(
                &mut ledger,
                &contract,
                "admin",
                "createPatient",
                &["PAT1", "P One", "1990-01-01", "555-0200", "1 Main St", "DOC1"]
            )
            .unwrap(),
            "Patient PAT1 has been created successfully"
        );

        let file_data = base64_encode(&[1, 2, 3, 4]);
        let message = run(
            &mut ledger,
            &contract,
            "DOC1",
            "addMedicalRecord",
            &["PAT1", "2024-01-01", "flu", "rest", "none", "", file_data.as_str(), "x.png", "image/png"],
        )
        .unwrap();
        assert_eq!(message, "Medical record REC_PAT1_1704067200 added for patient PAT1");

        let json = run(&mut ledger, &contract, "DOC1", "getMedicalRecord", &["REC_PAT1_1704067200"]).unwrap();
        let record: MedicalRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.attachment().unwrap().ciphertext, vec![1, 2, 3, 4]);
        assert_eq!(record.file_type.as_deref(), Some("image/png"));

        let json = run(&mut ledger, &contract, "PAT1", "getPatientMedicalRecords", &["PAT1"]).unwrap();
        let records: Vec<MedicalRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(records.len(), 1);

        let json = run(&mut ledger, &contract, "admin", "listAllDoctors", &[]).unwrap();
        let doctors: Vec<UserRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(doctors[0].id, "DOC1");

        let json = run(&mut ledger, &contract, "DOC1", "getUserProfile", &["PAT1"]).unwrap();
        let profile: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(profile.as_patient().unwrap().medical_record_ids, vec!["REC_PAT1_1704067200"]);
    }

    #[test]
    fn test_missing_trailing_arguments() {
        let contract = MedicalManagement::default();
        let mut ledger = MemoryLedger::new();
        run(&mut ledger, &contract, "admin", "initLedger", &[]).unwrap();

        // doctorId omitted entirely
        run(
            &mut ledger,
            &contract,
            "admin",
            "createPatient",
            &["PAT2", "P Two", "1980-02-02", "c", "a"],
        )
        .unwrap();

        let err = run(&mut ledger, &contract, "admin", "createDoctor", &["DOC2", "Dr B"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("specialization"));
    }

    #[test]
    fn test_invalid_file_data_is_checked_after_authorization() {
        let contract = MedicalManagement::default();
        let mut ledger = MemoryLedger::new();
        let args = ["PAT1", "2024-01-01", "flu", "", "", "", "%%%", "f", ""];

        // No such doctor yet
        let err = run(&mut ledger, &contract, "DOC1", "addMedicalRecord", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.to_string(), "Only doctors can add medical records");

        run(&mut ledger, &contract, "admin", "initLedger", &[]).unwrap();
        run(&mut ledger, &contract, "admin", "createDoctor", &["DOC1", "Dr A", "Cardiology", "555-0100"]).unwrap();
        run(
            &mut ledger,
            &contract,
            "admin",
            "createPatient",
            &["PAT1", "P One", "1990-01-01", "555-0200", "1 Main St", "DOC1"],
        )
        .unwrap();

        let err = run(&mut ledger, &contract, "PAT1", "addMedicalRecord", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = run(&mut ledger, &contract, "DOC1", "addMedicalRecord", &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("fileData"));
    }

    #[test]
    fn test_unknown_function() {
        let contract = MedicalManagement::default();
        let mut ledger = MemoryLedger::new();

        let err = run(&mut ledger, &contract, "admin", "deleteEverything", &[]).unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: Unknown function deleteEverything");
        assert!(ledger.is_empty());
    }
}
