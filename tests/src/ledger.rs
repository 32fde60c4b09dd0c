//! Ledger Transition Tests
//!
//! Scenario tests of the state machine through its positional entry point:
//! - Doctor, patient and record creation end to end
//! - Failed transitions leave the world state untouched
//! - Same-second record ids stay unique

#[cfg(test)]
mod tests {
    use crate::{call, TX_SECONDS};
    use medledger_shared::{functions, ChaincodeResult, ErrorKind, MemoryLedger};
    use records::{invoke, MedicalManagement};
    use records_integrity::{MedicalRecord, UserRecord};

    struct Clinic {
        ledger: MemoryLedger,
        contract: MedicalManagement,
    }

    impl Clinic {
        fn new() -> Self {
            let mut clinic = Self {
                ledger: MemoryLedger::new(),
                contract: MedicalManagement::default(),
            };
            clinic.run("admin", functions::INIT_LEDGER, &[]).unwrap();
            clinic
                .run("admin", functions::CREATE_DOCTOR, &["DOC1", "Dr A", "Cardiology", "555-0100"])
                .unwrap();
            clinic
                .run("admin", functions::CREATE_DOCTOR, &["DOC2", "Dr B", "Neurology", "555-0101"])
                .unwrap();
            clinic
                .run(
                    "admin",
                    functions::CREATE_PATIENT,
                    &["PAT1", "P One", "1990-01-01", "555-0200", "1 Main St", "DOC1"],
                )
                .unwrap();
            clinic
        }

        fn run(&mut self, caller: &str, function: &str, args: &[&str]) -> ChaincodeResult<String> {
            let ctx = call(caller, function, args);
            let contract = &self.contract;
            self.ledger.execute(|tx| invoke(contract, tx, &ctx))
        }

        fn query<T: serde::de::DeserializeOwned>(&mut self, caller: &str, function: &str, args: &[&str]) -> T {
            let json = self.run(caller, function, args).unwrap();
            serde_json::from_str(&json).unwrap()
        }
    }

    #[test]
    fn test_doctor_adds_record_for_assigned_patient() {
        let mut clinic = Clinic::new();

        let message = clinic
            .run(
                "DOC1",
                functions::ADD_MEDICAL_RECORD,
                &["PAT1", "2024-01-01", "flu", "rest", "none", "", "", "", ""],
            )
            .unwrap();
        let record_id = records_integrity::parse_record_added_message(&message).unwrap().to_string();
        assert!(record_id.starts_with("REC_PAT1_"));
        assert_eq!(record_id, format!("REC_PAT1_{TX_SECONDS}"));

        let records: Vec<MedicalRecord> =
            clinic.query("PAT1", functions::GET_PATIENT_MEDICAL_RECORDS, &["PAT1"]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].doctor_id, "DOC1");
        assert_eq!(records[0].diagnosis, "flu");
        assert!(!records[0].has_file);
    }

    #[test]
    fn test_patient_with_unknown_doctor_writes_nothing() {
        let mut clinic = Clinic::new();
        let before = clinic.ledger.len();

        let err = clinic
            .run(
                "admin",
                functions::CREATE_PATIENT,
                &["PAT9", "P Nine", "1990-01-01", "555-0209", "9 Main St", "DOC404"],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(clinic.ledger.len(), before);
        assert!(clinic.ledger.keys().all(|key| key != "PAT9"));
    }

    #[test]
    fn test_unassigned_doctor_cannot_add_record() {
        let mut clinic = Clinic::new();

        let err = clinic
            .run("DOC2", functions::ADD_MEDICAL_RECORD, &["PAT1", "2024-01-01", "flu"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAssignment);
        assert!(err.to_string().contains("assigned to doctor DOC1"));

        let patient: UserRecord = clinic.query("PAT1", functions::GET_USER_PROFILE, &["PAT1"]);
        assert!(patient.as_patient().unwrap().medical_record_ids.is_empty());
    }

    #[test]
    fn test_non_doctor_cannot_add_record() {
        let mut clinic = Clinic::new();

        for caller in ["PAT1", "admin", "STRANGER"] {
            let err = clinic
                .run(caller, functions::ADD_MEDICAL_RECORD, &["PAT1", "2024-01-01", "flu"])
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unauthorized, "caller {caller}");
        }
    }

    #[test]
    fn test_same_second_records_get_distinct_ids() {
        let mut clinic = Clinic::new();
        let args = ["PAT1", "2024-01-01", "flu", "rest", "none", ""];

        let first = clinic.run("DOC1", functions::ADD_MEDICAL_RECORD, &args).unwrap();
        let second = clinic.run("DOC1", functions::ADD_MEDICAL_RECORD, &args).unwrap();
        assert!(first.contains(&format!("REC_PAT1_{TX_SECONDS} ")));
        assert!(second.contains(&format!("REC_PAT1_{TX_SECONDS}_2 ")));

        let patient: UserRecord = clinic.query("PAT1", functions::GET_USER_PROFILE, &["PAT1"]);
        assert_eq!(patient.as_patient().unwrap().medical_record_ids.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut clinic = Clinic::new();

        let err = clinic
            .run("admin", functions::CREATE_DOCTOR, &["DOC1", "Dr Z", "Surgery", "555-0199"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.to_string(), "Doctor with ID DOC1 already exists");

        let err = clinic
            .run(
                "admin",
                functions::CREATE_PATIENT,
                &["DOC2", "P Two", "1990-01-01", "555-0201", "2 Main St", "DOC1"],
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_doctor_listing_is_admin_only() {
        let mut clinic = Clinic::new();

        let doctors: Vec<UserRecord> = clinic.query("admin", functions::LIST_ALL_DOCTORS, &[]);
        let mut ids: Vec<_> = doctors.iter().map(|d| d.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, ["DOC1", "DOC2"]);

        let err = clinic.run("DOC1", functions::LIST_ALL_DOCTORS, &[]).unwrap_err();
        assert_eq!(err.to_string(), "Only admin can list all doctors");
    }

    #[test]
    fn test_init_ledger_is_idempotent() {
        let mut clinic = Clinic::new();
        let before = clinic.ledger.len();

        clinic.run("admin", functions::INIT_LEDGER, &[]).unwrap();
        assert_eq!(clinic.ledger.len(), before);

        let err = clinic.run("DOC1", functions::INIT_LEDGER, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
