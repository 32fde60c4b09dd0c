//! Patient Listing Tests
//!
//! `listAllPatients` partitions the patient population by caller:
//! - admin sees every patient
//! - a doctor sees exactly the patients assigned to them
//! - a patient or unknown caller sees nothing

#[cfg(test)]
mod tests {
    use crate::call;
    use medledger_shared::{functions, MemoryLedger};
    use proptest::prelude::*;
    use records::{invoke, MedicalManagement};
    use records_integrity::{PatientProfile, UserRecord};

    fn run(ledger: &mut MemoryLedger, contract: &MedicalManagement, caller: &str, function: &str, args: &[&str]) -> String {
        let ctx = call(caller, function, args);
        ledger.execute(|tx| invoke(contract, tx, &ctx)).unwrap()
    }

    fn listed_ids(ledger: &mut MemoryLedger, contract: &MedicalManagement, caller: &str) -> Vec<String> {
        let json = run(ledger, contract, caller, functions::LIST_ALL_PATIENTS, &[]);
        let patients: Vec<UserRecord> = serde_json::from_str(&json).unwrap();
        let mut ids: Vec<String> = patients.into_iter().map(|p| p.id).collect();
        ids.sort();
        ids
    }

    /// Ledger with `doctors` doctors and one patient per entry of
    /// `assignments`, assigned to doctor `DOC{n}`
    fn populate(doctors: usize, assignments: &[usize]) -> (MemoryLedger, MedicalManagement) {
        let mut ledger = MemoryLedger::new();
        let contract = MedicalManagement::default();

        run(&mut ledger, &contract, "admin", functions::INIT_LEDGER, &[]);
        for n in 0..doctors {
            let id = format!("DOC{n}");
            run(&mut ledger, &contract, "admin", functions::CREATE_DOCTOR, &[id.as_str(), "Dr", "General", "555-0100"]);
        }
        for (i, doctor) in assignments.iter().enumerate() {
            let id = format!("PAT{i:03}");
            let doctor_id = format!("DOC{doctor}");
            run(
                &mut ledger,
                &contract,
                "admin",
                functions::CREATE_PATIENT,
                &[id.as_str(), "Patient", "1990-01-01", "555-0200", "Main St", doctor_id.as_str()],
            );
        }
        (ledger, contract)
    }

    #[test]
    fn test_listing_of_small_clinic() {
        let (mut ledger, contract) = populate(2, &[0, 1, 0]);

        assert_eq!(listed_ids(&mut ledger, &contract, "admin"), ["PAT000", "PAT001", "PAT002"]);
        assert_eq!(listed_ids(&mut ledger, &contract, "DOC0"), ["PAT000", "PAT002"]);
        assert_eq!(listed_ids(&mut ledger, &contract, "DOC1"), ["PAT001"]);
        assert!(listed_ids(&mut ledger, &contract, "PAT000").is_empty());
        assert!(listed_ids(&mut ledger, &contract, "NOBODY").is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_listing_partitions_patients_by_doctor(
            (doctors, assignments) in (1usize..4).prop_flat_map(|doctors| {
                (Just(doctors), prop::collection::vec(0..doctors, 0..8))
            }),
        ) {
            let (mut ledger, contract) = populate(doctors, &assignments);

            let all = listed_ids(&mut ledger, &contract, "admin");
            prop_assert_eq!(all.len(), assignments.len());

            let mut union = Vec::new();
            for n in 0..doctors {
                let doctor_id = format!("DOC{n}");
                let listed = listed_ids(&mut ledger, &contract, &doctor_id);
                let expected: Vec<String> = assignments
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| **d == n)
                    .map(|(i, _)| format!("PAT{i:03}"))
                    .collect();
                prop_assert_eq!(&listed, &expected);
                union.extend(listed);
            }
            union.sort();
            prop_assert_eq!(union, all);

            for i in 0..assignments.len() {
                let patient_id = format!("PAT{i:03}");
                prop_assert!(listed_ids(&mut ledger, &contract, &patient_id).is_empty());
            }
        }
    }

    #[test]
    fn test_listed_patients_keep_their_assignment() {
        let (mut ledger, contract) = populate(1, &[0]);
        let json = run(&mut ledger, &contract, "DOC0", functions::LIST_ALL_PATIENTS, &[]);
        let patients: Vec<UserRecord> = serde_json::from_str(&json).unwrap();

        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].as_patient().and_then(PatientProfile::assigned_doctor), Some("DOC0"));
    }
}
