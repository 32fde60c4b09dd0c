//! Attachment Lifecycle Tests
//!
//! The key store and the ledger commit independently. These scenarios check
//! that every write ends with the key either reconciled to the record id or
//! purged, and that downloads only ever return the original bytes.

#[cfg(test)]
mod tests {
    use crate::{admin, clinic_gateway, strings};
    use medledger_attachments::{
        AttachmentConfig, AttachmentError, AttachmentManager, CallIdentity, FileKeyStore, GatewayError, KeyEntry,
        KeyStore, LedgerGateway, LocalGateway, MemoryKeyStore, SealedAttachment,
    };
    use medledger_health_crypto::AttachmentKey;
    use medledger_shared::{functions, Role};
    use records::NewMedicalRecord;
    use records_integrity::MedicalRecord;
    use std::cell::RefCell;

    const REPORT: &[u8] = b"%PDF-1.7 discharge summary";

    fn doc1() -> CallIdentity {
        CallIdentity::new("DOC1", Role::Doctor)
    }

    fn staffed(gateway: &LocalGateway) {
        gateway
            .submit(&admin(), functions::CREATE_DOCTOR, &strings(&["DOC1", "Dr A", "Cardiology", "555-0100"]))
            .unwrap();
        gateway
            .submit(
                &admin(),
                functions::CREATE_PATIENT,
                &strings(&["PAT1", "P One", "1990-01-01", "555-0200", "1 Main St", "DOC1"]),
            )
            .unwrap();
    }

    fn flu(patient_id: &str) -> NewMedicalRecord {
        NewMedicalRecord {
            patient_id: patient_id.to_string(),
            diagnosis_date: "2024-01-01".to_string(),
            diagnosis: "flu".to_string(),
            treatment: "rest".to_string(),
            medications: "none".to_string(),
            ..Default::default()
        }
    }

    /// Records the key-store contents seen at submit time, then fails
    struct FailsAfterKeyStored<'a, K: KeyStore> {
        keys: &'a K,
        seen: RefCell<Vec<String>>,
    }

    impl<K: KeyStore> LedgerGateway for FailsAfterKeyStored<'_, K> {
        fn submit(&self, _: &CallIdentity, _: &str, _: &[String]) -> Result<String, GatewayError> {
            *self.seen.borrow_mut() = self.keys.record_ids().unwrap_or_default();
            Err(GatewayError::Unavailable("commit timed out".to_string()))
        }

        fn evaluate(&self, _: &CallIdentity, _: &str, _: &[String]) -> Result<String, GatewayError> {
            Err(GatewayError::Unavailable("commit timed out".to_string()))
        }
    }

    #[test]
    fn test_attachment_survives_file_key_store() {
        let path = std::env::temp_dir().join(format!("medledger-suite-keys-{}.json", std::process::id()));
        let gateway = clinic_gateway().unwrap();
        staffed(&gateway);

        let manager = AttachmentManager::new(&gateway, FileKeyStore::open(&path), AttachmentConfig::default());
        let sealed = SealedAttachment::seal("summary.pdf", "application/pdf", REPORT).unwrap();
        let added = manager.add_medical_record(&doc1(), flu("PAT1"), Some(sealed)).unwrap();
        assert!(added.record_id.starts_with("REC_PAT1_"));

        // Only ciphertext reaches the ledger
        let json = gateway
            .evaluate(&admin(), functions::GET_MEDICAL_RECORD, &[added.record_id.clone()])
            .unwrap();
        let record: MedicalRecord = serde_json::from_str(&json).unwrap();
        let stored = record.attachment().unwrap();
        assert_ne!(stored.ciphertext, REPORT);
        assert_eq!(stored.file_name, "summary.pdf");

        // A second process reading the same key file can decrypt
        let reopened = AttachmentManager::new(&gateway, FileKeyStore::open(&path), AttachmentConfig::default());
        let patient = CallIdentity::new("PAT1", Role::Patient);
        let file = reopened.download(&patient, &added.record_id).unwrap();
        assert_eq!(file.bytes, REPORT);
        assert_eq!(file.file_type, "application/pdf");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_failed_commit_leaves_no_temporary_key() {
        let keys = MemoryKeyStore::new();
        let gateway = FailsAfterKeyStored {
            keys: &keys,
            seen: RefCell::new(Vec::new()),
        };
        let manager = AttachmentManager::new(&gateway, &keys, AttachmentConfig::default());

        let sealed = SealedAttachment::seal("summary.pdf", "application/pdf", REPORT).unwrap();
        let err = manager.add_medical_record(&doc1(), flu("PAT1"), Some(sealed)).unwrap_err();
        assert!(matches!(err, AttachmentError::Ledger(GatewayError::Unavailable(_))));

        let seen = gateway.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("TEMP_"));
        assert!(keys.record_ids().unwrap().is_empty());
    }

    #[test]
    fn test_other_key_never_yields_plaintext() {
        let gateway = clinic_gateway().unwrap();
        staffed(&gateway);
        let manager = AttachmentManager::new(&gateway, MemoryKeyStore::new(), AttachmentConfig::default());

        let sealed = SealedAttachment::seal("summary.pdf", "application/pdf", REPORT).unwrap();
        let added = manager.add_medical_record(&doc1(), flu("PAT1"), Some(sealed)).unwrap();

        for _ in 0..4 {
            let other = AttachmentKey::generate().unwrap();
            manager.keys().put(&added.record_id, KeyEntry::from(&other)).unwrap();
            match manager.download(&doc1(), &added.record_id) {
                Err(AttachmentError::Crypto(_)) => {}
                Ok(file) => panic!("decrypted {} bytes with the wrong key", file.bytes.len()),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_rejected_record_keeps_ledger_and_store_clean() {
        let gateway = clinic_gateway().unwrap();
        staffed(&gateway);
        let manager = AttachmentManager::new(&gateway, MemoryKeyStore::new(), AttachmentConfig::default());
        let before = gateway.with_ledger(|ledger| ledger.len()).unwrap();

        let sealed = SealedAttachment::seal("summary.pdf", "application/pdf", REPORT).unwrap();
        let err = manager
            .add_medical_record(&doc1(), flu("PAT404"), Some(sealed))
            .unwrap_err();
        assert_eq!(err.status(), 404);

        assert!(manager.keys().record_ids().unwrap().is_empty());
        assert_eq!(gateway.with_ledger(|ledger| ledger.len()).unwrap(), before);
    }
}
