use super::test_prelude::*;

#[cfg(test)]
mod event_database_tests {
    use super::*;

    #[test]
    // Nonces start at zero and advance by one per bump
    fn test_nonce_bump() {
        let fixture = TestFixture::new_empty();
        let owner = Address::random();

        assert_eq!(fixture.db.get_next_nonce(&owner), 0);
        in_txn(&fixture.db, |txn| fixture.db.bump_nonce(txn, &owner));
        assert_eq!(fixture.db.get_next_nonce(&owner), 1);
        in_txn(&fixture.db, |txn| fixture.db.bump_nonce(txn, &owner));
        assert_eq!(fixture.db.get_next_nonce(&owner), 2);
        assert_eq!(queries::nonce_row(&fixture.db, &owner), Some(2));
    }

    #[test]
    // Processed transaction hashes persist and deduplicate
    fn test_processed_events() {
        let fixture = TestFixture::new_empty();
        let tx_hash = B256::random();

        assert!(!fixture.db.event_processed(&tx_hash));
        in_txn(&fixture.db, |txn| {
            fixture.db.save_processed_event(txn, tx_hash)
        });
        assert!(fixture.db.event_processed(&tx_hash));

        // marking again is a no-op
        in_txn(&fixture.db, |txn| {
            fixture.db.save_processed_event(txn, tx_hash)
        });
        assert!(fixture.db.event_processed(&tx_hash));
    }

    #[test]
    // Decided instances can be recorded and wiped per message id
    fn test_decided_instance_cleanup() {
        let fixture = TestFixture::new();
        let msg_id = MsgId::new(
            &MAINNET_DOMAIN,
            Role::Attester,
            &fixture.share.validator_pubkey,
        );

        fixture
            .db
            .save_decided_instance(&msg_id)
            .expect("Failed to save decided instance");
        assert!(fixture.db.has_decided_instance(&msg_id).unwrap());

        in_txn(&fixture.db, |txn| {
            fixture.db.delete_decided_instances(txn, &msg_id)
        });
        assert!(!fixture.db.has_decided_instance(&msg_id).unwrap());
    }

    #[test]
    // A dropped transaction leaves no trace of its writes
    fn test_rollback_discards_writes() {
        let fixture = TestFixture::new_empty();
        let owner = Address::random();

        {
            let mut conn = fixture.db.connection().unwrap();
            let txn = conn.transaction().unwrap();
            fixture.db.bump_nonce(&txn, &owner).unwrap();
            // dropped without commit
        }

        assert_eq!(queries::nonce_row(&fixture.db, &owner), None);
    }
}
