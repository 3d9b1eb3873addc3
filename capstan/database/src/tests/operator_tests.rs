use super::test_prelude::*;

#[cfg(test)]
mod operator_database_tests {
    use super::*;

    #[test]
    // Insert an operator and confirm it lands in both the database and memory
    fn test_insert_retrieve_operator() {
        let fixture = TestFixture::new_empty();

        let operator = generators::operator::with_id(1);
        in_txn(&fixture.db, |txn| fixture.db.insert_operator(txn, &operator));

        assert!(fixture.db.operator_exists(&operator.id));
        assert!(queries::operator_row_exists(&fixture.db, operator.id));
        let stored = fixture.db.get_operator(&operator.id).expect("should exist");
        assert_eq!(stored.owner, operator.owner);
        assert_eq!(stored.pem(), operator.pem());
    }

    #[test]
    // A second insert with the same id must be rejected
    fn test_duplicate_insert() {
        let fixture = TestFixture::new_empty();

        let operator = generators::operator::with_id(1);
        in_txn(&fixture.db, |txn| fixture.db.insert_operator(txn, &operator));

        let mut conn = fixture.db.connection().unwrap();
        let txn = conn.transaction().unwrap();
        assert!(fixture.db.insert_operator(&txn, &operator).is_err());
    }

    #[test]
    // Inserting an operator with our own public key adopts its id
    fn test_own_operator_id_adoption() {
        let fixture = TestFixture::new_empty();
        assert!(fixture.db.get_own_id().is_none());

        let operator =
            Operator::new_with_pubkey(fixture.pubkey.clone(), OperatorId(42), Address::random());
        in_txn(&fixture.db, |txn| fixture.db.insert_operator(txn, &operator));

        assert_eq!(fixture.db.get_own_id(), Some(OperatorId(42)));
    }

    #[test]
    // Lookup of an id through the public key
    fn test_operator_id_by_pem() {
        let fixture = TestFixture::new();
        let first = &fixture.operators[0];
        assert_eq!(
            fixture.db.operator_id_by_pem(&first.pem()),
            Some(first.id)
        );
        assert_eq!(fixture.db.operator_id_by_pem(b"missing"), None);
    }

    #[test]
    // The purge routine removes the row; OperatorRemoved handling never calls it
    fn test_purge_operator() {
        let fixture = TestFixture::new_empty();

        let operator = generators::operator::with_id(7);
        in_txn(&fixture.db, |txn| fixture.db.insert_operator(txn, &operator));
        in_txn(&fixture.db, |txn| {
            fixture.db.purge_operator(txn, operator.id)
        });

        assert!(!fixture.db.operator_exists(&operator.id));
        assert!(!queries::operator_row_exists(&fixture.db, operator.id));
    }

    #[test]
    // Purging an operator that does not exist fails
    fn test_purge_dne_operator() {
        let fixture = TestFixture::new_empty();
        let mut conn = fixture.db.connection().unwrap();
        let txn = conn.transaction().unwrap();
        assert!(fixture.db.purge_operator(&txn, OperatorId(1)).is_err());
    }
}
