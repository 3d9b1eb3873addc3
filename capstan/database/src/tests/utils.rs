use super::test_prelude::*;
use crate::Transaction;
use openssl::pkey::Public;
use openssl::rsa::Rsa;
use rand::Rng;
use std::path::PathBuf;
use tempfile::TempDir;

const DEFAULT_NUM_OPERATORS: u64 = 4;
const RSA_KEY_SIZE: u32 = 2048;

// Test fixture for common scenarios
pub struct TestFixture {
    pub db: RegistryDatabase,
    pub share: ValidatorShare,
    pub operators: Vec<Operator>,
    pub path: PathBuf,
    pub pubkey: Rsa<Public>,
    _temp_dir: TempDir,
}

impl TestFixture {
    // Generate a registry populated with a full committee. This operator is a
    // member, so an own share is stored alongside the committee.
    pub fn new() -> Self {
        let operators: Vec<Operator> = (1..=DEFAULT_NUM_OPERATORS)
            .map(generators::operator::with_id)
            .collect();
        let us = operators
            .first()
            .expect("Failed to get operator")
            .rsa_pubkey
            .clone();

        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let db_path = temp_dir.path().join("registry.db");
        let db = RegistryDatabase::new(&db_path, &us).expect("Failed to create registry");

        in_txn(&db, |txn| {
            for op in &operators {
                db.insert_operator(txn, op)?;
            }
            Ok(())
        });

        let share = generators::share::with_committee(&operators, Some(0));
        in_txn(&db, |txn| db.insert_validator(txn, &share));

        Self {
            db,
            share,
            operators,
            path: db_path,
            pubkey: us,
            _temp_dir: temp_dir,
        }
    }

    // Generate an empty registry with a random public key as us
    pub fn new_empty() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let db_path = temp_dir.path().join("registry.db");
        let pubkey = generators::pubkey::random_rsa();

        let db = RegistryDatabase::new(&db_path, &pubkey).expect("Failed to create registry");

        Self {
            db,
            share: generators::share::with_committee(&[], None),
            operators: Vec::new(),
            path: db_path,
            pubkey,
            _temp_dir: temp_dir,
        }
    }
}

// Run a closure inside one committed registry transaction
pub fn in_txn<F>(db: &RegistryDatabase, f: F)
where
    F: FnOnce(&Transaction) -> Result<(), DatabaseError>,
{
    let mut conn = db.connection().expect("Failed to get connection");
    let txn = conn.transaction().expect("Failed to open transaction");
    f(&txn).expect("Transaction operation failed");
    txn.commit().expect("Failed to commit");
}

// Generator functions for test data
pub mod generators {
    use super::*;

    pub mod operator {
        use super::*;

        pub fn with_id(id: u64) -> Operator {
            let public_key = generators::pubkey::random_rsa();
            Operator::new_with_pubkey(public_key, OperatorId(id), Address::random())
        }
    }

    pub mod pubkey {
        use super::*;

        // Generate a random RSA public key for operators
        pub fn random_rsa() -> Rsa<Public> {
            let priv_key = Rsa::generate(RSA_KEY_SIZE).expect("Failed to generate RSA key");
            priv_key
                .public_key_to_pem()
                .and_then(|pem| Rsa::public_key_from_pem(&pem))
                .expect("Failed to process RSA key")
        }

        // Generate opaque public key bytes for validators and shares
        pub fn random() -> PublicKeyBytes {
            let mut bytes = [0u8; PUBLIC_KEY_LENGTH];
            rand::thread_rng().fill(&mut bytes[..]);
            PublicKeyBytes(bytes)
        }
    }

    pub mod share {
        use super::*;

        // Generate a validator share with the given committee. When
        // `own_index` names a committee position, the fixture operator at
        // that position holds the decrypted share.
        pub fn with_committee(operators: &[Operator], own_index: Option<usize>) -> ValidatorShare {
            let committee: Vec<CommitteeMember> = operators
                .iter()
                .map(|op| CommitteeMember {
                    operator_id: op.id,
                    share_pubkey: pubkey::random(),
                })
                .collect();
            let (quorum, partial_quorum) =
                compute_quorum_and_partial_quorum(committee.len().max(4));
            let own_share = own_index.map(|i| OwnShare {
                share_pubkey: committee[i].share_pubkey,
                secret: rand::thread_rng().gen(),
            });

            ValidatorShare {
                validator_pubkey: pubkey::random(),
                owner: Address::random(),
                cluster_id: ClusterId(rand::thread_rng().gen()),
                committee,
                own_share,
                quorum,
                partial_quorum,
                domain: MAINNET_DOMAIN,
                liquidated: false,
                metadata: None,
                graffiti: Graffiti::capstan(),
            }
        }
    }
}

/// Database queries extracting rows as persisted, bypassing the memory stores
pub mod queries {
    use super::*;
    use rusqlite::params;

    const GET_OPERATOR: &str =
        "SELECT operator_id FROM operators WHERE operator_id = ?1";
    const GET_VALIDATOR_OWNER: &str =
        "SELECT owner FROM validators WHERE validator_pubkey = ?1";
    const GET_LIQUIDATED: &str =
        "SELECT liquidated FROM validators WHERE validator_pubkey = ?1";
    const GET_MEMBER_COUNT: &str =
        "SELECT COUNT(*) FROM committee_members WHERE validator_pubkey = ?1";
    const GET_NONCE: &str = "SELECT nonce FROM nonces WHERE owner = ?1";

    pub fn operator_row_exists(db: &RegistryDatabase, id: OperatorId) -> bool {
        let conn = db.connection().unwrap();
        let result = conn
            .prepare(GET_OPERATOR)
            .unwrap()
            .query_row(params![*id], |row| row.get::<_, u64>(0))
            .is_ok();
        result
    }

    pub fn validator_owner(db: &RegistryDatabase, pubkey: &PublicKeyBytes) -> Option<String> {
        let conn = db.connection().unwrap();
        let result = conn
            .prepare(GET_VALIDATOR_OWNER)
            .unwrap()
            .query_row(params![pubkey.to_string()], |row| row.get(0))
            .ok();
        result
    }

    pub fn liquidated(db: &RegistryDatabase, pubkey: &PublicKeyBytes) -> Option<bool> {
        let conn = db.connection().unwrap();
        let result = conn
            .prepare(GET_LIQUIDATED)
            .unwrap()
            .query_row(params![pubkey.to_string()], |row| row.get(0))
            .ok();
        result
    }

    pub fn committee_member_count(db: &RegistryDatabase, pubkey: &PublicKeyBytes) -> u64 {
        let conn = db.connection().unwrap();
        let result = conn
            .prepare(GET_MEMBER_COUNT)
            .unwrap()
            .query_row(params![pubkey.to_string()], |row| row.get(0))
            .unwrap_or(0);
        result
    }

    pub fn nonce_row(db: &RegistryDatabase, owner: &Address) -> Option<u64> {
        let conn = db.connection().unwrap();
        let result = conn
            .prepare(GET_NONCE)
            .unwrap()
            .query_row(params![owner.to_string()], |row| row.get(0))
            .ok();
        result
    }
}
