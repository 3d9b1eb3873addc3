//! End-to-end tests for the event processor: encoded contract logs go in,
//! registry state comes out.

use crate::event_batcher::BlockBatch;
use crate::event_processor::EventProcessor;
use crate::gen::RegistryContract;
use crate::util::compute_cluster_id;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use base64::prelude::*;
use batch_verifier::BLS_DST;
use blst::min_pk::SecretKey;
use database::RegistryDatabase;
use dvt_types::{OperatorId, PublicKeyBytes, MAINNET_DOMAIN};
use openssl::pkey::Private;
use openssl::rsa::{Padding, Rsa};
use std::sync::Arc;
use tempfile::TempDir;

const RSA_KEY_SIZE: u32 = 2048;

struct TestNode {
    db: Arc<RegistryDatabase>,
    processor: EventProcessor,
    operator_keys: Vec<Rsa<Private>>,
    next_block: u64,
    _temp_dir: TempDir,
}

impl TestNode {
    // A node acting as operator 1 of a four-operator network. Operators are
    // registered through OperatorAdded events so the local id is adopted the
    // same way it is in production.
    fn new() -> Self {
        let operator_keys: Vec<Rsa<Private>> = (0..4)
            .map(|_| Rsa::generate(RSA_KEY_SIZE).expect("Failed to generate RSA key"))
            .collect();
        let own_pubkey = operator_keys[0]
            .public_key_to_pem()
            .and_then(|pem| Rsa::public_key_from_pem(&pem))
            .expect("Failed to derive public key");

        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        let db = Arc::new(
            RegistryDatabase::new(&temp_dir.path().join("registry.db"), &own_pubkey)
                .expect("Failed to create registry"),
        );
        let processor = EventProcessor::new(
            Arc::clone(&db),
            operator_keys[0].clone(),
            MAINNET_DOMAIN,
            false,
            None,
        );

        let mut node = Self {
            db,
            processor,
            operator_keys,
            next_block: 1,
            _temp_dir: temp_dir,
        };

        for (i, key) in node.operator_keys.clone().iter().enumerate() {
            let log = operator_added_log((i + 1) as u64, key, Address::random());
            node.process(vec![log]).expect("operator registration");
        }
        assert_eq!(node.db.get_own_id(), Some(OperatorId(1)));
        node
    }

    // Process the given logs as one block batch
    fn process(&mut self, events: Vec<Log>) -> Result<(), crate::ExecutionError> {
        let block_number = self.next_block;
        self.next_block += 1;
        self.processor.process_block(
            &BlockBatch {
                block_number,
                events: events
                    .into_iter()
                    .map(|mut log| {
                        log.block_number = Some(block_number);
                        log
                    })
                    .collect(),
            },
            false,
        )
    }
}

fn wrap_log(data: alloy::primitives::LogData, tx_hash: B256) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address: Address::ZERO,
            data,
        },
        block_hash: None,
        block_number: Some(0),
        block_timestamp: None,
        transaction_hash: Some(tx_hash),
        transaction_index: None,
        log_index: Some(0),
        removed: false,
    }
}

// The on-chain operator key payload: 64 bytes of ABI header, then the base64
// PEM zero-padded to 704 bytes total
fn operator_pubkey_payload(key: &Rsa<Private>) -> Bytes {
    let pem = key.public_key_to_pem().expect("pem");
    let encoded = BASE64_STANDARD.encode(pem);
    let mut payload = vec![0u8; 704];
    payload[64..64 + encoded.len()].copy_from_slice(encoded.as_bytes());
    Bytes::from(payload)
}

fn operator_added_log(id: u64, key: &Rsa<Private>, owner: Address) -> Log {
    let event = RegistryContract::OperatorAdded {
        operatorId: id,
        owner,
        publicKey: operator_pubkey_payload(key),
        fee: U256::ZERO,
    };
    wrap_log(event.encode_log_data(), B256::random())
}

struct ValidatorRegistration {
    validator_secret: SecretKey,
    validator_pubkey: PublicKeyBytes,
    log: Log,
}

// Build a well-formed ValidatorAdded event: fresh validator and share keys,
// shares encrypted to each operator, and the registration signature over
// "owner:nonce" by the validator key
fn validator_added_log(
    owner: Address,
    nonce: u64,
    operator_keys: &[Rsa<Private>],
    corrupt_signature: bool,
) -> ValidatorRegistration {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&nonce.wrapping_add(0xC0FFEE).to_be_bytes());
    seed[8..28].copy_from_slice(owner.as_slice());
    let validator_secret = SecretKey::key_gen(&seed, b"validator").expect("key_gen");

    let log = validator_added_log_for_key(
        owner,
        nonce,
        operator_keys,
        &validator_secret,
        corrupt_signature,
    );
    ValidatorRegistration {
        validator_pubkey: PublicKeyBytes(validator_secret.sk_to_pk().to_bytes()),
        validator_secret,
        log,
    }
}

// Same, but registering a caller-provided validator key
fn validator_added_log_for_key(
    owner: Address,
    nonce: u64,
    operator_keys: &[Rsa<Private>],
    validator_secret: &SecretKey,
    corrupt_signature: bool,
) -> Log {
    let validator_pubkey = PublicKeyBytes(validator_secret.sk_to_pk().to_bytes());
    let share_secrets: Vec<SecretKey> = (0..operator_keys.len())
        .map(|i| {
            let mut share_seed = [0u8; 32];
            share_seed[..20].copy_from_slice(owner.as_slice());
            share_seed[20..28].copy_from_slice(&nonce.to_be_bytes());
            share_seed[31] = i as u8;
            SecretKey::key_gen(&share_seed, b"share").expect("key_gen")
        })
        .collect();

    let payload = if corrupt_signature {
        b"wrong payload".to_vec()
    } else {
        let data = format!("{}:{}", owner.to_checksum(None), nonce);
        keccak256(data.as_bytes()).to_vec()
    };
    let signature = validator_secret.sign(&payload, BLS_DST, &[]).to_bytes();

    let mut shares = signature.to_vec();
    for secret in &share_secrets {
        shares.extend_from_slice(&secret.sk_to_pk().to_bytes());
    }
    for (secret, rsa) in share_secrets.iter().zip(operator_keys) {
        let plaintext = hex::encode(secret.to_bytes());
        let mut encrypted = vec![0u8; rsa.size() as usize];
        let n = rsa
            .public_encrypt(plaintext.as_bytes(), &mut encrypted, Padding::PKCS1)
            .expect("encrypt");
        assert_eq!(n, 256);
        shares.extend_from_slice(&encrypted);
    }

    let event = RegistryContract::ValidatorAdded {
        owner,
        operatorIds: (1..=operator_keys.len() as u64).collect(),
        publicKey: Bytes::copy_from_slice(validator_pubkey.as_slice()),
        shares: Bytes::from(shares),
    };
    wrap_log(event.encode_log_data(), B256::random())
}

fn validator_removed_log(owner: Address, pubkey: &PublicKeyBytes, operators: u64) -> Log {
    let event = RegistryContract::ValidatorRemoved {
        owner,
        operatorIds: (1..=operators).collect(),
        publicKey: Bytes::copy_from_slice(pubkey.as_slice()),
    };
    wrap_log(event.encode_log_data(), B256::random())
}

#[test]
// Registering the same public key under a different id is malformed; the
// first registration survives untouched
fn duplicate_operator_pubkey_is_malformed() {
    let mut node = TestNode::new();

    let reused_key = node.operator_keys[2].clone();
    let log = operator_added_log(9, &reused_key, Address::random());
    node.process(vec![log]).expect("block should not abort");

    assert_eq!(node.processor.malformed_event_count(), 1);
    assert!(!node.db.operator_exists(&OperatorId(9)));
    assert!(node.db.operator_exists(&OperatorId(3)));
}

#[test]
// OperatorRemoved for an unknown id is malformed; for a known id the row stays
fn operator_removed_leaves_row() {
    let mut node = TestNode::new();

    let unknown = RegistryContract::OperatorRemoved { operatorId: 77 };
    node.process(vec![wrap_log(unknown.encode_log_data(), B256::random())])
        .expect("block should not abort");
    assert_eq!(node.processor.malformed_event_count(), 1);

    let known = RegistryContract::OperatorRemoved { operatorId: 2 };
    node.process(vec![wrap_log(known.encode_log_data(), B256::random())])
        .expect("block should not abort");
    assert!(node.db.operator_exists(&OperatorId(2)));
}

#[test]
// A well-formed ValidatorAdded stores the share with its committee and our
// decrypted key-share, marks the transaction processed, and advances the nonce
fn validator_added_happy_path() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let keys = node.operator_keys.clone();

    let registration = validator_added_log(owner, 0, &keys, false);
    let tx_hash = registration.log.transaction_hash.unwrap();
    node.process(vec![registration.log]).expect("processing");

    let share = node
        .db
        .shares()
        .get_by_pubkey(&registration.validator_pubkey)
        .expect("share should exist");
    assert_eq!(share.owner, owner);
    assert_eq!(
        share.committee.iter().map(|m| *m.operator_id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    assert_eq!((share.quorum, share.partial_quorum), (3, 2));
    assert!(share.own_share.is_some());
    assert!(node.db.event_processed(&tx_hash));
    assert_eq!(node.db.get_next_nonce(&owner), 1);
    assert_eq!(node.processor.malformed_event_count(), 0);

    // the decrypted secret reproduces the advertised share public key
    let own = share.own_share.unwrap();
    let recovered = SecretKey::from_bytes(&own.secret).expect("valid scalar");
    assert_eq!(
        PublicKeyBytes(recovered.sk_to_pk().to_bytes()),
        own.share_pubkey
    );
}

#[test]
// A malformed registration still marks the transaction processed and still
// advances the nonce, so the event can never be replayed into a different
// verdict
fn malformed_validator_added_settles_bookkeeping() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let keys = node.operator_keys.clone();

    let registration = validator_added_log(owner, 0, &keys, true);
    let tx_hash = registration.log.transaction_hash.unwrap();
    node.process(vec![registration.log]).expect("processing");

    assert_eq!(node.processor.malformed_event_count(), 1);
    assert!(node
        .db
        .shares()
        .get_by_pubkey(&registration.validator_pubkey)
        .is_none());
    assert!(node.db.event_processed(&tx_hash));
    assert_eq!(node.db.get_next_nonce(&owner), 1);
}

#[test]
// Replays of an already-processed transaction hash are skipped entirely
fn validator_added_is_idempotent_per_tx_hash() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let keys = node.operator_keys.clone();

    let registration = validator_added_log(owner, 0, &keys, false);
    let replay = registration.log.clone();
    node.process(vec![registration.log]).expect("processing");
    node.process(vec![replay]).expect("replay");

    // the replay neither advanced the nonce nor tripped the malformed counter
    assert_eq!(node.db.get_next_nonce(&owner), 1);
    assert_eq!(node.processor.malformed_event_count(), 0);
}

#[test]
// A well-formed re-registration of an existing validator by its own owner is
// a no-op: no malformed verdict, and neither the transaction hash nor the
// nonce is settled, so the event stays replayable
fn same_owner_re_registration_settles_nothing() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let keys = node.operator_keys.clone();

    let registration = validator_added_log(owner, 0, &keys, false);
    let pubkey = registration.validator_pubkey;
    node.process(vec![registration.log]).expect("processing");
    assert_eq!(node.db.get_next_nonce(&owner), 1);

    // the same validator key registered again, correctly signed at the
    // current nonce
    let replay = validator_added_log_for_key(
        owner,
        1,
        &keys,
        &registration.validator_secret,
        false,
    );
    let replay_tx = replay.transaction_hash.unwrap();
    node.process(vec![replay]).expect("processing");

    assert_eq!(node.processor.malformed_event_count(), 0);
    assert!(!node.db.event_processed(&replay_tx));
    assert_eq!(node.db.get_next_nonce(&owner), 1);
    assert_eq!(node.db.shares().get_by_pubkey(&pubkey).unwrap().owner, owner);
}

#[test]
// Owner B can neither re-register nor remove owner A's validator, while
// owner A's removal succeeds and clears the registry
fn foreign_owner_cannot_touch_validator() {
    let mut node = TestNode::new();
    let owner_a = Address::random();
    let owner_b = Address::random();
    let keys = node.operator_keys.clone();

    let registration = validator_added_log(owner_a, 0, &keys, false);
    let pubkey = registration.validator_pubkey;
    node.process(vec![registration.log]).expect("processing");

    // B re-registers A's validator key with a correctly signed payload:
    // rejected malformed on the owner check, and B's nonce still advances
    let hijack = validator_added_log_for_key(
        owner_b,
        0,
        &keys,
        &registration.validator_secret,
        false,
    );
    node.process(vec![hijack]).expect("processing");
    assert_eq!(node.processor.malformed_event_count(), 1);
    assert_eq!(node.db.get_next_nonce(&owner_b), 1);
    assert_eq!(
        node.db.shares().get_by_pubkey(&pubkey).unwrap().owner,
        owner_a
    );

    // B removes A's validator: malformed, nothing changes
    node.process(vec![validator_removed_log(owner_b, &pubkey, 4)])
        .expect("processing");
    assert_eq!(node.processor.malformed_event_count(), 2);
    assert!(node.db.shares().get_by_pubkey(&pubkey).is_some());

    // A removes its own validator: applied
    node.process(vec![validator_removed_log(owner_a, &pubkey, 4)])
        .expect("processing");
    assert!(node.db.shares().get_by_pubkey(&pubkey).is_none());

    // removal of an unknown key is malformed
    node.process(vec![validator_removed_log(owner_a, &pubkey, 4)])
        .expect("processing");
    assert_eq!(node.processor.malformed_event_count(), 3);
}

#[test]
// ClusterLiquidated flips every one of this operator's shares in the cluster
// and ClusterReactivated flips them back
fn cluster_liquidation_round_trip() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let keys = node.operator_keys.clone();

    let first = validator_added_log(owner, 0, &keys, false);
    let second = validator_added_log(owner, 1, &keys, false);
    let first_pubkey = first.validator_pubkey;
    let second_pubkey = second.validator_pubkey;
    node.process(vec![first.log]).expect("processing");
    node.process(vec![second.log]).expect("processing");

    let cluster_id = compute_cluster_id(owner, vec![1, 2, 3, 4]);
    assert_eq!(node.db.shares().get_by_cluster(&cluster_id).len(), 2);

    let liquidate = RegistryContract::ClusterLiquidated {
        owner,
        operatorIds: vec![1, 2, 3, 4],
    };
    node.process(vec![wrap_log(liquidate.encode_log_data(), B256::random())])
        .expect("processing");
    for pubkey in [&first_pubkey, &second_pubkey] {
        assert!(node.db.shares().get_by_pubkey(pubkey).unwrap().liquidated);
    }

    let reactivate = RegistryContract::ClusterReactivated {
        owner,
        operatorIds: vec![1, 2, 3, 4],
    };
    node.process(vec![wrap_log(reactivate.encode_log_data(), B256::random())])
        .expect("processing");
    for pubkey in [&first_pubkey, &second_pubkey] {
        assert!(!node.db.shares().get_by_pubkey(pubkey).unwrap().liquidated);
    }
}

#[test]
// Fee recipient updates are upserts keyed by owner
fn fee_recipient_updates() {
    let mut node = TestNode::new();
    let owner = Address::random();
    let recipient = Address::random();

    let event = RegistryContract::FeeRecipientAddressUpdated {
        owner,
        recipientAddress: recipient,
    };
    node.process(vec![wrap_log(event.encode_log_data(), B256::random())])
        .expect("processing");
    assert_eq!(node.db.fee_recipient(&owner), Some(recipient));
}

#[test]
// The processed-block watermark advances with each batch, empty or not
fn watermark_advances_per_block() {
    let mut node = TestNode::new();
    assert_eq!(node.db.get_last_processed_block(), 4);

    node.process(vec![]).expect("empty batch");
    assert_eq!(node.db.get_last_processed_block(), 5);

    node.processor.record_processed_block(100).expect("record");
    assert_eq!(node.db.get_last_processed_block(), 100);
}
