use crate::error::ExecutionError;
use crate::event_batcher::BlockBatch;
use crate::event_parser::EventDecoder;
use crate::gen::RegistryContract;
use crate::tasks::RegistryTask;
use crate::util::{
    compute_cluster_id, decrypt_share_secret, parse_shares, validate_operators,
    verify_nonce_signature,
};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use database::RegistryDatabase;
use database::Transaction;
use dvt_types::{
    compute_quorum_and_partial_quorum, CommitteeMember, DomainType, Graffiti, MsgId, Operator,
    OperatorId, OwnShare, PublicKeyBytes, Role, ValidatorShare,
};
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, error, info, trace, warn};

// ABI-encoded operator public key payload length
const OPERATOR_PUBKEY_PAYLOAD_LENGTH: usize = 704;

/// Applies block batches of registry events transactionally to the registry.
/// Each batch is one database transaction; malformed events are logged,
/// counted, and skipped forever, while any other failure rolls the batch
/// back and aborts the pipeline.
pub struct EventProcessor {
    /// The registry all event effects land in
    pub db: Arc<RegistryDatabase>,
    /// This operator's RSA key, used to decrypt its key-shares
    operator_key: Rsa<Private>,
    /// Signing domain stamped onto stored shares
    domain: DomainType,
    /// Log the validators of other operators too
    full_node: bool,
    /// Live-sync task sink; None during tests or historical-only runs
    task_tx: Option<UnboundedSender<RegistryTask>>,
    /// Events that parsed but were semantically invalid
    malformed_events: AtomicU64,
}

impl EventProcessor {
    pub fn new(
        db: Arc<RegistryDatabase>,
        operator_key: Rsa<Private>,
        domain: DomainType,
        full_node: bool,
        task_tx: Option<UnboundedSender<RegistryTask>>,
    ) -> Self {
        Self {
            db,
            operator_key,
            domain,
            full_node,
            task_tx,
            malformed_events: AtomicU64::new(0),
        }
    }

    /// Consume per-block batches until the stream closes. Returns the number
    /// of the last block whose events were committed. `execute_tasks` gates
    /// the outward task signalling: off during historical catch-up, on
    /// during live streaming.
    pub async fn handle_block_events_stream(
        &self,
        mut batches: mpsc::Receiver<BlockBatch>,
        execute_tasks: bool,
    ) -> Result<u64, ExecutionError> {
        let mut last_processed_block = self.db.get_last_processed_block();

        while let Some(batch) = batches.recv().await {
            trace!(
                block = batch.block_number,
                events = batch.events.len(),
                "Processing block batch"
            );
            self.process_block(&batch, execute_tasks)?;
            last_processed_block = batch.block_number;
        }

        Ok(last_processed_block)
    }

    /// Apply one block batch inside a single registry transaction
    pub fn process_block(
        &self,
        batch: &BlockBatch,
        execute_tasks: bool,
    ) -> Result<(), ExecutionError> {
        let mut conn = self.db.connection()?;
        let txn = conn
            .transaction()
            .map_err(|e| ExecutionError::Database(format!("Failed to open transaction: {e}")))?;

        for log in &batch.events {
            match self.dispatch_event(&txn, log) {
                Ok(()) => {
                    if execute_tasks {
                        self.emit_task(log);
                    }
                }
                Err(e) if e.is_malformed() => {
                    self.malformed_events.fetch_add(1, Ordering::Relaxed);
                    warn!(block = batch.block_number, "Malformed event: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        self.db.processed_block(&txn, batch.block_number)?;
        txn.commit()
            .map_err(|e| ExecutionError::Database(format!("Failed to commit block batch: {e}")))?;
        Ok(())
    }

    /// Persist the processed-block watermark outside of any batch, used when
    /// a scanned range contained no events
    pub fn record_processed_block(&self, block_number: u64) -> Result<(), ExecutionError> {
        let mut conn = self.db.connection()?;
        let txn = conn
            .transaction()
            .map_err(|e| ExecutionError::Database(format!("Failed to open transaction: {e}")))?;
        self.db.processed_block(&txn, block_number)?;
        txn.commit()
            .map_err(|e| ExecutionError::Database(format!("Failed to commit watermark: {e}")))?;
        Ok(())
    }

    /// Number of malformed events seen so far
    pub fn malformed_event_count(&self) -> u64 {
        self.malformed_events.load(Ordering::Relaxed)
    }

    fn dispatch_event(&self, txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let Some(topic0) = log.topic0() else {
            return Err(ExecutionError::DecodeError(
                "Log is missing topic0".to_string(),
            ));
        };

        match *topic0 {
            RegistryContract::OperatorAdded::SIGNATURE_HASH => {
                self.process_operator_added(txn, log)
            }
            RegistryContract::OperatorRemoved::SIGNATURE_HASH => {
                self.process_operator_removed(txn, log)
            }
            RegistryContract::ValidatorAdded::SIGNATURE_HASH => {
                self.process_validator_added(txn, log)
            }
            RegistryContract::ValidatorRemoved::SIGNATURE_HASH => {
                self.process_validator_removed(txn, log)
            }
            RegistryContract::ClusterLiquidated::SIGNATURE_HASH => {
                self.process_cluster_liquidated(txn, log)
            }
            RegistryContract::ClusterReactivated::SIGNATURE_HASH => {
                self.process_cluster_reactivated(txn, log)
            }
            RegistryContract::FeeRecipientAddressUpdated::SIGNATURE_HASH => {
                self.process_fee_recipient_updated(txn, log)
            }
            _ => {
                trace!(topic = ?topic0, "Ignoring unrelated log");
                Ok(())
            }
        }
    }

    // Convert a successfully handled live log into work for the runners
    fn emit_task(&self, log: &Log) {
        let Some(task_tx) = &self.task_tx else {
            return;
        };
        match RegistryTask::try_from(log) {
            Ok(RegistryTask::NoOp) => {}
            Ok(task) => {
                debug!(?task, "Registry task ready for processing");
                let _ = task_tx.send(task);
            }
            Err(e) => error!("Failed to convert log into RegistryTask: {e}"),
        }
    }

    // A new Operator has been registered in the network
    fn process_operator_added(&self, txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let RegistryContract::OperatorAdded {
            operatorId,
            owner,
            publicKey,
            ..
        } = RegistryContract::OperatorAdded::decode_from_log(log)?;
        let operator_id = OperatorId(operatorId);

        debug!(operator_id = ?operator_id, owner = ?owner, "Processing operator added");

        // The key payload is ABI re-encoded: a 64 byte header, then the
        // base64 PEM padded with zeros
        let data = publicKey.as_ref();
        if data.len() != OPERATOR_PUBKEY_PAYLOAD_LENGTH {
            return Err(ExecutionError::MalformedEvent(format!(
                "Invalid public key data length. Expected {}, got {}",
                OPERATOR_PUBKEY_PAYLOAD_LENGTH,
                data.len()
            )));
        }
        let pem_b64 = String::from_utf8(data[64..].to_vec())
            .map_err(|e| {
                ExecutionError::MalformedEvent(format!("Failed to convert to UTF8 String: {e}"))
            })?
            .trim_matches(char::from(0))
            .to_string();

        let operator = Operator::new(&pem_b64, operator_id, owner).map_err(|e| {
            ExecutionError::MalformedEvent(format!("Failed to construct operator: {e}"))
        })?;

        // The (public key, id) mapping is a bijection. The same registration
        // twice is a no-op; the same key under a new id is malformed.
        if let Some(existing) = self.db.operator_id_by_pem(&operator.pem()) {
            if existing == operator_id {
                debug!(operator_id = ?operator_id, "Operator already registered, skipping");
                return Ok(());
            }
            return Err(ExecutionError::MalformedEvent(format!(
                "Operator public key already registered with id {}",
                *existing
            )));
        }
        if self.db.operator_exists(&operator_id) {
            return Err(ExecutionError::MalformedEvent(format!(
                "Operator id {} already in use",
                *operator_id
            )));
        }

        self.db.insert_operator(txn, &operator)?;

        debug!(operator_id = ?operator_id, owner = ?owner, "Successfully registered operator");
        Ok(())
    }

    // An Operator has been removed from the network. The registry row stays
    // in place; duty assignment stops relying on the operator through the
    // shares it is removed from by later events.
    fn process_operator_removed(&self, _txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let RegistryContract::OperatorRemoved { operatorId } =
            RegistryContract::OperatorRemoved::decode_from_log(log)?;
        let operator_id = OperatorId(operatorId);

        if !self.db.operator_exists(&operator_id) {
            return Err(ExecutionError::MalformedEvent(format!(
                "Could not find operator with id {}",
                *operator_id
            )));
        }

        info!(operator_id = ?operator_id, "Operator removed from network; row retained");
        Ok(())
    }

    // A new validator has entered the network. Around the actual share
    // handling sits the idempotence bookkeeping: an event that stored a
    // share or was malformed marks its transaction processed and advances
    // the owner nonce, so a replay can never be applied twice.
    fn process_validator_added(&self, txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let event = RegistryContract::ValidatorAdded::decode_from_log(log)?;
        let tx_hash = log.transaction_hash.ok_or_else(|| {
            ExecutionError::RpcError("Log is missing transaction hash".to_string())
        })?;

        if self.db.event_processed(&tx_hash) {
            debug!(?tx_hash, "ValidatorAdded already processed, skipping");
            return Ok(());
        }

        let nonce = self.db.get_next_nonce(&event.owner);
        let result = self.handle_validator_added(txn, &event, nonce);

        // Deferred bookkeeping: performed when a share was stored or the
        // event was malformed. Fatal errors roll the whole block back, and
        // a benign repeat of an existing registration settles nothing.
        let settle = match &result {
            Ok(valid) => *valid,
            Err(e) => e.is_malformed(),
        };
        if settle {
            self.db.save_processed_event(txn, tx_hash)?;
            self.db.bump_nonce(txn, &event.owner)?;
        }

        result.map(|_| ())
    }

    // Returns whether a new share was stored; a well-formed event repeating
    // an existing registration is a no-op
    fn handle_validator_added(
        &self,
        txn: &Transaction,
        event: &RegistryContract::ValidatorAdded,
        nonce: u64,
    ) -> Result<bool, ExecutionError> {
        let validator_pubkey =
            PublicKeyBytes::from_slice(event.publicKey.as_ref()).map_err(|e| {
                ExecutionError::MalformedEvent(format!(
                    "Failed to deserialize validator public key: {e}"
                ))
            })?;
        debug!(
            owner = ?event.owner,
            validator_pubkey = %validator_pubkey,
            operator_count = event.operatorIds.len(),
            "Processing validator addition"
        );

        // Verify the shape of the operator set and that every member is known
        let operator_ids: Vec<OperatorId> =
            event.operatorIds.iter().copied().map(OperatorId).collect();
        validate_operators(&operator_ids).map_err(|e| {
            ExecutionError::MalformedEvent(format!("Failed to validate operators: {e}"))
        })?;
        if let Some(missing) = operator_ids.iter().find(|id| !self.db.operator_exists(id)) {
            return Err(ExecutionError::MalformedEvent(format!(
                "Operator {} is not registered",
                missing.0
            )));
        }

        let cluster_id = compute_cluster_id(event.owner, event.operatorIds.to_vec());

        // Split the share blob and verify the registration signature over
        // owner and nonce with the submitted validator key
        let (signature, share_pubkeys, encrypted_keys) =
            parse_shares(event.shares.as_ref(), operator_ids.len()).map_err(|e| {
                ExecutionError::MalformedEvent(format!("Failed to parse shares: {e}"))
            })?;
        if !verify_nonce_signature(&signature, nonce, &event.owner, &validator_pubkey) {
            return Err(ExecutionError::MalformedEvent(
                "Registration signature verification failed".to_string(),
            ));
        }

        if let Some(existing) = self.db.shares().get_by_pubkey(&validator_pubkey) {
            // Prevent re-registration of the same validator under another owner
            if existing.owner != event.owner {
                return Err(ExecutionError::MalformedEvent(format!(
                    "Validator share already exists with different owner address: expected {}, got {}",
                    existing.owner, event.owner
                )));
            }
            debug!(validator_pubkey = %validator_pubkey, "Validator already registered, skipping");
            return Ok(false);
        }

        let committee: Vec<CommitteeMember> = operator_ids
            .iter()
            .zip(&share_pubkeys)
            .map(|(operator_id, share_pubkey)| CommitteeMember {
                operator_id: *operator_id,
                share_pubkey: *share_pubkey,
            })
            .collect();

        // If we sit in the committee, recover our share secret and make sure
        // it actually produces the advertised share public key
        let own_share = match self.db.get_own_id() {
            Some(own_id) => match committee.iter().position(|m| m.operator_id == own_id) {
                Some(index) => {
                    let secret = decrypt_share_secret(
                        &self.operator_key,
                        &encrypted_keys[index],
                        &share_pubkeys[index],
                    )
                    .map_err(ExecutionError::MalformedEvent)?;
                    Some(OwnShare {
                        share_pubkey: share_pubkeys[index],
                        secret,
                    })
                }
                None => None,
            },
            None => None,
        };

        let (quorum, partial_quorum) = compute_quorum_and_partial_quorum(committee.len());
        let share = ValidatorShare {
            validator_pubkey,
            owner: event.owner,
            cluster_id,
            committee,
            own_share,
            quorum,
            partial_quorum,
            domain: self.domain,
            liquidated: false,
            metadata: None,
            graffiti: Graffiti::capstan(),
        };
        self.db.insert_validator(txn, &share)?;

        info!(
            validator_pubkey = %validator_pubkey,
            cluster_id = ?cluster_id,
            own_share = share.own_share.is_some(),
            "Successfully added validator"
        );
        Ok(true)
    }

    // A validator has been removed from the network by its owner
    fn process_validator_removed(&self, txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let RegistryContract::ValidatorRemoved {
            owner, publicKey, ..
        } = RegistryContract::ValidatorRemoved::decode_from_log(log)?;

        let validator_pubkey = PublicKeyBytes::from_slice(publicKey.as_ref()).map_err(|e| {
            ExecutionError::MalformedEvent(format!(
                "Failed to deserialize validator public key: {e}"
            ))
        })?;

        let Some(share) = self.db.shares().get_by_pubkey(&validator_pubkey) else {
            return Err(ExecutionError::MalformedEvent(
                "Could not find validator share".to_string(),
            ));
        };

        // Only the registering owner may remove the validator
        if owner != share.owner {
            return Err(ExecutionError::MalformedEvent(format!(
                "Validator share already exists with different owner address: expected {}, got {}",
                share.owner, owner
            )));
        }

        // Drop the decided history kept for the validator's duty runner
        let message_id = MsgId::new(&share.domain, Role::Attester, &validator_pubkey);
        self.db.delete_decided_instances(txn, &message_id)?;
        self.db.delete_validator(txn, &validator_pubkey)?;

        if share.own_share.is_some() || self.full_node {
            info!(validator_pubkey = %validator_pubkey, "Successfully removed validator");
        }
        Ok(())
    }

    // A cluster has run out of operational funds and is liquidated
    fn process_cluster_liquidated(&self, txn: &Transaction, log: &Log) -> Result<(), ExecutionError> {
        let RegistryContract::ClusterLiquidated { owner, operatorIds } =
            RegistryContract::ClusterLiquidated::decode_from_log(log)?;
        self.process_cluster_event(txn, owner, operatorIds, true)
    }

    // A previously liquidated cluster has been refunded and reactivated
    fn process_cluster_reactivated(
        &self,
        txn: &Transaction,
        log: &Log,
    ) -> Result<(), ExecutionError> {
        let RegistryContract::ClusterReactivated { owner, operatorIds } =
            RegistryContract::ClusterReactivated::decode_from_log(log)?;
        self.process_cluster_event(txn, owner, operatorIds, false)
    }

    fn process_cluster_event(
        &self,
        txn: &Transaction,
        owner: alloy::primitives::Address,
        operator_ids: Vec<u64>,
        liquidated: bool,
    ) -> Result<(), ExecutionError> {
        let cluster_id = compute_cluster_id(owner, operator_ids);
        let updated = self.db.update_cluster_status(txn, cluster_id, liquidated)?;

        if self.full_node {
            let cluster_validators: Vec<String> = self
                .db
                .shares()
                .get_by_cluster(&cluster_id)
                .iter()
                .map(|share| share.validator_pubkey.to_string())
                .collect();
            debug!(cluster_id = ?cluster_id, validators = ?cluster_validators, "Cluster status changed");
        }

        info!(
            cluster_id = ?cluster_id,
            owner = ?owner,
            updated = updated.len(),
            liquidated,
            "Processed cluster status event"
        );
        Ok(())
    }

    // The fee recipient address for an owner's validators has changed
    fn process_fee_recipient_updated(
        &self,
        txn: &Transaction,
        log: &Log,
    ) -> Result<(), ExecutionError> {
        let RegistryContract::FeeRecipientAddressUpdated {
            owner,
            recipientAddress,
        } = RegistryContract::FeeRecipientAddressUpdated::decode_from_log(log)?;

        self.db.update_fee_recipient(txn, owner, recipientAddress)?;

        debug!(
            owner = ?owner,
            new_recipient = ?recipientAddress,
            "Fee recipient address updated"
        );
        Ok(())
    }
}
