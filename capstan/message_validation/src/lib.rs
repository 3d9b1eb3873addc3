//! Stateful, rate-limited validation of incoming signed consensus messages.
//!
//! Every message is checked against the validator share it claims to act
//! for, against wall-clock timing for its slot and round, and against the
//! per-signer history kept for its (validator, role) pair. Cryptographic
//! verification runs last and is routed through the shared batch verifier.

pub use crate::error::ValidationError;
pub use crate::message_counts::{max_message_counts, MessageCounts};

mod error;
mod message_counts;

use alloy::primitives::keccak256;
use batch_verifier::BatchVerifier;
use blst::min_pk::{PublicKey, Signature};
use dashmap::DashMap;
use dvt_types::{
    BeaconConfig, ConsensusMessageType, DomainType, OperatorId, PublicKeyBytes, Role,
    SignedConsensusMessage, Slot, ValidatorShare, QBFT_SIGNATURE_TYPE, SIGNATURE_LENGTH,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::trace;

/// Rounds are indexed from one
const FIRST_ROUND: u64 = 1;

/// The first rounds of an instance time out quickly to converge fast
const QUICK_TIMEOUT: Duration = Duration::from_secs(2);
/// Rounds up to this threshold use the quick timeout
const QUICK_TIMEOUT_THRESHOLD: u64 = 8;
/// Later rounds back off to the slow timeout
const SLOW_TIMEOUT: Duration = Duration::from_secs(120);

/// Validation tuning knobs
#[derive(Debug, Clone, Copy)]
pub struct ValidationConfig {
    /// Upper bound on the encoded size of a consensus message
    pub max_consensus_msg_size: usize,
    /// Accepted window of message rounds below the estimated round
    pub allowed_rounds_in_past: u64,
    /// Accepted window of message rounds above the estimated round
    pub allowed_rounds_in_future: u64,
    /// Clock skew forgiven for messages arriving before their slot
    pub clock_error_tolerance: Duration,
    /// Whole slots a message may trail its slot before it is dropped
    pub late_slot_allowance: u64,
    /// Slots of per-signer state kept before compaction, at least two
    pub state_retention_slots: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_consensus_msg_size: 8 * 1024 * 1024,
            allowed_rounds_in_past: 1,
            allowed_rounds_in_future: 2,
            clock_error_tolerance: Duration::from_millis(50),
            late_slot_allowance: 2,
            state_retention_slots: 32,
        }
    }
}

/// Key of the per-validator, per-role consensus state
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ConsensusId {
    pub pubkey: PublicKeyBytes,
    pub role: Role,
}

/// What one signer has been observed doing for a (validator, role) pair
#[derive(Debug, Default, Clone)]
struct SignerState {
    slot: Slot,
    round: u64,
    message_counts: MessageCounts,
    proposal_data: Option<Vec<u8>>,
    last_decided_quorum_size: usize,
}

impl SignerState {
    // Start over at a new (slot, round)
    fn reset(&mut self, slot: Slot, round: u64) {
        self.slot = slot;
        self.round = round;
        self.message_counts = MessageCounts::default();
        self.proposal_data = None;
        self.last_decided_quorum_size = 0;
    }
}

/// Per (validator, role) state across its signers
#[derive(Debug, Default)]
struct ConsensusState {
    signers: HashMap<OperatorId, SignerState>,
    /// Highest slot any signer has reached, drives compaction
    last_slot: Slot,
}

/// The consensus message validator. One per node; shared by reference.
pub struct MessageValidator {
    beacon: BeaconConfig,
    domain: DomainType,
    config: ValidationConfig,
    batch_verifier: Arc<BatchVerifier>,
    consensus_states: DashMap<ConsensusId, Arc<Mutex<ConsensusState>>>,
}

impl MessageValidator {
    pub fn new(
        beacon: BeaconConfig,
        domain: DomainType,
        config: ValidationConfig,
        batch_verifier: Arc<BatchVerifier>,
    ) -> Self {
        Self {
            beacon,
            domain,
            config,
            batch_verifier,
            consensus_states: DashMap::new(),
        }
    }

    /// Validate a signed consensus message received at `received_at` (a
    /// duration since the unix epoch) on behalf of `share`. On success the
    /// per-signer counters are advanced; on failure nothing is recorded.
    pub async fn validate_consensus_message(
        &self,
        share: &ValidatorShare,
        msg: &SignedConsensusMessage,
        received_at: Duration,
    ) -> Result<(), ValidationError> {
        let size = msg.encoded_size();
        if size > self.config.max_consensus_msg_size {
            return Err(ValidationError::SizeExceeded {
                size,
                max: self.config.max_consensus_msg_size,
            });
        }

        // reject malformed signatures before any cryptography
        if msg.signature.len() != SIGNATURE_LENGTH {
            return Err(ValidationError::InvalidSignatureFormat {
                length: msg.signature.len(),
            });
        }

        self.validate_consensus_signers(share, msg)?;

        let role = msg
            .message
            .identifier
            .role()
            .ok_or(ValidationError::UnknownMessageRole)?;
        let slot = Slot(msg.message.height);
        self.validate_slot_time(slot, received_at)?;

        let round = msg.message.round;
        if round < FIRST_ROUND {
            return Err(ValidationError::InvalidRound { round });
        }
        let max_round = max_round(role);
        if round > max_round {
            return Err(ValidationError::RoundTooHigh { round, max_round });
        }

        let estimated = self.estimated_round(role, slot, received_at);
        if estimated > max_round {
            return Err(ValidationError::EstimatedRoundTooHigh {
                estimated,
                max_round,
            });
        }
        let lower = estimated.saturating_sub(self.config.allowed_rounds_in_past);
        let upper = estimated + self.config.allowed_rounds_in_future;
        if round < lower.max(FIRST_ROUND) || round > upper {
            return Err(ValidationError::RoundTooFarFromEstimated { round, estimated });
        }

        // proposals, round changes and decided certificates carry the full
        // proposed data, which must hash to the advertised root
        if msg.has_full_data() {
            let full_data = msg.message.full_data.as_deref().unwrap_or_default();
            if keccak256(full_data) != msg.message.root {
                return Err(ValidationError::FullDataHashMismatch);
            }
        }

        let id = ConsensusId {
            pubkey: msg.message.identifier.validator_pubkey(),
            role,
        };
        let state = self.consensus_state(id);

        {
            let mut state = state.lock().expect("consensus state lock poisoned");
            for signer in &msg.signers {
                Self::validate_signer_behavior(
                    state.signers.entry(*signer).or_default(),
                    msg,
                    share.committee_size(),
                )?;
            }
        }

        // all cheap checks passed; now the BLS verification
        let signature = Signature::from_bytes(&msg.signature)
            .map_err(|_| ValidationError::InvalidSignature)?;
        let mut pubkeys = Vec::with_capacity(msg.signers.len());
        for signer in &msg.signers {
            let member = share
                .committee
                .iter()
                .find(|m| m.operator_id == *signer)
                .ok_or(ValidationError::SignerNotInCommittee(*signer))?;
            let pubkey = PublicKey::from_bytes(member.share_pubkey.as_slice())
                .map_err(|_| ValidationError::InvalidSignature)?;
            pubkeys.push(pubkey);
        }
        let signing_root = qbft_signing_root(msg.message.root.as_slice(), &self.domain);
        if !self
            .batch_verifier
            .verify(signature, pubkeys, signing_root)
            .await
        {
            return Err(ValidationError::InvalidSignature);
        }

        // record the accepted message against every signer
        let kind = msg.kind();
        let mut state = state.lock().expect("consensus state lock poisoned");
        state.last_slot = state.last_slot.max(slot);
        for signer in &msg.signers {
            let signer_state = state.signers.entry(*signer).or_default();
            if msg.is_decided() {
                signer_state.last_decided_quorum_size = msg.signers.len();
            }
            if msg.has_full_data() && signer_state.proposal_data.is_none() {
                signer_state.proposal_data = msg.message.full_data.clone();
            }
            signer_state.message_counts.record(kind);
        }

        trace!(slot = *slot, round, ?kind, "Accepted consensus message");
        Ok(())
    }

    /// Drop consensus state that has fallen out of the retention window
    pub fn prune(&self, current_slot: Slot) {
        let cutoff = current_slot.saturating_sub(self.config.state_retention_slots.max(2));
        self.consensus_states.retain(|_, state| {
            state
                .lock()
                .map(|state| state.last_slot >= cutoff)
                .unwrap_or(false)
        });
    }

    /// Number of (validator, role) states currently held
    pub fn state_count(&self) -> usize {
        self.consensus_states.len()
    }

    fn consensus_state(&self, id: ConsensusId) -> Arc<Mutex<ConsensusState>> {
        self.consensus_states.entry(id).or_default().clone()
    }

    // Signer-set rules: who may sign what
    fn validate_consensus_signers(
        &self,
        share: &ValidatorShare,
        msg: &SignedConsensusMessage,
    ) -> Result<(), ValidationError> {
        if msg.signers.is_empty() {
            return Err(ValidationError::NoSigners);
        }

        if msg.signers.len() == 1 {
            // a proposal must come from the round's leader
            if msg.message.msg_type == ConsensusMessageType::Proposal {
                let want = round_robin_leader(share, msg.message.height, msg.message.round);
                if msg.signers[0] != want {
                    return Err(ValidationError::SignerNotLeader {
                        got: msg.signers[0],
                        want,
                    });
                }
            }
        } else if msg.message.msg_type != ConsensusMessageType::Commit {
            return Err(ValidationError::NonDecidedWithMultipleSigners {
                count: msg.signers.len(),
            });
        } else if (msg.signers.len() as u64) < share.quorum
            || msg.signers.len() > share.committee_size()
        {
            return Err(ValidationError::DecidedSignerCountOutOfRange {
                count: msg.signers.len(),
                quorum: share.quorum,
                committee_size: share.committee_size(),
            });
        }

        for pair in msg.signers.windows(2) {
            if pair[1] < pair[0] {
                return Err(ValidationError::SignersNotSorted);
            }
            if pair[1] == pair[0] {
                return Err(ValidationError::DuplicatedSigner);
            }
        }

        for signer in &msg.signers {
            if !share.belongs_to(*signer) {
                return Err(ValidationError::SignerNotInCommittee(*signer));
            }
        }
        Ok(())
    }

    // Accept messages only within a window around their slot's wall-clock span
    fn validate_slot_time(&self, slot: Slot, received_at: Duration) -> Result<(), ValidationError> {
        let slot_start = self.beacon.slot_start(slot);
        if received_at + self.config.clock_error_tolerance < slot_start {
            return Err(ValidationError::EarlyMessage);
        }

        let deadline = slot_start
            + self.beacon.slot_duration * (1 + self.config.late_slot_allowance) as u32
            + self.config.clock_error_tolerance;
        if received_at > deadline {
            return Err(ValidationError::LateMessage);
        }
        Ok(())
    }

    // The round a well-behaved instance would be in at `received_at`, given
    // the role's first-round delay and the quick/slow round timeouts
    fn estimated_round(&self, role: Role, slot: Slot, received_at: Duration) -> u64 {
        let first_round_start = self.beacon.slot_start(slot) + self.first_round_delay(role);
        let Some(since_first_round) = received_at.checked_sub(first_round_start) else {
            return FIRST_ROUND;
        };

        let quick_round = FIRST_ROUND + since_first_round.as_millis() as u64 / QUICK_TIMEOUT.as_millis() as u64;
        if quick_round <= QUICK_TIMEOUT_THRESHOLD {
            return quick_round;
        }

        let quick_span = QUICK_TIMEOUT * QUICK_TIMEOUT_THRESHOLD as u32;
        let since_slow = since_first_round - quick_span;
        QUICK_TIMEOUT_THRESHOLD + 1 + since_slow.as_millis() as u64 / SLOW_TIMEOUT.as_millis() as u64
    }

    // How long after slot start a role's first round begins
    fn first_round_delay(&self, role: Role) -> Duration {
        match role {
            Role::Attester | Role::SyncCommittee => self.beacon.slot_duration / 3,
            Role::Aggregator | Role::SyncCommitteeContribution => {
                self.beacon.slot_duration / 3 * 2
            }
            Role::Proposer | Role::ValidatorRegistration => Duration::ZERO,
        }
    }

    // Per-signer slot/round monotonicity, duplicate-proposal detection,
    // decided growth, and in-round quotas
    fn validate_signer_behavior(
        signer_state: &mut SignerState,
        msg: &SignedConsensusMessage,
        committee_size: usize,
    ) -> Result<(), ValidationError> {
        let slot = Slot(msg.message.height);
        let round = msg.message.round;

        if slot < signer_state.slot {
            return Err(ValidationError::SlotAlreadyAdvanced {
                slot: *slot,
                state_slot: *signer_state.slot,
            });
        }
        if slot == signer_state.slot && round < signer_state.round {
            return Err(ValidationError::RoundAlreadyAdvanced {
                round,
                state_round: signer_state.round,
            });
        }
        if slot > signer_state.slot || round > signer_state.round {
            signer_state.reset(slot, round);
        }

        // a proposer may not equivocate within a round
        if msg.has_full_data() {
            if let Some(previous) = &signer_state.proposal_data {
                let full_data = msg.message.full_data.as_deref().unwrap_or_default();
                if previous != full_data {
                    return Err(ValidationError::DuplicateProposalWithDifferentData);
                }
            }
        }

        // each decided certificate must grow the signer set
        if msg.is_decided() && msg.signers.len() <= signer_state.last_decided_quorum_size {
            return Err(ValidationError::DecidedWithoutMoreSigners {
                count: msg.signers.len(),
                previous: signer_state.last_decided_quorum_size,
            });
        }

        let kind = msg.kind();
        signer_state.message_counts.validate(kind)?;
        if signer_state
            .message_counts
            .reached_limits(kind, &max_message_counts(committee_size))
        {
            return Err(ValidationError::TooManyMessagesPerRound);
        }
        Ok(())
    }
}

/// The round-robin leader for a (height, round) pair
pub fn round_robin_leader(share: &ValidatorShare, height: u64, round: u64) -> OperatorId {
    let index =
        (height.wrapping_add(round.saturating_sub(FIRST_ROUND))) as usize % share.committee_size();
    share.committee[index].operator_id
}

/// Maximum admissible round for a role
pub fn max_round(role: Role) -> u64 {
    match role {
        Role::Attester | Role::Aggregator => 12,
        Role::Proposer | Role::SyncCommittee | Role::SyncCommitteeContribution => 6,
        Role::ValidatorRegistration => 0,
    }
}

/// The 32-byte signing root of a QBFT message: the data root bound to the
/// network domain and the QBFT signature type
pub fn qbft_signing_root(root: &[u8], domain: &DomainType) -> [u8; 32] {
    let mut input = Vec::with_capacity(root.len() + 8);
    input.extend_from_slice(root);
    input.extend_from_slice(&domain.0);
    input.extend_from_slice(&[QBFT_SIGNATURE_TYPE, 0, 0, 0]);
    keccak256(&input).0
}
