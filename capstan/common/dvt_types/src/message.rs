use crate::msgid::MsgId;
use crate::OperatorId;
use alloy::primitives::B256;

/// Length of a compressed BLS signature
pub const SIGNATURE_LENGTH: usize = 96;

/// Signature-type tag mixed into the signing root of QBFT messages
pub const QBFT_SIGNATURE_TYPE: u8 = 2;

/// The QBFT wire message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusMessageType {
    Proposal,
    Prepare,
    Commit,
    RoundChange,
}

/// An unsigned QBFT consensus message
#[derive(Debug, Clone)]
pub struct ConsensusMessage {
    pub msg_type: ConsensusMessageType,
    /// The instance height; for duty instances this is the duty's slot
    pub height: u64,
    /// Rounds are indexed from 1
    pub round: u64,
    /// Identifier of the duty runner the message belongs to
    pub identifier: MsgId,
    /// Hash of the proposed data
    pub root: B256,
    /// The full proposed data. Present on proposals, round changes, and
    /// decided messages; absent elsewhere.
    pub full_data: Option<Vec<u8>>,
}

/// A consensus message together with its signer set and aggregated signature
#[derive(Debug, Clone)]
pub struct SignedConsensusMessage {
    pub signature: Vec<u8>,
    pub signers: Vec<OperatorId>,
    pub message: ConsensusMessage,
}

impl SignedConsensusMessage {
    /// A decided message is a commit carrying a quorum of signers
    pub fn is_decided(&self) -> bool {
        self.message.msg_type == ConsensusMessageType::Commit && self.signers.len() > 1
    }

    /// Whether this message type carries (and must hash-match) full data
    pub fn has_full_data(&self) -> bool {
        matches!(
            self.message.msg_type,
            ConsensusMessageType::Proposal | ConsensusMessageType::RoundChange
        ) || self.is_decided()
    }

    /// Size of the message as encoded on the wire
    pub fn encoded_size(&self) -> usize {
        // signature || signer list || type + height + round (u64 each) ||
        // identifier || root || full data
        self.signature.len()
            + self.signers.len() * 8
            + 8 * 3
            + 56
            + 32
            + self.message.full_data.as_ref().map_or(0, |d| d.len())
    }

    /// The quota bucket this message counts against
    pub fn kind(&self) -> MessageKind {
        match self.message.msg_type {
            ConsensusMessageType::Proposal => MessageKind::Proposal,
            ConsensusMessageType::Prepare => MessageKind::Prepare,
            ConsensusMessageType::Commit if self.signers.len() > 1 => MessageKind::Decided,
            ConsensusMessageType::Commit => MessageKind::Commit,
            ConsensusMessageType::RoundChange => MessageKind::RoundChange,
        }
    }
}

/// Partial-signature exchanges that surround a consensus instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialSignatureKind {
    /// Randao / selection proof / contribution proof / registration signatures
    PreConsensus,
    /// Post-consensus signature shares over the decided data
    PostConsensus,
}

/// Everything a signer can be rate-limited on within a single round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    PreConsensus,
    Proposal,
    Prepare,
    Commit,
    Decided,
    RoundChange,
    PostConsensus,
}
