use dvt_types::{MessageKind, OperatorId};
use std::fmt::Display;

/// Reasons a signed consensus message is dropped. These are message-level
/// rejections: the message is discarded and a counter ticks, nothing more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    SizeExceeded { size: usize, max: usize },
    InvalidSignatureFormat { length: usize },
    NoSigners,
    SignersNotSorted,
    DuplicatedSigner,
    SignerNotInCommittee(OperatorId),
    SignerNotLeader { got: OperatorId, want: OperatorId },
    NonDecidedWithMultipleSigners { count: usize },
    DecidedSignerCountOutOfRange { count: usize, quorum: u64, committee_size: usize },
    UnknownMessageRole,
    EarlyMessage,
    LateMessage,
    InvalidRound { round: u64 },
    RoundTooHigh { round: u64, max_round: u64 },
    EstimatedRoundTooHigh { estimated: u64, max_round: u64 },
    RoundTooFarFromEstimated { round: u64, estimated: u64 },
    FullDataHashMismatch,
    SlotAlreadyAdvanced { slot: u64, state_slot: u64 },
    RoundAlreadyAdvanced { round: u64, state_round: u64 },
    DuplicateProposalWithDifferentData,
    DecidedWithoutMoreSigners { count: usize, previous: usize },
    UnexpectedMessage { kind: MessageKind },
    TooManyMessagesPerRound,
    InvalidSignature,
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ValidationError {}
