pub use beacon::{BeaconConfig, Duty, Epoch, HeadEvent, Slot};
pub use message::{
    ConsensusMessage, ConsensusMessageType, MessageKind, PartialSignatureKind,
    SignedConsensusMessage, QBFT_SIGNATURE_TYPE, SIGNATURE_LENGTH,
};
pub use msgid::{DomainType, MsgId, Role, HOLESKY_DOMAIN, MAINNET_DOMAIN};
pub use operator::{Operator, OperatorId};
pub use share::{
    compute_quorum_and_partial_quorum, BeaconMetadata, ClusterId, CommitteeMember, Graffiti,
    OwnShare, PublicKeyBytes, ValidatorShare, ValidatorStatus, PUBLIC_KEY_LENGTH,
};
mod beacon;
mod message;
mod msgid;
mod operator;
mod share;
mod util;
