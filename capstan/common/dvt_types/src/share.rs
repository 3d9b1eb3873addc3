use crate::msgid::DomainType;
use crate::{Epoch, OperatorId};
use alloy::primitives::Address;
use derive_more::{Deref, From};
use std::fmt;
use std::str::FromStr;

/// Length of a BLS public key
pub const PUBLIC_KEY_LENGTH: usize = 48;

/// Unique identifier for a cluster of operators, computed as
/// keccak256(owner || sorted operator ids)
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, From, Deref)]
pub struct ClusterId(pub [u8; 32]);

/// A 48-byte compressed BLS public key
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PublicKeyBytes(pub [u8; PUBLIC_KEY_LENGTH]);

impl PublicKeyBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, String> {
        let array: [u8; PUBLIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| format!("Invalid public key length: {}", bytes.len()))?;
        Ok(Self(array))
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for PublicKeyBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let data = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| format!("Failed to decode public key hex: {}", e))?;
        Self::from_slice(&data)
    }
}

/// 32-byte graffiti included in blocks proposed on behalf of the validator
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, From, Deref)]
pub struct Graffiti(pub [u8; 32]);

impl Graffiti {
    /// Default graffiti carried by blocks this node helps propose
    pub fn capstan() -> Self {
        let mut bytes = [0u8; 32];
        bytes[..7].copy_from_slice(b"capstan");
        Graffiti(bytes)
    }
}

/// A member of a validator's committee: an operator and the public key of the
/// key-share it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeMember {
    pub operator_id: OperatorId,
    pub share_pubkey: PublicKeyBytes,
}

/// This operator's own portion of a split validator key. Only present when the
/// local operator is a member of the committee.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnShare {
    /// Public key of the share held by this operator
    pub share_pubkey: PublicKeyBytes,
    /// The decrypted BLS secret scalar of the share
    pub secret: [u8; 32],
}

impl fmt::Debug for OwnShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print the secret scalar
        f.debug_struct("OwnShare")
            .field("share_pubkey", &self.share_pubkey)
            .finish_non_exhaustive()
    }
}

/// Beacon chain metadata for a validator, fetched out of band from the event log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeaconMetadata {
    pub index: u64,
    pub status: ValidatorStatus,
    pub activation_epoch: Epoch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidatorStatus {
    #[default]
    Unknown,
    Pending,
    Active,
    Exited,
}

/// A validator whose key is split across a committee of operators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorShare {
    /// Public key of the validator
    pub validator_pubkey: PublicKeyBytes,
    /// The EOA that registered the validator
    pub owner: Address,
    /// Identifier of the cluster the committee forms
    pub cluster_id: ClusterId,
    /// The full committee in registration order
    pub committee: Vec<CommitteeMember>,
    /// This operator's share, if it is a committee member
    pub own_share: Option<OwnShare>,
    /// Number of signers needed for a decision
    pub quorum: u64,
    /// Number of signers needed for a partial quorum
    pub partial_quorum: u64,
    /// Signing domain of the network the validator lives on
    pub domain: DomainType,
    /// Whether the cluster backing this validator has been liquidated
    pub liquidated: bool,
    /// Beacon chain metadata, populated downstream of event processing
    pub metadata: Option<BeaconMetadata>,
    /// Graffiti for proposals
    pub graffiti: Graffiti,
}

impl ValidatorShare {
    /// Whether the given operator is a member of this validator's committee
    pub fn belongs_to(&self, id: OperatorId) -> bool {
        self.committee.iter().any(|member| member.operator_id == id)
    }

    pub fn committee_size(&self) -> usize {
        self.committee.len()
    }
}

/// Derive the quorum and partial quorum sizes from the committee size.
/// A committee of `3f + 1` tolerates `f` faults.
pub fn compute_quorum_and_partial_quorum(committee_size: usize) -> (u64, u64) {
    let f = (committee_size.saturating_sub(1) / 3) as u64;
    let quorum = committee_size as u64 - f;
    (quorum, f + 1)
}
