use crate::share::PublicKeyBytes;

/// 4-byte tag identifying the network whose messages we sign and accept
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Default)]
pub struct DomainType(pub [u8; 4]);

pub const MAINNET_DOMAIN: DomainType = DomainType([0, 0, 0, 1]);
pub const HOLESKY_DOMAIN: DomainType = DomainType([0, 0, 5, 2]);

/// The duty family a message identifier refers to
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Role {
    Attester,
    Aggregator,
    Proposer,
    SyncCommittee,
    SyncCommitteeContribution,
    ValidatorRegistration,
}

impl Role {
    fn into_message_id_bytes(self) -> [u8; 4] {
        match self {
            Role::Attester => [0, 0, 0, 0],
            Role::Aggregator => [1, 0, 0, 0],
            Role::Proposer => [2, 0, 0, 0],
            Role::SyncCommittee => [3, 0, 0, 0],
            Role::SyncCommitteeContribution => [4, 0, 0, 0],
            Role::ValidatorRegistration => [5, 0, 0, 0],
        }
    }
}

/// Identifier routing a consensus message to the duty runner it belongs to:
/// domain || role || validator public key
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct MsgId(pub [u8; 56]);

impl MsgId {
    pub fn new(domain: &DomainType, role: Role, validator_pubkey: &PublicKeyBytes) -> Self {
        let mut id = [0; 56];
        id[0..4].copy_from_slice(&domain.0);
        id[4..8].copy_from_slice(&role.into_message_id_bytes());
        id[8..].copy_from_slice(validator_pubkey.as_slice());
        MsgId(id)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// The duty family the identifier routes to, if the tag is known
    pub fn role(&self) -> Option<Role> {
        match self.0[4] {
            0 => Some(Role::Attester),
            1 => Some(Role::Aggregator),
            2 => Some(Role::Proposer),
            3 => Some(Role::SyncCommittee),
            4 => Some(Role::SyncCommitteeContribution),
            5 => Some(Role::ValidatorRegistration),
            _ => None,
        }
    }

    /// The validator public key the identifier routes to
    pub fn validator_pubkey(&self) -> PublicKeyBytes {
        let mut bytes = [0u8; 48];
        bytes.copy_from_slice(&self.0[8..]);
        PublicKeyBytes(bytes)
    }
}
