use crate::msgid::Role;
use crate::share::PublicKeyBytes;
use alloy::primitives::B256;
use derive_more::{Deref, From};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A fixed-duration time unit of the beacon chain
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, From, Deref, PartialOrd, Ord)]
pub struct Slot(pub u64);

impl Slot {
    pub fn saturating_sub(&self, other: u64) -> Slot {
        Slot(self.0.saturating_sub(other))
    }

    pub fn next(&self) -> Slot {
        Slot(self.0 + 1)
    }
}

/// 32 slots
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, From, Deref, PartialOrd, Ord)]
pub struct Epoch(pub u64);

impl Epoch {
    pub fn next(&self) -> Epoch {
        Epoch(self.0 + 1)
    }
}

/// Timing parameters of the beacon chain the operator serves
#[derive(Debug, Clone, Copy)]
pub struct BeaconConfig {
    /// Unix timestamp of the genesis slot, in seconds
    pub genesis_time: u64,
    pub slot_duration: Duration,
    pub slots_per_epoch: u64,
}

impl BeaconConfig {
    pub fn mainnet(genesis_time: u64) -> Self {
        Self {
            genesis_time,
            slot_duration: Duration::from_secs(12),
            slots_per_epoch: 32,
        }
    }

    /// Wall-clock start of the given slot, as a duration since the unix epoch
    pub fn slot_start(&self, slot: Slot) -> Duration {
        Duration::from_secs(self.genesis_time) + self.slot_duration * slot.0 as u32
    }

    pub fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        Epoch(slot.0 / self.slots_per_epoch)
    }

    pub fn first_slot_of_epoch(&self, epoch: Epoch) -> Slot {
        Slot(epoch.0 * self.slots_per_epoch)
    }

    /// The slot containing the given wall-clock instant. Instants before
    /// genesis map to slot zero.
    pub fn slot_at(&self, since_unix_epoch: Duration) -> Slot {
        let genesis = Duration::from_secs(self.genesis_time);
        if since_unix_epoch < genesis {
            return Slot(0);
        }
        Slot(((since_unix_epoch - genesis).as_millis() / self.slot_duration.as_millis()) as u64)
    }

    pub fn estimated_current_slot(&self) -> Slot {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.slot_at(now)
    }

    pub fn estimated_current_epoch(&self) -> Epoch {
        self.epoch_at_slot(self.estimated_current_slot())
    }

    /// Time remaining until the given instant within a slot, if it is in the future
    pub fn duration_until(&self, instant: Duration) -> Option<Duration> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        instant.checked_sub(now)
    }
}

/// A scheduled action a validator owes in a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duty {
    pub role: Role,
    pub validator_pubkey: PublicKeyBytes,
    pub validator_index: u64,
    pub slot: Slot,
    pub committee_index: u64,
    pub committee_length: u64,
    pub committees_at_slot: u64,
    pub validator_committee_index: u64,
}

/// A "head" event from the beacon node event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadEvent {
    pub slot: Slot,
    pub block: B256,
    pub previous_duty_dependent_root: B256,
    pub current_duty_dependent_root: B256,
}
