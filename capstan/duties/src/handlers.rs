use crate::{BeaconNode, ReorgEvent, SchedulerError, ValidatorController};
use async_trait::async_trait;
use dvt_types::{BeaconConfig, Duty, Epoch, Role, Slot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Everything a role handler needs to run
pub struct HandlerContext<B, V> {
    pub beacon_node: Arc<B>,
    pub validator_controller: Arc<V>,
    pub beacon: BeaconConfig,
    pub slot_rx: broadcast::Receiver<Slot>,
    pub reorg_rx: broadcast::Receiver<ReorgEvent>,
    pub indices_rx: broadcast::Receiver<()>,
    pub duty_tx: mpsc::UnboundedSender<Duty>,
}

/// A per-role duty handler: fetches duties per epoch, caches them, emits
/// them at their slot, and invalidates on reorgs and validator-set changes
#[async_trait]
pub trait DutyHandler<B: BeaconNode, V: ValidatorController>: Send {
    fn name(&self) -> &'static str;
    async fn handle_duties(self: Box<Self>, ctx: HandlerContext<B, V>);
}

/// Duty cache per epoch, keyed by (slot, validator index)
type EpochDuties = HashMap<Epoch, HashMap<(Slot, u64), Duty>>;

// The attester and sync committee handlers share their whole shape: fetch
// the current and next epoch, refetch the current epoch when the previous
// dependent root moves and the next epoch when the current root moves.
struct EpochLookaheadHandler {
    name: &'static str,
    role: Role,
    duties: EpochDuties,
}

impl EpochLookaheadHandler {
    async fn run<B: BeaconNode, V: ValidatorController>(mut self, mut ctx: HandlerContext<B, V>) {
        loop {
            tokio::select! {
                slot = ctx.slot_rx.recv() => match slot {
                    Ok(slot) => self.on_slot(&mut ctx, slot).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(handler = self.name, missed, "Missed slot ticks");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reorg = ctx.reorg_rx.recv() => match reorg {
                    Ok(reorg) => self.on_reorg(&mut ctx, reorg).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // treat a missed reorg as a full invalidation
                        self.duties.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = ctx.indices_rx.recv() => match changed {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        debug!(handler = self.name, "Validator indices changed");
                        self.duties.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn on_slot<B: BeaconNode, V: ValidatorController>(
        &mut self,
        ctx: &mut HandlerContext<B, V>,
        slot: Slot,
    ) {
        let epoch = ctx.beacon.epoch_at_slot(slot);
        self.ensure_epoch(ctx, epoch).await;
        self.ensure_epoch(ctx, epoch.next()).await;
        self.duties.retain(|cached, _| cached.next() >= epoch);

        if let Some(epoch_duties) = self.duties.get(&epoch) {
            for duty in epoch_duties.values().filter(|duty| duty.slot == slot) {
                debug!(handler = self.name, slot = *slot, validator_index = duty.validator_index, "Emitting duty");
                let _ = ctx.duty_tx.send(duty.clone());
            }
        }
    }

    async fn on_reorg<B: BeaconNode, V: ValidatorController>(
        &mut self,
        ctx: &mut HandlerContext<B, V>,
        reorg: ReorgEvent,
    ) {
        let epoch = ctx.beacon.epoch_at_slot(reorg.slot);
        if reorg.previous {
            debug!(handler = self.name, epoch = *epoch, "Refetching current epoch after reorg");
            self.duties.remove(&epoch);
            self.ensure_epoch(ctx, epoch).await;
        }
        if reorg.current {
            debug!(handler = self.name, epoch = *epoch + 1, "Refetching next epoch after reorg");
            self.duties.remove(&epoch.next());
            self.ensure_epoch(ctx, epoch.next()).await;
        }
    }

    // Fetch duties for the epoch if they are not cached. Fetch failures are
    // logged and retried on the next slot tick.
    async fn ensure_epoch<B: BeaconNode, V: ValidatorController>(
        &mut self,
        ctx: &mut HandlerContext<B, V>,
        epoch: Epoch,
    ) {
        if self.duties.contains_key(&epoch) {
            return;
        }

        let indices = ctx.validator_controller.active_validator_indices(epoch);
        if indices.is_empty() {
            self.duties.insert(epoch, HashMap::new());
            return;
        }

        let fetched = match self.role {
            Role::SyncCommittee => ctx.beacon_node.sync_committee_duties(epoch, &indices).await,
            _ => ctx.beacon_node.attester_duties(epoch, &indices).await,
        };
        match fetched {
            Ok(duties) => {
                debug!(handler = self.name, epoch = *epoch, count = duties.len(), "Fetched duties");
                self.duties.insert(
                    epoch,
                    duties
                        .into_iter()
                        .map(|duty| ((duty.slot, duty.validator_index), duty))
                        .collect(),
                );
            }
            Err(e) => warn!(handler = self.name, epoch = *epoch, "Failed to fetch duties: {e}"),
        }
    }
}

/// Schedules attestation duties with a one-epoch lookahead
pub struct AttesterHandler(EpochLookaheadHandler);

impl AttesterHandler {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(EpochLookaheadHandler {
            name: "attester",
            role: Role::Attester,
            duties: HashMap::new(),
        })
    }
}

#[async_trait]
impl<B: BeaconNode, V: ValidatorController> DutyHandler<B, V> for AttesterHandler {
    fn name(&self) -> &'static str {
        self.0.name
    }

    async fn handle_duties(self: Box<Self>, ctx: HandlerContext<B, V>) {
        self.0.run(ctx).await
    }
}

/// Schedules sync committee duties with a one-epoch lookahead
pub struct SyncCommitteeHandler(EpochLookaheadHandler);

impl SyncCommitteeHandler {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(EpochLookaheadHandler {
            name: "sync_committee",
            role: Role::SyncCommittee,
            duties: HashMap::new(),
        })
    }
}

#[async_trait]
impl<B: BeaconNode, V: ValidatorController> DutyHandler<B, V> for SyncCommitteeHandler {
    fn name(&self) -> &'static str {
        self.0.name
    }

    async fn handle_duties(self: Box<Self>, ctx: HandlerContext<B, V>) {
        self.0.run(ctx).await
    }
}

/// Schedules block proposals for the current epoch. Proposer duties depend
/// on the current dependent root, so only `Reorg{current}` invalidates them.
pub struct ProposerHandler {
    duties: EpochDuties,
}

impl ProposerHandler {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            duties: HashMap::new(),
        }
    }

    async fn on_slot<B: BeaconNode, V: ValidatorController>(
        &mut self,
        ctx: &mut HandlerContext<B, V>,
        slot: Slot,
    ) {
        let epoch = ctx.beacon.epoch_at_slot(slot);
        self.ensure_epoch(ctx, epoch).await;
        self.duties.retain(|cached, _| *cached >= epoch);

        if let Some(epoch_duties) = self.duties.get(&epoch) {
            for duty in epoch_duties.values().filter(|duty| duty.slot == slot) {
                debug!(slot = *slot, validator_index = duty.validator_index, "Emitting proposer duty");
                let _ = ctx.duty_tx.send(duty.clone());
            }
        }
    }

    async fn ensure_epoch<B: BeaconNode, V: ValidatorController>(
        &mut self,
        ctx: &mut HandlerContext<B, V>,
        epoch: Epoch,
    ) {
        if self.duties.contains_key(&epoch) {
            return;
        }

        let indices = ctx.validator_controller.active_validator_indices(epoch);
        if indices.is_empty() {
            self.duties.insert(epoch, HashMap::new());
            return;
        }

        match ctx.beacon_node.proposer_duties(epoch, &indices).await {
            Ok(duties) => {
                debug!(epoch = *epoch, count = duties.len(), "Fetched proposer duties");
                self.duties.insert(
                    epoch,
                    duties
                        .into_iter()
                        .map(|duty| ((duty.slot, duty.validator_index), duty))
                        .collect(),
                );
            }
            Err(e) => warn!(epoch = *epoch, "Failed to fetch proposer duties: {e}"),
        }
    }
}

#[async_trait]
impl<B: BeaconNode, V: ValidatorController> DutyHandler<B, V> for ProposerHandler {
    fn name(&self) -> &'static str {
        "proposer"
    }

    async fn handle_duties(mut self: Box<Self>, mut ctx: HandlerContext<B, V>) {
        loop {
            tokio::select! {
                slot = ctx.slot_rx.recv() => match slot {
                    Ok(slot) => self.on_slot(&mut ctx, slot).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Proposer handler missed slot ticks");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                reorg = ctx.reorg_rx.recv() => match reorg {
                    Ok(reorg) if reorg.current => {
                        let epoch = ctx.beacon.epoch_at_slot(reorg.slot);
                        self.duties.remove(&epoch);
                        self.ensure_epoch(&mut ctx, epoch).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => self.duties.clear(),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = ctx.indices_rx.recv() => match changed {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => self.duties.clear(),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

/// Emits one validator-registration duty per validator per epoch, spread
/// across the epoch's slots by validator index
pub struct ValidatorRegistrationHandler;

impl ValidatorRegistrationHandler {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<B: BeaconNode, V: ValidatorController> DutyHandler<B, V> for ValidatorRegistrationHandler {
    fn name(&self) -> &'static str {
        "validator_registration"
    }

    async fn handle_duties(self: Box<Self>, mut ctx: HandlerContext<B, V>) {
        loop {
            let slot = match ctx.slot_rx.recv().await {
                Ok(slot) => slot,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            for share in ctx.validator_controller.operator_shares() {
                if share.liquidated {
                    continue;
                }
                let Some(metadata) = share.metadata else {
                    continue;
                };
                if metadata.index % ctx.beacon.slots_per_epoch != *slot % ctx.beacon.slots_per_epoch
                {
                    continue;
                }

                debug!(validator_index = metadata.index, slot = *slot, "Emitting registration duty");
                let _ = ctx.duty_tx.send(Duty {
                    role: Role::ValidatorRegistration,
                    validator_pubkey: share.validator_pubkey,
                    validator_index: metadata.index,
                    slot,
                    committee_index: 0,
                    committee_length: 0,
                    committees_at_slot: 0,
                    validator_committee_index: 0,
                });
            }
        }
    }
}
