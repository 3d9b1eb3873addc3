//! Slot-driven duty scheduling.
//!
//! Each beacon role owns a handler task that fetches duties per epoch,
//! caches them, and emits them when their slot matures. A shared head
//! tracker watches beacon head events for duty-dependent-root changes and
//! fans reorg notifications out to every handler. Attester and sync
//! committee duties additionally wait for the one-third-slot barrier, which
//! is released early when a head block for the slot has propagated.

pub use handlers::{
    AttesterHandler, DutyHandler, HandlerContext, ProposerHandler, SyncCommitteeHandler,
    ValidatorRegistrationHandler,
};

mod handlers;

use async_trait::async_trait;
use dvt_types::{BeaconConfig, Duty, Epoch, HeadEvent, Role, Slot, ValidatorShare};
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Time for a block to propagate around the nodes before duties for its
/// slot are released early
const BLOCK_PROPAGATION_DELAY: Duration = Duration::from_millis(200);

/// Capacity of the slot / reorg / indices fan-out channels
const FANOUT_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub enum SchedulerError {
    BeaconApi(String),
}

impl Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for SchedulerError {}

/// The beacon node surface the scheduler needs: per-epoch duty fetch and a
/// stream of head events
#[async_trait]
pub trait BeaconNode: Send + Sync + 'static {
    async fn attester_duties(
        &self,
        epoch: Epoch,
        indices: &[u64],
    ) -> Result<Vec<Duty>, SchedulerError>;
    async fn proposer_duties(
        &self,
        epoch: Epoch,
        indices: &[u64],
    ) -> Result<Vec<Duty>, SchedulerError>;
    async fn sync_committee_duties(
        &self,
        epoch: Epoch,
        indices: &[u64],
    ) -> Result<Vec<Duty>, SchedulerError>;
    async fn subscribe_head_events(&self) -> Result<mpsc::Receiver<HeadEvent>, SchedulerError>;
}

/// The validator-controller surface: which validators we act for
pub trait ValidatorController: Send + Sync + 'static {
    fn active_validator_indices(&self, epoch: Epoch) -> Vec<u64>;
    fn operator_shares(&self) -> Vec<ValidatorShare>;
}

/// A change of duty dependent roots observed in the head stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReorgEvent {
    pub slot: Slot,
    pub previous: bool,
    pub current: bool,
}

pub struct SchedulerOptions<B, V> {
    pub beacon_node: Arc<B>,
    pub validator_controller: Arc<V>,
    pub beacon: BeaconConfig,
    /// Sink the matured duties are dispatched into
    pub execute_duty: mpsc::UnboundedSender<Duty>,
    /// Notifications that the validator set changed
    pub indices_change: Option<mpsc::Receiver<()>>,
    /// Also schedule validator-registration duties
    pub builder_proposals: bool,
}

/// Per-role duty scheduling driven by slot ticks and beacon head events
pub struct DutyScheduler<B, V> {
    beacon_node: Arc<B>,
    validator_controller: Arc<V>,
    beacon: BeaconConfig,
    execute_duty: mpsc::UnboundedSender<Duty>,
    indices_change: Option<mpsc::Receiver<()>>,
    builder_proposals: bool,
}

impl<B: BeaconNode, V: ValidatorController> DutyScheduler<B, V> {
    pub fn new(opts: SchedulerOptions<B, V>) -> Self {
        Self {
            beacon_node: opts.beacon_node,
            validator_controller: opts.validator_controller,
            beacon: opts.beacon,
            execute_duty: opts.execute_duty,
            indices_change: opts.indices_change,
            builder_proposals: opts.builder_proposals,
        }
    }

    /// Subscribe to head events and spawn the ticker, the per-role handler
    /// tasks, and the dispatch loop. Returns once everything is running.
    pub async fn start(mut self) -> Result<(), SchedulerError> {
        info!("Duty scheduler started");

        let head_events = self.beacon_node.subscribe_head_events().await?;

        let (slot_tx, _) = broadcast::channel::<Slot>(FANOUT_CAPACITY);
        let (reorg_tx, _) = broadcast::channel::<ReorgEvent>(FANOUT_CAPACITY);
        let (indices_tx, _) = broadcast::channel::<()>(FANOUT_CAPACITY);
        let (head_slot_tx, head_slot_rx) = watch::channel(Slot(0));
        let (duty_tx, duty_rx) = mpsc::unbounded_channel::<Duty>();

        // Per-role handlers
        let mut handlers: Vec<Box<dyn DutyHandler<B, V>>> = vec![
            Box::new(AttesterHandler::new()),
            Box::new(ProposerHandler::new()),
            Box::new(SyncCommitteeHandler::new()),
        ];
        if self.builder_proposals {
            handlers.push(Box::new(ValidatorRegistrationHandler::new()));
        }
        for handler in handlers {
            let ctx = HandlerContext {
                beacon_node: Arc::clone(&self.beacon_node),
                validator_controller: Arc::clone(&self.validator_controller),
                beacon: self.beacon,
                slot_rx: slot_tx.subscribe(),
                reorg_rx: reorg_tx.subscribe(),
                indices_rx: indices_tx.subscribe(),
                duty_tx: duty_tx.clone(),
            };
            debug!(handler = handler.name(), "Starting duty handler");
            tokio::spawn(handler.handle_duties(ctx));
        }

        // Slot ticker, and the one-third barrier release it drives
        let beacon = self.beacon;
        let ticker_slot_tx = slot_tx.clone();
        let ticker_head_slot = head_slot_tx.clone();
        tokio::spawn(async move {
            loop {
                let slot = beacon.estimated_current_slot().next();
                sleep_until_unix(beacon.slot_start(slot)).await;
                let _ = ticker_slot_tx.send(slot);

                let barrier_head_slot = ticker_head_slot.clone();
                tokio::spawn(async move {
                    sleep_until_unix(beacon.slot_start(slot) + beacon.slot_duration / 3).await;
                    advance_head_slot(&barrier_head_slot, slot);
                });
            }
        });

        // Head events: reorg detection plus early barrier release
        let head_beacon = self.beacon;
        let head_reorg_tx = reorg_tx.clone();
        tokio::spawn(async move {
            let mut tracker = HeadTracker::default();
            let mut head_events = head_events;
            while let Some(event) = head_events.recv().await {
                let current_slot = head_beacon.estimated_current_slot();
                if let Some(reorg) = tracker.on_head_event(&head_beacon, event, current_slot) {
                    warn!(?reorg, "Duty dependent root changed");
                    let _ = head_reorg_tx.send(reorg);
                }

                let one_third = head_beacon.slot_start(event.slot) + head_beacon.slot_duration / 3;
                if now_unix() < one_third {
                    // the block is early: give it time to propagate, then
                    // release duties for its slot
                    let barrier_head_slot = head_slot_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(BLOCK_PROPAGATION_DELAY).await;
                        advance_head_slot(&barrier_head_slot, event.slot);
                    });
                }
            }
            debug!("Head event stream ended");
        });

        // Indices-change fan-out
        if let Some(mut indices_change) = self.indices_change.take() {
            let indices_fanout = indices_tx.clone();
            tokio::spawn(async move {
                while indices_change.recv().await.is_some() {
                    let _ = indices_fanout.send(());
                }
            });
        }

        // Dispatch matured duties, holding attester-family duties at the
        // one-third barrier
        let execute_duty = self.execute_duty.clone();
        tokio::spawn(async move {
            let mut duty_rx = duty_rx;
            while let Some(duty) = duty_rx.recv().await {
                let execute_duty = execute_duty.clone();
                let head_slot_rx = head_slot_rx.clone();
                tokio::spawn(async move {
                    if matches!(duty.role, Role::Attester | Role::SyncCommittee) {
                        wait_one_third_or_valid_block(head_slot_rx, duty.slot).await;
                    }
                    if execute_duty.send(duty).is_err() {
                        error!("Duty executor is gone");
                    }
                });
            }
        });

        Ok(())
    }
}

/// Block until a head block for `slot` has propagated or the wall clock
/// passed one third of the slot, whichever the head-slot channel sees first
pub async fn wait_one_third_or_valid_block(mut head_slot: watch::Receiver<Slot>, slot: Slot) {
    let _ = head_slot.wait_for(|head| *head >= slot).await;
}

// The head slot only moves forward
fn advance_head_slot(head_slot: &watch::Sender<Slot>, slot: Slot) {
    head_slot.send_if_modified(|current| {
        if slot > *current {
            *current = slot;
            true
        } else {
            false
        }
    });
}

/// Watches the duty dependent roots carried by head events and reports
/// changes as reorg events. Roots of all zeros mean "no baseline yet" and
/// never produce a reorg.
#[derive(Debug, Default)]
pub struct HeadTracker {
    last_block_epoch: Epoch,
    previous_duty_dependent_root: alloy::primitives::B256,
    current_duty_dependent_root: alloy::primitives::B256,
}

impl HeadTracker {
    /// Process a head event, returning the reorg it reveals, if any. Events
    /// for slots other than the estimated current slot are ignored.
    pub fn on_head_event(
        &mut self,
        beacon: &BeaconConfig,
        event: HeadEvent,
        current_slot: Slot,
    ) -> Option<ReorgEvent> {
        if event.slot != current_slot {
            return None;
        }

        let zero_root = alloy::primitives::B256::ZERO;
        let epoch = beacon.epoch_at_slot(event.slot);
        let mut reorg = None;

        if self.last_block_epoch != Epoch(0) {
            if epoch > self.last_block_epoch {
                // Epoch transition: the old current root must have become the
                // new previous root
                if self.previous_duty_dependent_root != zero_root
                    && self.current_duty_dependent_root != event.previous_duty_dependent_root
                {
                    reorg = Some(ReorgEvent {
                        slot: event.slot,
                        previous: true,
                        current: false,
                    });
                }
            } else {
                // Same epoch: both roots must be stable, and each moving on
                // its own flags its own duty window
                let previous = self.previous_duty_dependent_root != zero_root
                    && self.previous_duty_dependent_root != event.previous_duty_dependent_root;
                let current = self.current_duty_dependent_root != zero_root
                    && self.current_duty_dependent_root != event.current_duty_dependent_root;
                if previous || current {
                    reorg = Some(ReorgEvent {
                        slot: event.slot,
                        previous,
                        current,
                    });
                }
            }
        }

        self.last_block_epoch = epoch;
        self.previous_duty_dependent_root = event.previous_duty_dependent_root;
        self.current_duty_dependent_root = event.current_duty_dependent_root;
        reorg
    }
}

fn now_unix() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

async fn sleep_until_unix(target: Duration) {
    let remaining = target.saturating_sub(now_unix());
    if !remaining.is_zero() {
        tokio::time::sleep(remaining).await;
    }
}
