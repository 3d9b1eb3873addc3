//! Wires the operator node together: registry database, chain-event
//! pipeline, consensus message validation, and duty scheduling.

pub use config::Config;

pub mod config;

use batch_verifier::BatchVerifier;
use database::RegistryDatabase;
use duties::{BeaconNode, DutyScheduler, SchedulerOptions, ValidatorController};
use dvt_types::{Duty, Epoch, ValidatorShare};
use eth::{
    EventBatcher, EventDispatcher, EventProcessor, ExecutionClient, ExecutionError, NodeProber,
    RegistryTask,
};
use message_validation::MessageValidator;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The delay between retries while the execution node is still syncing
const NODE_READY_RETRY: Duration = Duration::from_secs(10);

/// A running operator node core
pub struct Client {
    pub db: Arc<RegistryDatabase>,
    pub batch_verifier: Arc<BatchVerifier>,
    pub message_validator: Arc<MessageValidator>,
    config: Config,
    operator_key: Rsa<Private>,
}

impl Client {
    /// Load the operator key, open the registry, and build the shared
    /// verification components
    pub fn new(config: Config) -> Result<Self, String> {
        let operator_key = config.load_operator_key()?;
        let public_key = operator_key
            .public_key_to_pem()
            .and_then(|pem| Rsa::public_key_from_pem(&pem))
            .map_err(|e| format!("Failed to derive operator public key: {e}"))?;

        let db = Arc::new(
            RegistryDatabase::new(&config.db_path, &public_key)
                .map_err(|e| format!("Failed to open registry database: {e}"))?,
        );
        info!(
            operator_id = ?db.get_own_id(),
            validators = db.shares().length(),
            last_processed_block = db.get_last_processed_block(),
            "Opened registry"
        );

        let batch_verifier = BatchVerifier::new(config.verifier);
        let message_validator = Arc::new(MessageValidator::new(
            config.beacon,
            config.domain,
            config.validation,
            Arc::clone(&batch_verifier),
        ));

        Ok(Self {
            db,
            batch_verifier,
            message_validator,
            config,
            operator_key,
        })
    }

    /// Start the chain-event pipeline: historical catch-up, then live
    /// streaming. Returns the stream of registry tasks produced by live
    /// events. Blocks until the historical phase has completed, retrying
    /// while the execution node reports itself unready.
    pub async fn start_event_sync(&self) -> Result<mpsc::UnboundedReceiver<RegistryTask>, String> {
        let execution_client = ExecutionClient::connect(self.config.execution.clone())
            .await
            .map_err(|e| format!("Failed to connect execution client: {e}"))?;

        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let event_processor = Arc::new(EventProcessor::new(
            Arc::clone(&self.db),
            self.operator_key.clone(),
            self.config.domain,
            self.config.full_node,
            Some(task_tx),
        ));
        let dispatcher = EventDispatcher::new(
            Arc::clone(&execution_client),
            EventBatcher::new(),
            event_processor,
            Some(execution_client.clone() as Arc<dyn NodeProber>),
        );

        let from_block = (self.db.get_last_processed_block() + 1)
            .max(self.config.contract_deployment_block);
        loop {
            match dispatcher.start(from_block).await {
                Ok(()) => break,
                Err(ExecutionError::NodeNotReady) => {
                    warn!(
                        retry_in = ?NODE_READY_RETRY,
                        "Execution node not ready, waiting"
                    );
                    tokio::time::sleep(NODE_READY_RETRY).await;
                }
                Err(e) => return Err(format!("Event sync failed: {e}")),
            }
        }

        Ok(task_rx)
    }

    /// Start the duty scheduler against the given beacon node, dispatching
    /// matured duties into `execute_duty`. Also starts the consensus-state
    /// compaction loop.
    pub async fn start_duty_scheduler<B: BeaconNode>(
        &self,
        beacon_node: Arc<B>,
        indices_change: Option<mpsc::Receiver<()>>,
        execute_duty: mpsc::UnboundedSender<Duty>,
    ) -> Result<(), String> {
        let scheduler = DutyScheduler::new(SchedulerOptions {
            beacon_node,
            validator_controller: Arc::new(RegistryController {
                db: Arc::clone(&self.db),
            }),
            beacon: self.config.beacon,
            execute_duty,
            indices_change,
            builder_proposals: self.config.builder_proposals,
        });
        scheduler
            .start()
            .await
            .map_err(|e| format!("Failed to start duty scheduler: {e}"))?;

        // per-slot maintenance: compact per-signer consensus state and log
        // the verifier load
        let message_validator = Arc::clone(&self.message_validator);
        let batch_verifier = Arc::clone(&self.batch_verifier);
        let beacon = self.config.beacon;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(beacon.slot_duration);
            loop {
                interval.tick().await;
                message_validator.prune(beacon.estimated_current_slot());

                let stats = batch_verifier.stats();
                debug!(
                    pending_requests = stats.pending_requests,
                    pending_batches = stats.queued_batches,
                    busy_workers = stats.busy_workers,
                    "Batch verifier stats"
                );
            }
        });

        Ok(())
    }
}

/// Exposes the registry as the scheduler's validator controller
struct RegistryController {
    db: Arc<RegistryDatabase>,
}

impl ValidatorController for RegistryController {
    fn active_validator_indices(&self, _epoch: Epoch) -> Vec<u64> {
        self.db
            .shares()
            .operator_shares()
            .iter()
            .filter(|share| !share.liquidated)
            .filter_map(|share| share.metadata.map(|m| m.index))
            .collect()
    }

    fn operator_shares(&self) -> Vec<ValidatorShare> {
        self.db.shares().operator_shares()
    }
}
