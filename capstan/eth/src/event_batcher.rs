use alloy::rpc::types::Log;
use tokio::sync::mpsc;
use tracing::{error, warn};

const BATCH_CHANNEL_SIZE: usize = 256;

/// The ordered events of a single block
#[derive(Debug, Clone, Default)]
pub struct BlockBatch {
    pub block_number: u64,
    pub events: Vec<Log>,
}

/// Groups an ordered log stream into per-block batches. A batch is flushed
/// whenever the block number changes; batches come out in strictly
/// increasing block order with the input ordering preserved inside each.
#[derive(Debug, Default)]
pub struct EventBatcher;

impl EventBatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn batch_events(&self, mut logs: mpsc::Receiver<Log>) -> mpsc::Receiver<BlockBatch> {
        let (batch_tx, batch_rx) = mpsc::channel(BATCH_CHANNEL_SIZE);

        tokio::spawn(async move {
            let mut current: Option<BlockBatch> = None;

            while let Some(log) = logs.recv().await {
                let Some(block_number) = log.block_number else {
                    warn!("Dropping log without block number");
                    continue;
                };

                match &mut current {
                    Some(batch) if batch.block_number == block_number => {
                        batch.events.push(log);
                    }
                    Some(batch) if block_number < batch.block_number => {
                        // the log source promises ordering; an older block
                        // here would corrupt the batch invariant
                        error!(
                            block_number,
                            current_block = batch.block_number,
                            "Dropping out-of-order log"
                        );
                    }
                    _ => {
                        if let Some(batch) = current.take() {
                            if batch_tx.send(batch).await.is_err() {
                                return;
                            }
                        }
                        current = Some(BlockBatch {
                            block_number,
                            events: vec![log],
                        });
                    }
                }
            }

            // input closed: flush the trailing batch and close downstream
            if let Some(batch) = current {
                let _ = batch_tx.send(batch).await;
            }
        });

        batch_rx
    }
}
