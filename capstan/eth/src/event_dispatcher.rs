use crate::error::ExecutionError;
use crate::event_batcher::EventBatcher;
use crate::event_processor::EventProcessor;
use crate::execution_client::ExecutionClient;
use alloy::rpc::types::Log;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Readiness probe consulted before the pipeline starts. The execution
/// client itself is the usual implementation; tests substitute their own.
#[async_trait]
pub trait NodeProber: Send + Sync {
    async fn is_ready(&self) -> Result<bool, ExecutionError>;
}

#[async_trait]
impl NodeProber for ExecutionClient {
    async fn is_ready(&self) -> Result<bool, ExecutionError> {
        ExecutionClient::is_ready(self).await
    }
}

/// Drives the historical-then-live event pipeline:
/// ExecutionClient → EventBatcher → EventProcessor → registry.
pub struct EventDispatcher {
    execution_client: Arc<ExecutionClient>,
    event_batcher: EventBatcher,
    event_processor: Arc<EventProcessor>,
    node_prober: Option<Arc<dyn NodeProber>>,
}

impl EventDispatcher {
    pub fn new(
        execution_client: Arc<ExecutionClient>,
        event_batcher: EventBatcher,
        event_processor: Arc<EventProcessor>,
        node_prober: Option<Arc<dyn NodeProber>>,
    ) -> Self {
        Self {
            execution_client,
            event_batcher,
            event_processor,
            node_prober,
        }
    }

    /// Start the pipeline from `from_block`. Historical logs are fetched and
    /// applied synchronously with outward signalling off; any failure there
    /// is fatal and returned. Afterwards a background task streams live logs
    /// with signalling on; its errors are logged, not returned. A not-ready
    /// node yields `ExecutionError::NodeNotReady` for the caller to retry.
    pub async fn start(&self, from_block: u64) -> Result<(), ExecutionError> {
        info!(from_block, "Starting event dispatcher");

        if let Some(node_prober) = &self.node_prober {
            if !node_prober.is_ready().await? {
                return Err(ExecutionError::NodeNotReady);
            }
        }

        // Historical phase: catch the registry up without telling anyone
        let (logs, last_block) = self
            .execution_client
            .fetch_historical_logs(from_block)
            .await?;

        let batches = self.event_batcher.batch_events(feed_logs(logs));
        let mut last_processed_block = self
            .event_processor
            .handle_block_events_stream(batches, false)
            .await?;

        // An empty or sparse range still moves the watermark to the scanned
        // bound so the live phase does not rescan it
        if last_processed_block < last_block {
            self.event_processor.record_processed_block(last_block)?;
            last_processed_block = last_block;
        }

        info!(
            last_processed_block,
            "Finished processing historical events"
        );

        // Live phase: stream from the next block with task execution enabled
        let execution_client = Arc::clone(&self.execution_client);
        let event_processor = Arc::clone(&self.event_processor);
        let event_batcher = EventBatcher::new();
        tokio::spawn(async move {
            let logs = execution_client.stream_logs(last_processed_block + 1);
            let batches = event_batcher.batch_events(logs);
            match event_processor.handle_block_events_stream(batches, true).await {
                Ok(last_block) => {
                    info!(last_block, "Live event stream ended");
                }
                Err(e) => {
                    error!(?e, "Failed to handle live block events");
                }
            }
        });

        Ok(())
    }
}

// Turn an in-memory log vector into the stream shape the batcher consumes
fn feed_logs(logs: Vec<Log>) -> mpsc::Receiver<Log> {
    let (log_tx, log_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        for log in logs {
            if log_tx.send(log).await.is_err() {
                return;
            }
        }
    });
    log_rx
}
