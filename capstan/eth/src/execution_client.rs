use crate::error::ExecutionError;
use crate::gen::RegistryContract;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::{Filter, Log, SyncStatus};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use futures::future::{try_join_all, Future};
use futures::StreamExt;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Registry contract events the node tracks to stay in sync with the network
static REGISTRY_EVENTS: LazyLock<Vec<&str>> = LazyLock::new(|| {
    vec![
        RegistryContract::OperatorAdded::SIGNATURE,
        RegistryContract::OperatorRemoved::SIGNATURE,
        RegistryContract::ValidatorAdded::SIGNATURE,
        RegistryContract::ValidatorRemoved::SIGNATURE,
        RegistryContract::ClusterLiquidated::SIGNATURE,
        RegistryContract::ClusterReactivated::SIGNATURE,
        RegistryContract::FeeRecipientAddressUpdated::SIGNATURE,
    ]
});

/// Block range fetched per eth_getLogs call
const FETCH_BATCH_SIZE: u64 = 10_000;

/// Number of concurrent range fetches per group
const GROUP_SIZE: usize = 50;

/// Per-range retry budget before the fetch is considered failed
const MAX_RETRIES: i32 = 5;

/// Capacity of the live log stream
const STREAM_CHANNEL_SIZE: usize = 1_000;

/// RPC and WS client types
type RpcClient = RootProvider<Http<Client>>;
type WsClient = RootProvider<PubSubFrontend>;

/// Connection parameters of the log source
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub http_url: String,
    pub ws_url: String,
    pub contract_address: Address,
    /// Blocks below the head considered final
    pub finalization_offset: u64,
    /// Timeout applied to individual RPCs
    pub connection_timeout: Duration,
    pub reconnection_initial_interval: Duration,
    pub reconnection_max_interval: Duration,
}

impl ExecutionConfig {
    pub fn new(http_url: String, ws_url: String, contract_address: Address) -> Self {
        Self {
            http_url,
            ws_url,
            contract_address,
            finalization_offset: 64,
            connection_timeout: Duration::from_secs(10),
            reconnection_initial_interval: Duration::from_secs(1),
            reconnection_max_interval: Duration::from_secs(64),
        }
    }
}

/// A reconnecting source of registry contract logs. Historical ranges come
/// over HTTP; live logs follow the head subscription over WebSocket.
pub struct ExecutionClient {
    rpc_client: Arc<RpcClient>,
    config: ExecutionConfig,
}

impl ExecutionClient {
    /// Create a client and prove both endpoints are reachable
    pub async fn connect(config: ExecutionConfig) -> Result<Arc<Self>, ExecutionError> {
        info!(
            http_url = %config.http_url,
            ws_url = %config.ws_url,
            contract_address = ?config.contract_address,
            "Connecting to execution endpoint"
        );

        let http_url = config
            .http_url
            .parse()
            .map_err(|e| ExecutionError::SyncError(format!("Failed to parse HTTP URL: {e}")))?;
        let rpc_client: Arc<RpcClient> = Arc::new(ProviderBuilder::new().on_http(http_url));

        let client = Arc::new(Self { rpc_client, config });

        // Validate the websocket endpoint once up front; streaming re-dials
        // on demand. A failure here enters the backoff loop, which aborts
        // the process once the maximum interval is exhausted.
        if let Err(e) = client.connect_ws().await {
            warn!(?e, "Initial connection failed, retrying");
            let _ = client.reconnect_ws().await;
        }
        Ok(client)
    }

    /// True iff the endpoint responds and reports no sync in progress
    pub async fn is_ready(&self) -> Result<bool, ExecutionError> {
        let status = tokio::time::timeout(self.config.connection_timeout, self.rpc_client.syncing())
            .await
            .map_err(|_| ExecutionError::RpcError("Sync status request timed out".to_string()))?
            .map_err(|e| ExecutionError::RpcError(format!("Unable to fetch sync status: {e}")))?;

        Ok(matches!(status, SyncStatus::None))
    }

    /// Fetch all contract logs from `from_block` up to the finalized head.
    /// Returns the logs in `(block, log_index)` order together with the upper
    /// bound of the scanned range.
    pub async fn fetch_historical_logs(
        &self,
        from_block: u64,
    ) -> Result<(Vec<Log>, u64), ExecutionError> {
        let current_block = self.rpc_client.get_block_number().await.map_err(|e| {
            error!(?e, "Failed to fetch block number");
            ExecutionError::RpcError(format!("Unable to fetch block number: {e}"))
        })?;
        let last_block = current_block.saturating_sub(self.config.finalization_offset);

        if from_block > last_block {
            debug!(from_block, last_block, "Nothing below the finalized head");
            return Ok((Vec::new(), last_block));
        }

        info!(from_block, last_block, "Fetching historical logs");

        // Chunk the range into FETCH_BATCH_SIZE spans, fetched concurrently in
        // groups so a long backfill does not hold every response in flight
        let mut tasks: Vec<_> = (from_block..=last_block)
            .step_by(FETCH_BATCH_SIZE as usize)
            .map(|start| {
                let end = std::cmp::min(start + FETCH_BATCH_SIZE - 1, last_block);
                self.fetch_logs(start, end)
            })
            .collect();

        let mut logs = Vec::new();
        while !tasks.is_empty() {
            let group: Vec<_> = tasks.drain(..tasks.len().min(GROUP_SIZE)).collect();
            let group_logs: Vec<Vec<Log>> = try_join_all(group).await?;

            // The futures may resolve out of block order. Events within a
            // block retain their log-index ordering, so reassembling by block
            // number restores the global order.
            let mut ordered: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
            for log in group_logs.into_iter().flatten() {
                let block_number = log.block_number.ok_or_else(|| {
                    ExecutionError::RpcError("Log is missing block number".to_string())
                })?;
                ordered.entry(block_number).or_default().push(log);
            }
            logs.extend(ordered.into_values().flatten());
        }

        info!(log_count = logs.len(), last_block, "Fetched historical logs");
        Ok((logs, last_block))
    }

    /// Stream live contract logs starting at `from_block`. Each new head
    /// triggers a fetch of `[next, head]`; errors reconnect with backoff and
    /// resume from the last fully delivered block + 1. The stream ends when
    /// the receiver is dropped.
    pub fn stream_logs(self: &Arc<Self>, from_block: u64) -> mpsc::Receiver<Log> {
        let (log_tx, log_rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
        let client = Arc::clone(self);

        tokio::spawn(async move {
            let mut next_block = from_block;
            'stream: loop {
                let ws_client = client.reconnect_ws().await;
                let mut heads = match ws_client.subscribe_blocks().await {
                    Ok(subscription) => subscription.into_stream(),
                    Err(e) => {
                        warn!(?e, "Failed to subscribe to block stream, reconnecting");
                        continue;
                    }
                };

                info!(next_block, "Subscribed to block stream");
                while let Some(header) = heads.next().await {
                    let head = header.header.number;
                    if head < next_block {
                        continue;
                    }

                    match client.fetch_logs(next_block, head).await {
                        Ok(logs) => {
                            debug!(
                                log_count = logs.len(),
                                from = next_block,
                                to = head,
                                "Streaming logs"
                            );
                            for log in logs {
                                if log_tx.send(log).await.is_err() {
                                    debug!("Log stream consumer dropped, stopping");
                                    break 'stream;
                                }
                            }
                            next_block = head + 1;
                        }
                        Err(e) => {
                            error!(?e, "Live log fetch failed, reconnecting");
                            break;
                        }
                    }
                }
                warn!("Block stream ended, reconnecting");
            }
        });

        log_rx
    }

    // Construct a future that fetches logs in `from_block..=to_block` with a
    // bounded retry and jitter on transient failures
    fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, ExecutionError>> {
        let rpc_client = self.rpc_client.clone();
        let filter = Filter::new()
            .address(self.config.contract_address)
            .from_block(from_block)
            .to_block(to_block)
            .events(&*REGISTRY_EVENTS);

        async move {
            let mut retry_cnt = 0;
            loop {
                match rpc_client.get_logs(&filter).await {
                    Ok(logs) => {
                        return Ok(logs);
                    }
                    Err(e) => {
                        if retry_cnt > MAX_RETRIES {
                            error!(?e, retry_cnt, "Max retries exceeded while fetching logs");
                            return Err(ExecutionError::RpcError(
                                "Unable to fetch logs".to_string(),
                            ));
                        }

                        warn!(?e, retry_cnt, "Error fetching logs, retrying");
                        let jitter = rand::thread_rng().gen_range(0..=100);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        retry_cnt += 1;
                    }
                }
            }
        }
    }

    // A single websocket connection attempt bounded by the connection timeout
    async fn connect_ws(&self) -> Result<WsClient, ExecutionError> {
        let ws = WsConnect::new(&self.config.ws_url);
        tokio::time::timeout(
            self.config.connection_timeout,
            ProviderBuilder::new().on_ws(ws),
        )
        .await
        .map_err(|_| {
            ExecutionError::RpcError(format!(
                "Timed out connecting to WS: {}",
                self.config.ws_url
            ))
        })?
        .map_err(|e| {
            ExecutionError::RpcError(format!("Failed to bind to WS: {}, {}", self.config.ws_url, e))
        })
    }

    // Reconnect with exponential backoff. A failure at the maximum interval
    // is unrecoverable: the execution connection is required, so the process
    // aborts rather than spinning silently.
    async fn reconnect_ws(&self) -> WsClient {
        let mut interval = self.config.reconnection_initial_interval;
        loop {
            match self.connect_ws().await {
                Ok(ws_client) => return ws_client,
                Err(e) => {
                    if interval >= self.config.reconnection_max_interval {
                        error!(?e, ?interval, "Failed to reconnect to execution endpoint");
                        panic!("Execution client reconnection failed at max interval");
                    }
                    warn!(?e, ?interval, "Could not reconnect, still trying");
                }
            }
            tokio::time::sleep(interval).await;
            interval = std::cmp::min(interval * 2, self.config.reconnection_max_interval);
        }
    }
}
