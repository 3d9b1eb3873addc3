use alloy::primitives::{Address, B256};
use dashmap::{DashMap, DashSet};
use dvt_types::{Operator, OperatorId};
use openssl::{pkey::Public, rsa::Rsa};
use r2d2_sqlite::SqliteConnectionManager;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

pub use crate::error::DatabaseError;
pub use crate::share_index::ShareIndexMap;
use crate::sql_operations::{SqlStatement, SQL};

mod error;
mod event_operations;
mod operator_operations;
mod share_index;
mod sql_operations;
mod state;
mod validator_operations;

#[cfg(test)]
mod tests;

const POOL_SIZE: u32 = 1;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Sentinel for "we do not know our operator id yet". SQL integer keys are
/// bounded well below this.
const UNKNOWN_OPERATOR_ID: u64 = u64::MAX;

pub(crate) type Pool = r2d2::Pool<SqliteConnectionManager>;
pub(crate) type PoolConn = r2d2::PooledConnection<SqliteConnectionManager>;
pub type Transaction<'a> = rusqlite::Transaction<'a>;

// General registry information with single-key access
#[derive(Debug)]
struct SingleState {
    /// The ID of our own operator. This is determined via events when the
    /// operator is registered with the network, so it may not be available
    /// until the corresponding OperatorAdded event has been processed.
    id: AtomicU64,
    /// The last block whose events were fully applied
    last_processed_block: AtomicU64,
    /// All of the operators in the network
    operators: DashMap<OperatorId, Operator>,
    /// Registration nonce of each owner account
    nonces: DashMap<Address, u64>,
    /// Transaction hashes whose ValidatorAdded events were already processed
    processed_events: DashSet<B256>,
    /// Owner to fee recipient address, last writer wins
    recipients: DashMap<Address, Address>,
}

// Container to hold all registry state
#[derive(Debug)]
struct RegistryState {
    shares: ShareIndexMap,
    single_state: SingleState,
}

/// The operator-local registry. Holds in-memory stores for quick concurrent
/// access and a pooled connection to the backing database. Event handlers
/// mutate it inside one transaction per block batch.
#[derive(Debug)]
pub struct RegistryDatabase {
    /// The public key of our operator
    pubkey: Rsa<Public>,
    /// In-memory state stores rebuilt from disk at startup
    state: RegistryState,
    /// Connection to the database
    conn_pool: Pool,
}

impl RegistryDatabase {
    /// Open or create a registry at the given path for the operator owning
    /// the given public key
    pub fn new(path: &Path, pubkey: &Rsa<Public>) -> Result<Self, DatabaseError> {
        let conn_pool = Self::open_or_create(path)?;
        let state = RegistryState::new_with_state(&conn_pool, pubkey)?;
        Ok(Self {
            pubkey: pubkey.clone(),
            state,
            conn_pool,
        })
    }

    /// Begin a transaction covering one block batch. Every handler mutation
    /// for the batch goes through it; dropping it without commit rolls the
    /// batch back.
    pub fn connection(&self) -> Result<PoolConn, DatabaseError> {
        Ok(self.conn_pool.get()?)
    }

    /// Record that all events up to `block_number` have been applied
    pub fn processed_block(
        &self,
        txn: &Transaction,
        block_number: u64,
    ) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::UpdateBlockNumber])?
            .execute(rusqlite::params![block_number])?;
        self.state
            .single_state
            .last_processed_block
            .store(block_number, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }

    // Open an existing database at the given `path`, or create one if none exists.
    fn open_or_create(path: &Path) -> Result<Pool, DatabaseError> {
        if path.exists() {
            Self::open_conn_pool(path)
        } else {
            Self::create(path)
        }
    }

    // Build a new connection pool
    fn open_conn_pool(path: &Path) -> Result<Pool, DatabaseError> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON"));
        let conn_pool = Pool::builder()
            .max_size(POOL_SIZE)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)?;
        Ok(conn_pool)
    }

    // Create a database at the given path.
    fn create(path: &Path) -> Result<Pool, DatabaseError> {
        let _file = File::options()
            .write(true)
            .read(true)
            .create_new(true)
            .open(path)?;

        let conn_pool = Self::open_conn_pool(path)?;
        let conn = conn_pool.get()?;

        // create all of the tables
        conn.execute_batch(include_str!("table_schema.sql"))?;
        Ok(conn_pool)
    }
}
