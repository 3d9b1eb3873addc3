use super::{DatabaseError, RegistryDatabase, SqlStatement, Transaction, SQL};
use alloy::primitives::{Address, B256};
use dvt_types::MsgId;
use rusqlite::params;

/// Bookkeeping the event pipeline performs around registry mutations
impl RegistryDatabase {
    /// Advance the registration nonce of the owner by one
    pub fn bump_nonce(&self, txn: &Transaction, owner: &Address) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::BumpNonce])?
            .execute(params![owner.to_string()])?;

        *self
            .state
            .single_state
            .nonces
            .entry(*owner)
            .or_insert(0) += 1;
        Ok(())
    }

    /// Mark the transaction hash of a ValidatorAdded event as processed
    pub fn save_processed_event(
        &self,
        txn: &Transaction,
        tx_hash: B256,
    ) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::InsertProcessedEvent])?
            .execute(params![tx_hash.as_slice()])?;

        self.state.single_state.processed_events.insert(tx_hash);
        Ok(())
    }

    /// Record a decided consensus instance for the given message id
    pub fn save_decided_instance(&self, msg_id: &MsgId) -> Result<(), DatabaseError> {
        let conn = self.connection()?;
        conn.prepare_cached(SQL[&SqlStatement::InsertDecidedInstance])?
            .execute(params![msg_id.as_slice()])?;
        Ok(())
    }

    /// Drop all decided instances stored for the given message id
    pub fn delete_decided_instances(
        &self,
        txn: &Transaction,
        msg_id: &MsgId,
    ) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::DeleteDecidedInstances])?
            .execute(params![msg_id.as_slice()])?;
        Ok(())
    }

    /// Whether a decided instance is stored for the given message id
    pub fn has_decided_instance(&self, msg_id: &MsgId) -> Result<bool, DatabaseError> {
        let conn = self.connection()?;
        let count: u64 = conn
            .prepare_cached("SELECT COUNT(*) FROM decided_instances WHERE msg_id = ?1")?
            .query_row(params![msg_id.as_slice()], |row| row.get(0))?;
        Ok(count > 0)
    }
}
