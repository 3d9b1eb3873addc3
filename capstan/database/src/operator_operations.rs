use super::{DatabaseError, RegistryDatabase, SqlStatement, Transaction, SQL, UNKNOWN_OPERATOR_ID};
use base64::prelude::*;
use dvt_types::{Operator, OperatorId};
use rusqlite::params;
use std::sync::atomic::Ordering;
use tracing::info;

/// Implements all operator related functionality on the registry
impl RegistryDatabase {
    /// Insert a new Operator into the registry
    pub fn insert_operator(
        &self,
        txn: &Transaction,
        operator: &Operator,
    ) -> Result<(), DatabaseError> {
        // Make sure that this operator does not already exist
        if self.operator_exists(&operator.id) {
            return Err(DatabaseError::AlreadyPresent(format!(
                "Operator with id {} already in registry",
                *operator.id
            )));
        }

        // Base64 encode the key for storage
        let pem_key = operator.pem();
        let encoded = BASE64_STANDARD.encode(&pem_key);

        txn.prepare_cached(SQL[&SqlStatement::InsertOperator])?
            .execute(params![
                *operator.id,               // The id of the registered operator
                encoded,                    // RSA public key
                operator.owner.to_string()  // The owner address of the operator
            ])?;

        // If the keys match, this is the local operator and we adopt the id
        let own_id = self.state.single_state.id.load(Ordering::Relaxed);
        if own_id == UNKNOWN_OPERATOR_ID
            && pem_key == self.pubkey.public_key_to_pem().unwrap_or_default()
        {
            info!(operator_id = *operator.id, "Adopted local operator id");
            self.state
                .single_state
                .id
                .store(*operator.id, Ordering::Relaxed);
        }

        self.state
            .single_state
            .operators
            .insert(operator.id, operator.to_owned());
        Ok(())
    }

    /// Remove an operator's row entirely. Not driven by OperatorRemoved
    /// events, which deliberately leave the row in place; kept for an
    /// eventual explicit purge.
    pub fn purge_operator(&self, txn: &Transaction, id: OperatorId) -> Result<(), DatabaseError> {
        if !self.operator_exists(&id) {
            return Err(DatabaseError::NotFound(format!(
                "Operator with id {} not in registry",
                *id
            )));
        }

        txn.prepare_cached(SQL[&SqlStatement::DeleteOperator])?
            .execute(params![*id])?;

        self.state.single_state.operators.remove(&id);
        Ok(())
    }
}
