use super::{DatabaseError, RegistryDatabase, SqlStatement, Transaction, SQL};
use alloy::primitives::Address;
use dvt_types::{ClusterId, PublicKeyBytes, ValidatorShare};
use rusqlite::params;

/// Implements all validator share functionality on the registry
impl RegistryDatabase {
    /// Persist a newly registered validator and its committee
    pub fn insert_validator(
        &self,
        txn: &Transaction,
        share: &ValidatorShare,
    ) -> Result<(), DatabaseError> {
        if self.shares().get_by_pubkey(&share.validator_pubkey).is_some() {
            return Err(DatabaseError::AlreadyPresent(format!(
                "Validator {} already in registry",
                share.validator_pubkey
            )));
        }

        txn.prepare_cached(SQL[&SqlStatement::InsertValidator])?
            .execute(params![
                share.validator_pubkey.to_string(),
                share.owner.to_string(),
                share.cluster_id.0.as_slice(),
                share.quorum,
                share.partial_quorum,
                share.domain.0.as_slice(),
                share.liquidated,
                share.graffiti.0.as_slice(),
                share.own_share.as_ref().map(|own| own.share_pubkey.to_string()),
                share.own_share.as_ref().map(|own| own.secret.as_slice()),
                share.metadata.map(|m| m.index),
                share.metadata.map(|m| *m.activation_epoch),
            ])?;

        for (position, member) in share.committee.iter().enumerate() {
            txn.prepare_cached(SQL[&SqlStatement::InsertCommitteeMember])?
                .execute(params![
                    share.validator_pubkey.to_string(),
                    position as u64,
                    *member.operator_id,
                    member.share_pubkey.to_string(),
                ])?;
        }

        self.shares().insert(share.to_owned());
        Ok(())
    }

    /// Remove a validator and its committee. Deletion cascades to the
    /// committee member rows.
    pub fn delete_validator(
        &self,
        txn: &Transaction,
        validator_pubkey: &PublicKeyBytes,
    ) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::DeleteValidator])?
            .execute(params![validator_pubkey.to_string()])?;

        self.shares().remove(validator_pubkey);
        Ok(())
    }

    /// Flip the liquidated flag for every share of the cluster that belongs
    /// to this operator. Returns the public keys of the shares updated.
    pub fn update_cluster_status(
        &self,
        txn: &Transaction,
        cluster_id: ClusterId,
        liquidated: bool,
    ) -> Result<Vec<PublicKeyBytes>, DatabaseError> {
        let mut updated = Vec::new();
        for mut share in self.shares().get_by_cluster(&cluster_id) {
            if share.own_share.is_none() {
                continue;
            }

            txn.prepare_cached(SQL[&SqlStatement::SetLiquidated])?
                .execute(params![liquidated, share.validator_pubkey.to_string()])?;

            share.liquidated = liquidated;
            updated.push(share.validator_pubkey);
            self.shares().update(share);
        }
        Ok(updated)
    }

    /// Record the fee recipient chosen by an owner, last writer wins
    pub fn update_fee_recipient(
        &self,
        txn: &Transaction,
        owner: Address,
        fee_recipient: Address,
    ) -> Result<(), DatabaseError> {
        txn.prepare_cached(SQL[&SqlStatement::UpsertRecipient])?
            .execute(params![owner.to_string(), fee_recipient.to_string()])?;

        self.state
            .single_state
            .recipients
            .insert(owner, fee_recipient);
        Ok(())
    }
}
