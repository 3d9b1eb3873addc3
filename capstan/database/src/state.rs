use crate::{
    DatabaseError, Pool, PoolConn, RegistryDatabase, RegistryState, ShareIndexMap, SingleState,
    SqlStatement, SQL, UNKNOWN_OPERATOR_ID,
};
use alloy::primitives::{Address, B256};
use base64::prelude::*;
use dashmap::{DashMap, DashSet};
use dvt_types::{
    BeaconMetadata, ClusterId, CommitteeMember, DomainType, Epoch, Graffiti, Operator, OperatorId,
    OwnShare, PublicKeyBytes, ValidatorShare, ValidatorStatus,
};
use openssl::pkey::Public;
use openssl::rsa::Rsa;
use rusqlite::types::Type;
use rusqlite::Error as SqlError;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

// Convert a TEXT column into an Address
fn address_column(row: &rusqlite::Row, idx: usize) -> Result<Address, SqlError> {
    let text = row.get::<_, String>(idx)?;
    Address::from_str(&text).map_err(|e| SqlError::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// Convert a TEXT column into a BLS public key
fn pubkey_column(row: &rusqlite::Row, idx: usize) -> Result<PublicKeyBytes, SqlError> {
    let text = row.get::<_, String>(idx)?;
    PublicKeyBytes::from_str(&text).map_err(|e| {
        SqlError::FromSqlConversionFailure(idx, Type::Text, Box::new(std::io::Error::other(e)))
    })
}

impl RegistryState {
    /// Rebuild the in-memory registry state from the database
    pub(crate) fn new_with_state(
        conn_pool: &Pool,
        pubkey: &Rsa<Public>,
    ) -> Result<Self, DatabaseError> {
        let conn = conn_pool.get()?;

        let last_processed_block = Self::fetch_last_processed_block(&conn)?;

        // Without an id we do not know which shares are ours. If an operator
        // with our public key is already registered, adopt its id; otherwise
        // the id arrives later via an OperatorAdded event.
        let operators = Self::fetch_operators(&conn)?;
        let own_pem = pubkey.public_key_to_pem().unwrap_or_default();
        let id = operators
            .iter()
            .find(|op| op.pem() == own_pem)
            .map(|op| *op.id)
            .unwrap_or(UNKNOWN_OPERATOR_ID);

        let shares = ShareIndexMap::new();
        for share in Self::fetch_validators(&conn)? {
            shares.insert(share);
        }

        let single_state = SingleState {
            id: AtomicU64::new(id),
            last_processed_block: AtomicU64::new(last_processed_block),
            operators: DashMap::from_iter(operators.into_iter().map(|op| (op.id, op))),
            nonces: DashMap::from_iter(Self::fetch_nonces(&conn)?),
            processed_events: DashSet::from_iter(Self::fetch_processed_events(&conn)?),
            recipients: DashMap::from_iter(Self::fetch_recipients(&conn)?),
        };

        Ok(Self {
            shares,
            single_state,
        })
    }

    fn fetch_last_processed_block(conn: &PoolConn) -> Result<u64, DatabaseError> {
        conn.prepare_cached(SQL[&SqlStatement::GetBlockNumber])?
            .query_row([], |row| row.get(0))
            .map_err(DatabaseError::from)
    }

    fn fetch_operators(conn: &PoolConn) -> Result<Vec<Operator>, DatabaseError> {
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetAllOperators])?;
        let operators = stmt.query_map([], |row| {
            let id = OperatorId(row.get(0)?);
            let encoded = row.get::<_, String>(1)?;
            let pem = BASE64_STANDARD.decode(&encoded).map_err(|e| {
                SqlError::FromSqlConversionFailure(1, Type::Text, Box::new(e))
            })?;
            let rsa_pubkey = Rsa::public_key_from_pem(&pem).map_err(|e| {
                SqlError::FromSqlConversionFailure(1, Type::Text, Box::new(e))
            })?;
            let owner = address_column(row, 2)?;
            Ok(Operator::new_with_pubkey(rsa_pubkey, id, owner))
        })?;
        operators
            .map(|result| result.map_err(DatabaseError::from))
            .collect()
    }

    fn fetch_validators(conn: &PoolConn) -> Result<Vec<ValidatorShare>, DatabaseError> {
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetAllValidators])?;
        let validators = stmt
            .query_map([], |row| {
                let validator_pubkey = pubkey_column(row, 0)?;
                let owner = address_column(row, 1)?;
                let cluster_id: [u8; 32] = row
                    .get::<_, Vec<u8>>(2)?
                    .try_into()
                    .map_err(|_| SqlError::InvalidColumnType(2, "cluster_id".into(), Type::Blob))?;
                let quorum: u64 = row.get(3)?;
                let partial_quorum: u64 = row.get(4)?;
                let domain: [u8; 4] = row
                    .get::<_, Vec<u8>>(5)?
                    .try_into()
                    .map_err(|_| SqlError::InvalidColumnType(5, "domain".into(), Type::Blob))?;
                let liquidated: bool = row.get(6)?;
                let graffiti: [u8; 32] = row
                    .get::<_, Vec<u8>>(7)?
                    .try_into()
                    .map_err(|_| SqlError::InvalidColumnType(7, "graffiti".into(), Type::Blob))?;

                let own_share = match row.get::<_, Option<String>>(8)? {
                    Some(share_pubkey) => {
                        let secret: [u8; 32] = row
                            .get::<_, Vec<u8>>(9)?
                            .try_into()
                            .map_err(|_| SqlError::InvalidColumnType(9, "secret".into(), Type::Blob))?;
                        Some(OwnShare {
                            share_pubkey: PublicKeyBytes::from_str(&share_pubkey).map_err(|e| {
                                SqlError::FromSqlConversionFailure(
                                    8,
                                    Type::Text,
                                    Box::new(std::io::Error::other(e)),
                                )
                            })?,
                            secret,
                        })
                    }
                    None => None,
                };

                let activation_epoch: Option<u64> = row.get(11)?;
                let metadata = row.get::<_, Option<u64>>(10)?.map(|index| BeaconMetadata {
                    index,
                    status: ValidatorStatus::Unknown,
                    activation_epoch: Epoch(activation_epoch.unwrap_or(0)),
                });

                Ok(ValidatorShare {
                    validator_pubkey,
                    owner,
                    cluster_id: ClusterId(cluster_id),
                    committee: Vec::new(),
                    own_share,
                    quorum,
                    partial_quorum,
                    domain: DomainType(domain),
                    liquidated,
                    metadata,
                    graffiti: Graffiti(graffiti),
                })
            })?
            .map(|result| result.map_err(DatabaseError::from))
            .collect::<Result<Vec<_>, _>>()?;

        // Attach the committee to each validator in registration order
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetCommitteeMembers])?;
        validators
            .into_iter()
            .map(|mut share| {
                let members = stmt
                    .query_map([share.validator_pubkey.to_string()], |row| {
                        Ok(CommitteeMember {
                            operator_id: OperatorId(row.get(0)?),
                            share_pubkey: pubkey_column(row, 1)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                share.committee = members;
                Ok(share)
            })
            .collect()
    }

    fn fetch_nonces(conn: &PoolConn) -> Result<Vec<(Address, u64)>, DatabaseError> {
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetAllNonces])?;
        let nonces = stmt.query_map([], |row| {
            let owner = address_column(row, 0)?;
            let nonce = row.get::<_, u64>(1)?;
            Ok((owner, nonce))
        })?;
        nonces
            .map(|result| result.map_err(DatabaseError::from))
            .collect()
    }

    fn fetch_processed_events(conn: &PoolConn) -> Result<Vec<B256>, DatabaseError> {
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetAllProcessedEvents])?;
        let hashes = stmt.query_map([], |row| {
            let raw: [u8; 32] = row
                .get::<_, Vec<u8>>(0)?
                .try_into()
                .map_err(|_| SqlError::InvalidColumnType(0, "tx_hash".into(), Type::Blob))?;
            Ok(B256::from(raw))
        })?;
        hashes
            .map(|result| result.map_err(DatabaseError::from))
            .collect()
    }

    fn fetch_recipients(conn: &PoolConn) -> Result<Vec<(Address, Address)>, DatabaseError> {
        let mut stmt = conn.prepare(SQL[&SqlStatement::GetAllRecipients])?;
        let recipients = stmt.query_map([], |row| {
            Ok((address_column(row, 0)?, address_column(row, 1)?))
        })?;
        recipients
            .map(|result| result.map_err(DatabaseError::from))
            .collect()
    }
}

// Interface over state data
impl RegistryDatabase {
    /// Get a reference to the shares map
    pub fn shares(&self) -> &ShareIndexMap {
        &self.state.shares
    }

    /// Get the ID of our Operator if it exists
    pub fn get_own_id(&self) -> Option<OperatorId> {
        let id = self.state.single_state.id.load(Ordering::Relaxed);
        if id == UNKNOWN_OPERATOR_ID {
            None
        } else {
            Some(OperatorId(id))
        }
    }

    /// Get operator data from the in-memory store
    pub fn get_operator(&self, id: &OperatorId) -> Option<Operator> {
        self.state.single_state.operators.get(id).map(|v| v.clone())
    }

    /// Check if an operator exists
    pub fn operator_exists(&self, id: &OperatorId) -> bool {
        self.state.single_state.operators.contains_key(id)
    }

    /// Find the id registered for an operator public key, if any
    pub fn operator_id_by_pem(&self, pem: &[u8]) -> Option<OperatorId> {
        self.state
            .single_state
            .operators
            .iter()
            .find(|entry| entry.value().pem() == pem)
            .map(|entry| entry.value().id)
    }

    /// Get the last block that has been fully processed
    pub fn get_last_processed_block(&self) -> u64 {
        self.state
            .single_state
            .last_processed_block
            .load(Ordering::Relaxed)
    }

    /// The nonce expected for the owner's next validator registration
    pub fn get_next_nonce(&self, owner: &Address) -> u64 {
        self.state
            .single_state
            .nonces
            .get(owner)
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Whether the ValidatorAdded event in the given transaction was processed
    pub fn event_processed(&self, tx_hash: &B256) -> bool {
        self.state.single_state.processed_events.contains(tx_hash)
    }

    /// The fee recipient registered for an owner, if any
    pub fn fee_recipient(&self, owner: &Address) -> Option<Address> {
        self.state.single_state.recipients.get(owner).map(|v| *v)
    }
}
