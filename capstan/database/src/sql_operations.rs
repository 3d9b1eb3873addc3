use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SqlStatement {
    InsertOperator,
    DeleteOperator,
    GetAllOperators,

    InsertValidator,
    InsertCommitteeMember,
    DeleteValidator,
    SetLiquidated,
    GetAllValidators,
    GetCommitteeMembers,

    InsertProcessedEvent,
    GetAllProcessedEvents,

    BumpNonce,
    GetAllNonces,

    UpsertRecipient,
    GetAllRecipients,

    InsertDecidedInstance,
    DeleteDecidedInstances,

    UpdateBlockNumber,
    GetBlockNumber,
}

pub(crate) static SQL: LazyLock<HashMap<SqlStatement, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    m.insert(
        SqlStatement::InsertOperator,
        "INSERT INTO operators (operator_id, public_key, owner_address) VALUES (?1, ?2, ?3)",
    );
    m.insert(
        SqlStatement::DeleteOperator,
        "DELETE FROM operators WHERE operator_id = ?1",
    );
    m.insert(
        SqlStatement::GetAllOperators,
        "SELECT operator_id, public_key, owner_address FROM operators",
    );

    m.insert(
        SqlStatement::InsertValidator,
        "INSERT INTO validators (validator_pubkey, owner, cluster_id, quorum, partial_quorum, \
         domain, liquidated, graffiti, own_share_pubkey, own_share_secret, validator_index, \
         activation_epoch) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    );
    m.insert(
        SqlStatement::InsertCommitteeMember,
        "INSERT INTO committee_members (validator_pubkey, position, operator_id, share_pubkey) \
         VALUES (?1, ?2, ?3, ?4)",
    );
    m.insert(
        SqlStatement::DeleteValidator,
        "DELETE FROM validators WHERE validator_pubkey = ?1",
    );
    m.insert(
        SqlStatement::SetLiquidated,
        "UPDATE validators SET liquidated = ?1 WHERE validator_pubkey = ?2",
    );
    m.insert(
        SqlStatement::GetAllValidators,
        "SELECT validator_pubkey, owner, cluster_id, quorum, partial_quorum, domain, liquidated, \
         graffiti, own_share_pubkey, own_share_secret, validator_index, activation_epoch \
         FROM validators",
    );
    m.insert(
        SqlStatement::GetCommitteeMembers,
        "SELECT operator_id, share_pubkey FROM committee_members WHERE validator_pubkey = ?1 \
         ORDER BY position",
    );

    m.insert(
        SqlStatement::InsertProcessedEvent,
        "INSERT OR IGNORE INTO processed_events (tx_hash) VALUES (?1)",
    );
    m.insert(
        SqlStatement::GetAllProcessedEvents,
        "SELECT tx_hash FROM processed_events",
    );

    m.insert(
        SqlStatement::BumpNonce,
        "INSERT INTO nonces (owner, nonce) VALUES (?1, 1) \
         ON CONFLICT (owner) DO UPDATE SET nonce = nonce + 1",
    );
    m.insert(SqlStatement::GetAllNonces, "SELECT owner, nonce FROM nonces");

    m.insert(
        SqlStatement::UpsertRecipient,
        "INSERT INTO recipients (owner, fee_recipient) VALUES (?1, ?2) \
         ON CONFLICT (owner) DO UPDATE SET fee_recipient = excluded.fee_recipient",
    );
    m.insert(
        SqlStatement::GetAllRecipients,
        "SELECT owner, fee_recipient FROM recipients",
    );

    m.insert(
        SqlStatement::InsertDecidedInstance,
        "INSERT OR IGNORE INTO decided_instances (msg_id) VALUES (?1)",
    );
    m.insert(
        SqlStatement::DeleteDecidedInstances,
        "DELETE FROM decided_instances WHERE msg_id = ?1",
    );

    m.insert(
        SqlStatement::UpdateBlockNumber,
        "UPDATE sync_state SET last_processed_block = ?1 WHERE id = 0",
    );
    m.insert(
        SqlStatement::GetBlockNumber,
        "SELECT last_processed_block FROM sync_state WHERE id = 0",
    );
    m
});
