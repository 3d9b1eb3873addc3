use crate::error::ExecutionError;
use crate::event_parser::EventDecoder;
use crate::gen::RegistryContract;
use alloy::primitives::Address;
use alloy::{rpc::types::Log, sol_types::SolEvent};
use dvt_types::{OperatorId, PublicKeyBytes};

/// Work the node owes its validator runners in response to a live event.
/// Only emitted during live sync; historical catch-up mutates state silently.
#[derive(Debug, PartialEq)]
pub enum RegistryTask {
    StartValidator {
        validator_pubkey: PublicKeyBytes,
    },
    StopValidator {
        validator_pubkey: PublicKeyBytes,
    },
    LiquidateCluster {
        owner: Address,
        operator_ids: Vec<OperatorId>,
    },
    ReactivateCluster {
        owner: Address,
        operator_ids: Vec<OperatorId>,
    },
    UpdateFeeRecipient {
        owner: Address,
        recipient: Address,
    },
    NoOp,
}

/// Parse a registry log into the task it implies
impl TryFrom<&Log> for RegistryTask {
    type Error = ExecutionError;

    fn try_from(source: &Log) -> Result<RegistryTask, Self::Error> {
        let Some(topic0) = source.topic0() else {
            return Ok(RegistryTask::NoOp);
        };
        match *topic0 {
            RegistryContract::ValidatorAdded::SIGNATURE_HASH => {
                let RegistryContract::ValidatorAdded { publicKey, .. } =
                    RegistryContract::ValidatorAdded::decode_from_log(source)?;
                let validator_pubkey =
                    PublicKeyBytes::from_slice(publicKey.as_ref()).map_err(|e| {
                        ExecutionError::MalformedEvent(format!("Failed to create PublicKey: {e}"))
                    })?;
                Ok(RegistryTask::StartValidator { validator_pubkey })
            }
            RegistryContract::ValidatorRemoved::SIGNATURE_HASH => {
                let RegistryContract::ValidatorRemoved { publicKey, .. } =
                    RegistryContract::ValidatorRemoved::decode_from_log(source)?;
                let validator_pubkey =
                    PublicKeyBytes::from_slice(publicKey.as_ref()).map_err(|e| {
                        ExecutionError::MalformedEvent(format!("Failed to create PublicKey: {e}"))
                    })?;
                Ok(RegistryTask::StopValidator { validator_pubkey })
            }
            RegistryContract::ClusterLiquidated::SIGNATURE_HASH => {
                let RegistryContract::ClusterLiquidated { owner, operatorIds } =
                    RegistryContract::ClusterLiquidated::decode_from_log(source)?;
                Ok(RegistryTask::LiquidateCluster {
                    owner,
                    operator_ids: operatorIds.into_iter().map(OperatorId).collect(),
                })
            }
            RegistryContract::ClusterReactivated::SIGNATURE_HASH => {
                let RegistryContract::ClusterReactivated { owner, operatorIds } =
                    RegistryContract::ClusterReactivated::decode_from_log(source)?;
                Ok(RegistryTask::ReactivateCluster {
                    owner,
                    operator_ids: operatorIds.into_iter().map(OperatorId).collect(),
                })
            }
            RegistryContract::FeeRecipientAddressUpdated::SIGNATURE_HASH => {
                let event = RegistryContract::FeeRecipientAddressUpdated::decode_from_log(source)?;
                Ok(RegistryTask::UpdateFeeRecipient {
                    owner: event.owner,
                    recipient: event.recipientAddress,
                })
            }
            _ => Ok(RegistryTask::NoOp),
        }
    }
}
