use batch_verifier::VerifierConfig;
use dvt_types::{BeaconConfig, DomainType, MAINNET_DOMAIN};
use eth::ExecutionConfig;
use message_validation::ValidationConfig;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use std::path::PathBuf;

/// All recognized node options, with network-level defaults
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution endpoint and log-source tuning: finalization offset,
    /// connection timeout, reconnection intervals
    pub execution: ExecutionConfig,
    /// The block the registry contract was deployed at; event sync never
    /// starts below it
    pub contract_deployment_block: u64,
    /// Where the registry database lives
    pub db_path: PathBuf,
    /// PEM file holding this operator's RSA private key
    pub operator_key_path: PathBuf,
    /// Signing domain of the network
    pub domain: DomainType,
    /// Beacon chain timing
    pub beacon: BeaconConfig,
    /// Log state changes of every validator, not only our own
    pub full_node: bool,
    /// Schedule validator-registration duties for builder proposals
    pub builder_proposals: bool,
    /// Consensus message validation knobs
    pub validation: ValidationConfig,
    /// Batch verifier knobs
    pub verifier: VerifierConfig,
}

impl Config {
    pub fn new(
        execution: ExecutionConfig,
        contract_deployment_block: u64,
        db_path: PathBuf,
        operator_key_path: PathBuf,
        genesis_time: u64,
    ) -> Self {
        Self {
            execution,
            contract_deployment_block,
            db_path,
            operator_key_path,
            domain: MAINNET_DOMAIN,
            beacon: BeaconConfig::mainnet(genesis_time),
            full_node: false,
            builder_proposals: false,
            validation: ValidationConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }

    pub(crate) fn load_operator_key(&self) -> Result<Rsa<Private>, String> {
        let pem = std::fs::read(&self.operator_key_path)
            .map_err(|e| format!("Failed to read operator key file: {e}"))?;
        Rsa::private_key_from_pem(&pem)
            .map_err(|e| format!("Failed to parse operator key PEM: {e}"))
    }
}
