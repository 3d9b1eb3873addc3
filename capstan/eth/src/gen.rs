use alloy::sol;

// Generate bindings around the validator registry contract
sol! {
    #[derive(Debug)]
    #[sol(rpc)]
    contract RegistryContract {
        event OperatorAdded(uint64 indexed operatorId, address indexed owner, bytes publicKey, uint256 fee);
        event OperatorRemoved(uint64 indexed operatorId);
        event ValidatorAdded(address indexed owner, uint64[] operatorIds, bytes publicKey, bytes shares);
        event ValidatorRemoved(address indexed owner, uint64[] operatorIds, bytes publicKey);
        event ClusterLiquidated(address indexed owner, uint64[] operatorIds);
        event ClusterReactivated(address indexed owner, uint64[] operatorIds);
        event FeeRecipientAddressUpdated(address indexed owner, address recipientAddress);
    }
}
