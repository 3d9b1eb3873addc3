use alloy::primitives::Address;
use dashmap::DashMap;
use dvt_types::{ClusterId, PublicKeyBytes, ValidatorShare};

/// Concurrent view over every validator share known to the node, reachable
/// through the three keys event processing and duty scheduling need:
/// the validator public key (unique), the cluster id (one-to-many), and the
/// owner address (one-to-many).
///
/// Readers get a clone of the share, so every call observes a consistent
/// snapshot; writers go through the registry database which serializes them.
#[derive(Debug, Default)]
pub struct ShareIndexMap {
    primary: DashMap<PublicKeyBytes, ValidatorShare>,
    by_cluster: DashMap<ClusterId, Vec<PublicKeyBytes>>,
    by_owner: DashMap<Address, Vec<PublicKeyBytes>>,
}

impl ShareIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known validator shares
    pub fn length(&self) -> usize {
        self.primary.len()
    }

    pub fn insert(&self, share: ValidatorShare) {
        let pubkey = share.validator_pubkey;
        let cluster_id = share.cluster_id;
        let owner = share.owner;

        if self.primary.insert(pubkey, share).is_none() {
            // Only index new keys; an overwrite keeps its index entries
            self.by_cluster.entry(cluster_id).or_default().push(pubkey);
            self.by_owner.entry(owner).or_default().push(pubkey);
        }
    }

    /// Replace the stored share for an already-known validator
    pub fn update(&self, share: ValidatorShare) {
        if self.primary.contains_key(&share.validator_pubkey) {
            self.primary.insert(share.validator_pubkey, share);
        }
    }

    pub fn remove(&self, pubkey: &PublicKeyBytes) -> Option<ValidatorShare> {
        let (_, removed) = self.primary.remove(pubkey)?;
        self.by_cluster.retain(|_, keys| {
            keys.retain(|k| k != pubkey);
            !keys.is_empty()
        });
        self.by_owner.retain(|_, keys| {
            keys.retain(|k| k != pubkey);
            !keys.is_empty()
        });
        Some(removed)
    }

    pub fn get_by_pubkey(&self, pubkey: &PublicKeyBytes) -> Option<ValidatorShare> {
        self.primary.get(pubkey).map(|v| v.value().clone())
    }

    pub fn get_by_cluster(&self, cluster_id: &ClusterId) -> Vec<ValidatorShare> {
        self.collect(&self.by_cluster, cluster_id)
    }

    pub fn get_by_owner(&self, owner: &Address) -> Vec<ValidatorShare> {
        self.collect(&self.by_owner, owner)
    }

    /// Snapshot of every share held for this operator
    pub fn operator_shares(&self) -> Vec<ValidatorShare> {
        self.primary
            .iter()
            .filter(|entry| entry.value().own_share.is_some())
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn collect<K: Eq + std::hash::Hash>(
        &self,
        index: &DashMap<K, Vec<PublicKeyBytes>>,
        key: &K,
    ) -> Vec<ValidatorShare> {
        index
            .get(key)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| self.primary.get(k).map(|v| v.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod share_index_tests {
    use super::*;
    use dvt_types::{DomainType, Graffiti};

    fn share(tag: u8, cluster: u8, owner: Address) -> ValidatorShare {
        ValidatorShare {
            validator_pubkey: PublicKeyBytes([tag; 48]),
            owner,
            cluster_id: ClusterId([cluster; 32]),
            committee: vec![],
            own_share: None,
            quorum: 3,
            partial_quorum: 2,
            domain: DomainType::default(),
            liquidated: false,
            metadata: None,
            graffiti: Graffiti::default(),
        }
    }

    #[test]
    fn indexes_by_all_three_keys() {
        let map = ShareIndexMap::new();
        let owner = Address::random();
        map.insert(share(1, 9, owner));
        map.insert(share(2, 9, owner));

        assert!(map.get_by_pubkey(&PublicKeyBytes([1; 48])).is_some());
        assert_eq!(map.get_by_cluster(&ClusterId([9; 32])).len(), 2);
        assert_eq!(map.get_by_owner(&owner).len(), 2);
    }

    #[test]
    fn remove_clears_every_index() {
        let map = ShareIndexMap::new();
        let owner = Address::random();
        map.insert(share(1, 9, owner));

        assert!(map.remove(&PublicKeyBytes([1; 48])).is_some());
        assert!(map.get_by_pubkey(&PublicKeyBytes([1; 48])).is_none());
        assert!(map.get_by_cluster(&ClusterId([9; 32])).is_empty());
        assert!(map.get_by_owner(&owner).is_empty());
    }

    #[test]
    fn update_keeps_index_entries() {
        let map = ShareIndexMap::new();
        let owner = Address::random();
        map.insert(share(1, 9, owner));

        let mut updated = share(1, 9, owner);
        updated.liquidated = true;
        map.update(updated);

        let stored = map.get_by_pubkey(&PublicKeyBytes([1; 48])).unwrap();
        assert!(stored.liquidated);
        assert_eq!(map.get_by_cluster(&ClusterId([9; 32])).len(), 1);
    }
}
