use crate::error::ValidationError;
use dvt_types::MessageKind;

/// The maximum number of acceptable messages from a signer within one
/// (slot, round). Everything is capped at one except decided certificates,
/// which may arrive in up to committee_size + 1 signer-set variants.
pub fn max_message_counts(committee_size: usize) -> MessageCounts {
    MessageCounts {
        pre_consensus: 1,
        proposal: 1,
        prepare: 1,
        commit: 1,
        decided: committee_size as u64 + 1,
        round_change: 1,
        post_consensus: 1,
    }
}

/// Per-kind message counters for one signer within one (slot, round)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageCounts {
    pub pre_consensus: u64,
    pub proposal: u64,
    pub prepare: u64,
    pub commit: u64,
    pub decided: u64,
    pub round_change: u64,
    pub post_consensus: u64,
}

impl MessageCounts {
    /// Reject messages that violate the in-round ordering: once a signer has
    /// committed (or the instance has decided), earlier phases cannot recur.
    pub fn validate(&self, kind: MessageKind) -> Result<(), ValidationError> {
        let unexpected = match kind {
            MessageKind::Proposal => {
                self.proposal > 0 || self.commit > 0 || self.decided > 0 || self.post_consensus > 0
            }
            MessageKind::Prepare => {
                self.prepare > 0 || self.commit > 0 || self.decided > 0 || self.post_consensus > 0
            }
            MessageKind::Commit => {
                self.commit > 0 || self.decided > 0 || self.post_consensus > 0
            }
            MessageKind::RoundChange => self.round_change > 0,
            MessageKind::PreConsensus => self.pre_consensus > 0,
            MessageKind::PostConsensus => self.post_consensus > 0,
            // decided variants are bounded by limits, not by ordering
            MessageKind::Decided => false,
        };

        if unexpected {
            return Err(ValidationError::UnexpectedMessage { kind });
        }
        Ok(())
    }

    pub fn record(&mut self, kind: MessageKind) {
        match kind {
            MessageKind::PreConsensus => self.pre_consensus += 1,
            MessageKind::Proposal => self.proposal += 1,
            MessageKind::Prepare => self.prepare += 1,
            MessageKind::Commit => self.commit += 1,
            MessageKind::Decided => self.decided += 1,
            MessageKind::RoundChange => self.round_change += 1,
            MessageKind::PostConsensus => self.post_consensus += 1,
        }
    }

    /// Whether admitting another message of `kind` would exceed its quota
    pub fn reached_limits(&self, kind: MessageKind, limits: &MessageCounts) -> bool {
        let (count, limit) = match kind {
            MessageKind::PreConsensus => (self.pre_consensus, limits.pre_consensus),
            MessageKind::Proposal => (self.proposal, limits.proposal),
            MessageKind::Prepare => (self.prepare, limits.prepare),
            MessageKind::Commit => (self.commit, limits.commit),
            MessageKind::Decided => (self.decided, limits.decided),
            MessageKind::RoundChange => (self.round_change, limits.round_change),
            MessageKind::PostConsensus => (self.post_consensus, limits.post_consensus),
        };
        count >= limit
    }
}

#[cfg(test)]
mod message_counts_tests {
    use super::*;

    #[test]
    fn ordering_rules() {
        let mut counts = MessageCounts::default();
        assert!(counts.validate(MessageKind::Proposal).is_ok());
        counts.record(MessageKind::Proposal);

        // a second proposal within the round is not expected
        assert_eq!(
            counts.validate(MessageKind::Proposal),
            Err(ValidationError::UnexpectedMessage {
                kind: MessageKind::Proposal
            })
        );

        // prepare then commit flow is fine
        assert!(counts.validate(MessageKind::Prepare).is_ok());
        counts.record(MessageKind::Prepare);
        assert!(counts.validate(MessageKind::Commit).is_ok());
        counts.record(MessageKind::Commit);

        // after a commit, no phase before it may recur
        assert!(counts.validate(MessageKind::Proposal).is_err());
        assert!(counts.validate(MessageKind::Prepare).is_err());
        assert!(counts.validate(MessageKind::Commit).is_err());

        // decided variants are still admitted
        assert!(counts.validate(MessageKind::Decided).is_ok());
    }

    #[test]
    fn post_consensus_blocks_consensus_phases() {
        let mut counts = MessageCounts::default();
        counts.record(MessageKind::PostConsensus);

        assert!(counts.validate(MessageKind::Proposal).is_err());
        assert!(counts.validate(MessageKind::Prepare).is_err());
        assert!(counts.validate(MessageKind::Commit).is_err());
        assert!(counts.validate(MessageKind::PostConsensus).is_err());
        assert!(counts.validate(MessageKind::RoundChange).is_ok());
    }

    #[test]
    fn limits_cap_decided_at_committee_size_plus_one() {
        let limits = max_message_counts(4);
        let mut counts = MessageCounts::default();

        for _ in 0..5 {
            assert!(!counts.reached_limits(MessageKind::Decided, &limits));
            counts.record(MessageKind::Decided);
        }
        assert!(counts.reached_limits(MessageKind::Decided, &limits));
    }

    #[test]
    fn limits_cap_everything_else_at_one() {
        let limits = max_message_counts(4);
        for kind in [
            MessageKind::PreConsensus,
            MessageKind::Proposal,
            MessageKind::Prepare,
            MessageKind::Commit,
            MessageKind::RoundChange,
            MessageKind::PostConsensus,
        ] {
            let mut counts = MessageCounts::default();
            assert!(!counts.reached_limits(kind, &limits));
            counts.record(kind);
            assert!(
                counts.reached_limits(kind, &limits),
                "kind {kind:?} should cap at 1"
            );
        }
    }

    #[test]
    fn quota_of_one_kind_does_not_bleed_into_another() {
        let limits = max_message_counts(4);
        let mut counts = MessageCounts::default();
        counts.record(MessageKind::Proposal);
        assert!(!counts.reached_limits(MessageKind::Prepare, &limits));
        assert!(!counts.reached_limits(MessageKind::Commit, &limits));
    }
}
