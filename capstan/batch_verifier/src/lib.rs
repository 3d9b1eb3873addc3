//! A throughput-oriented BLS verification engine.
//!
//! Independent verification requests are accumulated into batches which are
//! verified in aggregate (one pairing batch instead of N) and concurrently.
//! The batching window adapts to load: an idle verifier waits longer to grow
//! batches, a busy one dispatches quickly to keep latency down.

use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, Signature};
use blst::BLST_ERROR;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error};

/// Domain separation tag for beacon chain BLS signatures
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

const MESSAGE_SIZE: usize = 32;

/// Tuning knobs for the verifier
#[derive(Debug, Clone, Copy)]
pub struct VerifierConfig {
    /// Number of batches verified concurrently
    pub concurrency: usize,
    /// Target batch size; reaching it dispatches immediately
    pub batch_size: usize,
    /// Maximum time a batch may wait before dispatch
    pub timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            batch_size: 14,
            timeout: Duration::from_millis(50),
        }
    }
}

/// A single verification request: an aggregated signature over one 32-byte
/// message digest by one or more public keys
struct SignatureRequest {
    signature: Signature,
    pubkeys: Vec<PublicKey>,
    message: [u8; MESSAGE_SIZE],
    result: oneshot::Sender<bool>,
}

struct BatchState {
    /// At most one request per message digest; aggregate verification
    /// forbids duplicate messages within one batch
    pending: HashMap<[u8; MESSAGE_SIZE], SignatureRequest>,
    /// When the current batch started accumulating
    started: Option<Instant>,
    /// Bumped whenever the pending set changes hands; stale timers check it
    /// and give up
    timer_generation: u64,
}

/// Point-in-time verifier load, for periodic debug logging
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub pending_requests: usize,
    pub queued_batches: usize,
    pub busy_workers: usize,
}

/// Aggregates BLS verifications into batches under an adaptive-timeout
/// policy. A process-wide resource: construct once, share by `Arc`.
pub struct BatchVerifier {
    concurrency: usize,
    batch_size: usize,
    timeout: Duration,

    state: Mutex<BatchState>,
    semaphore: Arc<Semaphore>,
    busy_workers: AtomicUsize,
    queued_batches: AtomicUsize,
}

impl BatchVerifier {
    pub fn new(config: VerifierConfig) -> Arc<Self> {
        Arc::new(Self {
            concurrency: config.concurrency.max(1),
            batch_size: config.batch_size.max(2),
            timeout: config.timeout,
            state: Mutex::new(BatchState {
                pending: HashMap::new(),
                started: None,
                timer_generation: 0,
            }),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            busy_workers: AtomicUsize::new(0),
            queued_batches: AtomicUsize::new(0),
        })
    }

    /// Verify `signature` over `message` by the aggregate of `pubkeys`.
    /// Blocks the caller until a verdict is produced. Safe to call from many
    /// tasks concurrently.
    pub async fn verify(
        self: &Arc<Self>,
        signature: Signature,
        pubkeys: Vec<PublicKey>,
        message: [u8; MESSAGE_SIZE],
    ) -> bool {
        if pubkeys.is_empty() {
            return false;
        }

        let (result_tx, result_rx) = oneshot::channel();
        let request = SignatureRequest {
            signature,
            pubkeys,
            message,
            result: result_tx,
        };

        let mut state = self.state.lock().expect("verifier lock poisoned");
        if state.pending.contains_key(&message) {
            // An identical digest is already pending; verify individually
            drop(state);
            let verdict = tokio::task::spawn_blocking(move || verify_single_parts(&request))
                .await
                .unwrap_or(false);
            return verdict;
        }

        state.pending.insert(message, request);
        if state.pending.len() >= self.batch_size {
            // Batch size reached: cancel the timer and dispatch
            let batch = Self::take_batch(&mut state);
            drop(state);
            self.dispatch(batch);
        } else {
            // Batch has grown: re-arm the adaptive timer
            let wait = self.adaptive_timeout(&mut state);
            state.timer_generation += 1;
            let generation = state.timer_generation;
            drop(state);

            let verifier = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                let mut state = verifier.state.lock().expect("verifier lock poisoned");
                if state.timer_generation == generation && !state.pending.is_empty() {
                    let batch = Self::take_batch(&mut state);
                    drop(state);
                    verifier.dispatch(batch);
                }
            });
        }

        result_rx.await.unwrap_or(false)
    }

    pub fn stats(&self) -> Stats {
        let pending_requests = self
            .state
            .lock()
            .map(|state| state.pending.len())
            .unwrap_or(0);
        Stats {
            pending_requests,
            queued_batches: self.queued_batches.load(Ordering::Relaxed),
            busy_workers: self.busy_workers.load(Ordering::Relaxed),
        }
    }

    // Detach the accumulated batch, resetting the window
    fn take_batch(state: &mut BatchState) -> Vec<SignatureRequest> {
        state.started = None;
        state.timer_generation += 1;
        state.pending.drain().map(|(_, request)| request).collect()
    }

    // The remaining wait scaled by how busy the verifier is: an idle verifier
    // keeps the full window, a saturated one collapses it to zero
    fn adaptive_timeout(&self, state: &mut BatchState) -> Duration {
        let started = *state.started.get_or_insert_with(Instant::now);

        let workload = self.busy_workers.load(Ordering::Relaxed)
            + self.queued_batches.load(Ordering::Relaxed)
            + state.pending.len() / self.batch_size;
        let workload = workload.min(self.concurrency);
        let busyness = (((workload + 1) as f64 / self.concurrency as f64) * 2.0).min(1.0);

        let time_left = self.timeout.saturating_sub(started.elapsed());
        time_left.mul_f64(busyness)
    }

    fn dispatch(self: &Arc<Self>, batch: Vec<SignatureRequest>) {
        self.queued_batches.fetch_add(1, Ordering::Relaxed);
        let verifier = Arc::clone(self);
        tokio::spawn(async move {
            let permit = verifier
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("verifier semaphore closed");
            verifier.queued_batches.fetch_sub(1, Ordering::Relaxed);
            verifier.busy_workers.fetch_add(1, Ordering::Relaxed);

            let batch_len = batch.len();
            if tokio::task::spawn_blocking(move || verify_batch(batch))
                .await
                .is_err()
            {
                error!(batch_len, "Verification worker panicked");
            }

            verifier.busy_workers.fetch_sub(1, Ordering::Relaxed);
            drop(permit);
        });
    }
}

// Verify a batch of requests and resolve their result sinks
fn verify_batch(batch: Vec<SignatureRequest>) {
    debug!(batch_len = batch.len(), "Verifying batch");
    if batch.len() == 1 {
        let request = batch.into_iter().next().expect("len checked");
        let verdict = verify_single_parts(&request);
        let _ = request.result.send(verdict);
        return;
    }

    // Sum the signatures and collapse each request's key list into a single
    // aggregated key, then attempt one aggregate verification over all
    // (key, message) pairs
    let verdict = aggregate_verify_batch(&batch);
    if verdict {
        for request in batch {
            let _ = request.result.send(true);
        }
    } else {
        // Even one bad signature poisons the batch; fall back per request
        for request in batch {
            let verdict = verify_single_parts(&request);
            let _ = request.result.send(verdict);
        }
    }
}

fn aggregate_verify_batch(batch: &[SignatureRequest]) -> bool {
    let signatures: Vec<&Signature> = batch.iter().map(|r| &r.signature).collect();
    let summed = match AggregateSignature::aggregate(&signatures, false) {
        Ok(aggregate) => aggregate.to_signature(),
        Err(_) => return false,
    };

    let mut collapsed = Vec::with_capacity(batch.len());
    for request in batch {
        let refs: Vec<&PublicKey> = request.pubkeys.iter().collect();
        match AggregatePublicKey::aggregate(&refs, false) {
            Ok(aggregate) => collapsed.push(aggregate.to_public_key()),
            Err(_) => return false,
        }
    }

    let pk_refs: Vec<&PublicKey> = collapsed.iter().collect();
    let msg_refs: Vec<&[u8]> = batch.iter().map(|r| r.message.as_slice()).collect();
    summed.aggregate_verify(false, &msg_refs, BLS_DST, &pk_refs, false) == BLST_ERROR::BLST_SUCCESS
}

fn verify_single_parts(request: &SignatureRequest) -> bool {
    let refs: Vec<&PublicKey> = request.pubkeys.iter().collect();
    request
        .signature
        .fast_aggregate_verify(true, &request.message, BLS_DST, &refs)
        == BLST_ERROR::BLST_SUCCESS
}

#[cfg(test)]
mod batch_verifier_tests {
    use super::*;
    use blst::min_pk::SecretKey;
    use rand::Rng;

    fn keypair() -> (SecretKey, PublicKey) {
        let seed: [u8; 32] = rand::thread_rng().gen();
        let sk = SecretKey::key_gen(&seed, &[]).expect("key_gen");
        let pk = sk.sk_to_pk();
        (sk, pk)
    }

    // A request signed by `signers` keys over the same message
    fn request(message: [u8; 32], signers: usize) -> (Signature, Vec<PublicKey>) {
        let pairs: Vec<_> = (0..signers).map(|_| keypair()).collect();
        let signatures: Vec<Signature> = pairs
            .iter()
            .map(|(sk, _)| sk.sign(&message, BLS_DST, &[]))
            .collect();
        let refs: Vec<&Signature> = signatures.iter().collect();
        let signature = AggregateSignature::aggregate(&refs, false)
            .expect("aggregate")
            .to_signature();
        let pubkeys = pairs.into_iter().map(|(_, pk)| pk).collect();
        (signature, pubkeys)
    }

    fn small_verifier(batch_size: usize) -> Arc<BatchVerifier> {
        BatchVerifier::new(VerifierConfig {
            concurrency: 2,
            batch_size,
            timeout: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn single_request_verifies_on_timer() {
        let verifier = small_verifier(3);
        let (sig, pks) = request([1u8; 32], 1);
        assert!(verifier.verify(sig, pks, [1u8; 32]).await);
    }

    #[tokio::test]
    async fn batch_size_dispatches_without_timer() {
        let verifier = BatchVerifier::new(VerifierConfig {
            concurrency: 2,
            batch_size: 2,
            // long enough that only the size trigger can explain a result
            timeout: Duration::from_secs(30),
        });

        let (sig_a, pks_a) = request([1u8; 32], 2);
        let (sig_b, pks_b) = request([2u8; 32], 1);
        let (a, b) = tokio::join!(
            verifier.verify(sig_a, pks_a, [1u8; 32]),
            verifier.verify(sig_b, pks_b, [2u8; 32]),
        );
        assert!(a && b);
    }

    #[tokio::test]
    async fn duplicate_digest_bypasses_batching() {
        let verifier = small_verifier(4);
        let message = [7u8; 32];
        let (sig_a, pks_a) = request(message, 1);
        let (sig_b, pks_b) = request(message, 1);

        // Two pending requests share the digest; the second must be verified
        // immediately and individually, while the first waits for its batch
        let (a, b) = tokio::join!(
            verifier.verify(sig_a, pks_a, message),
            verifier.verify(sig_b, pks_b, message),
        );
        assert!(a && b);
    }

    #[tokio::test]
    async fn bad_signature_poisons_batch_but_not_verdicts() {
        let verifier = BatchVerifier::new(VerifierConfig {
            concurrency: 2,
            batch_size: 2,
            timeout: Duration::from_secs(30),
        });

        let (good_sig, good_pks) = request([3u8; 32], 1);
        // signature over a different message than claimed
        let (bad_sig, bad_pks) = request([9u8; 32], 1);

        let (good, bad) = tokio::join!(
            verifier.verify(good_sig, good_pks, [3u8; 32]),
            verifier.verify(bad_sig, bad_pks, [4u8; 32]),
        );
        assert!(good);
        assert!(!bad);
    }

    #[tokio::test]
    async fn timer_fires_below_batch_size_while_duplicate_goes_alone() {
        // batch_size 3 with two pending requests: the timer must flush them;
        // a third request reusing a pending digest goes through immediately
        let verifier = small_verifier(3);
        let message = [5u8; 32];
        let (sig_a, pks_a) = request(message, 1);
        let (sig_b, pks_b) = request([6u8; 32], 1);
        let (sig_c, pks_c) = request(message, 1);

        let (a, b, c) = tokio::join!(
            verifier.verify(sig_a, pks_a, message),
            verifier.verify(sig_b, pks_b, [6u8; 32]),
            verifier.verify(sig_c, pks_c, message),
        );
        assert!(a && b && c);
    }

    #[tokio::test]
    async fn stats_settle_to_idle() {
        let verifier = small_verifier(2);
        let (sig, pks) = request([8u8; 32], 1);
        assert!(verifier.verify(sig, pks, [8u8; 32]).await);

        // give the dispatch task a beat to release its permit
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = verifier.stats();
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.busy_workers, 0);
    }
}
