//! Sampling-based garbage collection of expired session rows.
//!
//! There is no background scheduler: the lifecycle manager calls
//! [`maybe_collect`] once per completed write, and with probability
//! `gc_probability`% a sweep runs on a spawned task. Cleanup is best-effort;
//! a failed sweep is logged and never fails the triggering request, since
//! expired rows are already treated as absent on read.

use rand::Rng;
use tracing::{debug, warn};

use crate::store::SessionStore;

/// Sampling hook invoked after each completed write.
///
/// Draws one uniform value in `[0, 100)`; when it falls below `probability`
/// the expired-row sweep is spawned onto the runtime so it never blocks the
/// triggering request's response. A probability of 0 never samples.
pub(crate) fn maybe_collect(store: &SessionStore, probability: u8, cutoff: i64) {
    if probability == 0 {
        return;
    }
    let sample = rand::thread_rng().gen_range(0..100u32);
    if !should_collect(sample, probability) {
        return;
    }

    let store = store.clone();
    tokio::spawn(async move {
        match store.delete_expired(cutoff).await {
            Ok(removed) => {
                debug!(removed, cutoff, "session garbage collection performed");
            }
            Err(err) => {
                warn!(error = %err, "session garbage collection failed");
            }
        }
    });
}

fn should_collect(sample: u32, probability: u8) -> bool {
    sample < u32::from(probability)
}
