//! Publish/claim hand-off between the producer callback and blocking consumers.
//!
//! One mutex guards the ring cursor (latest written index + retrieved flag);
//! a condvar wakes consumers on every publish. Slot payloads are not guarded
//! here - the cursor lock is never held across a bulk copy.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Cursor state guarded by [`FrameSignal`]'s mutex.
struct Cursor {
    /// Index of the most recently completed write.
    latest: usize,
    /// Whether `latest` has been claimed since the last publish.
    retrieved: bool,
}

/// Wakes blocking consumers whenever the producer publishes a new ring index.
///
/// Exactly one claim succeeds per publish: the shared `retrieved` flag is set
/// by the winning consumer and cleared by the next publish.
pub struct FrameSignal {
    depth: usize,
    state: Mutex<Cursor>,
    cond: Condvar,
}

impl FrameSignal {
    /// `depth` is the ring depth the published index wraps over.
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            // `latest` starts one step before slot zero so the first publish
            // lands on slot 0; `retrieved` starts true so consumers block
            // until that first publish.
            state: Mutex::new(Cursor {
                latest: depth - 1,
                retrieved: true,
            }),
            cond: Condvar::new(),
        }
    }

    /// Producer side: the slot index the next write must target.
    ///
    /// The producer is single-threaded (the engine serializes deliveries), so
    /// the value stays correct between this call and the matching
    /// [`publish`](Self::publish).
    pub fn next_index(&self) -> usize {
        let cur = self.state.lock().unwrap();
        (cur.latest + 1) % self.depth
    }

    /// Producer side: advance the cursor and wake every waiter.
    ///
    /// Called only after the byte copy into the target slot has completed.
    pub fn publish(&self) -> usize {
        let index = {
            let mut cur = self.state.lock().unwrap();
            cur.latest = (cur.latest + 1) % self.depth;
            cur.retrieved = false;
            cur.latest
        };
        self.cond.notify_all();
        index
    }

    /// Consumer side: block until an unconsumed index exists, then claim it.
    pub fn claim(&self) -> usize {
        let mut cur = self.state.lock().unwrap();
        while cur.retrieved {
            cur = self.cond.wait(cur).unwrap();
        }
        cur.retrieved = true;
        cur.latest
    }

    /// Like [`claim`](Self::claim) but gives up after `timeout`.
    pub fn claim_timeout(&self, timeout: Duration) -> Option<usize> {
        let guard = self.state.lock().unwrap();
        let (mut cur, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |cur| cur.retrieved)
            .unwrap();
        if cur.retrieved {
            return None;
        }
        cur.retrieved = true;
        Some(cur.latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const DEPTH: usize = 16;

    #[test]
    fn first_publish_lands_on_slot_zero() {
        let signal = FrameSignal::new(DEPTH);
        assert_eq!(signal.next_index(), 0);
        assert_eq!(signal.publish(), 0);
        assert_eq!(signal.claim(), 0);
    }

    #[test]
    fn claim_blocks_until_publish() {
        let signal = Arc::new(FrameSignal::new(DEPTH));
        assert_eq!(signal.claim_timeout(Duration::from_millis(20)), None);

        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.claim())
        };
        thread::sleep(Duration::from_millis(20));
        signal.publish();
        assert_eq!(waiter.join().unwrap(), 0);
    }

    #[test]
    fn single_publish_yields_single_claim() {
        let signal = FrameSignal::new(DEPTH);
        signal.publish();
        assert_eq!(signal.claim_timeout(Duration::from_millis(20)), Some(0));
        // Already retrieved: the next claim must block, not re-return slot 0.
        assert_eq!(signal.claim_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn published_index_wraps_at_depth() {
        let signal = FrameSignal::new(DEPTH);
        for _ in 0..DEPTH {
            signal.publish();
        }
        // The 17th publish reuses slot 0.
        assert_eq!(signal.publish(), 0);
    }

    #[test]
    fn claim_returns_latest_after_burst() {
        let signal = FrameSignal::new(DEPTH);
        for _ in 0..5 {
            signal.publish();
        }
        assert_eq!(signal.claim(), 4);
    }

    #[test]
    fn claims_race_to_one_winner() {
        let signal = Arc::new(FrameSignal::new(DEPTH));
        let claimers: Vec<_> = (0..4)
            .map(|_| {
                let signal = Arc::clone(&signal);
                thread::spawn(move || signal.claim_timeout(Duration::from_millis(100)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        signal.publish();
        let won: usize = claimers
            .into_iter()
            .map(|h| h.join().unwrap().is_some() as usize)
            .sum();
        assert_eq!(won, 1);
    }
}
