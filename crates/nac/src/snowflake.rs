//! A monotonic, snowflake-like sequence id generator.
//!
//! The original leaves machine/shard selection implicit, which collides
//! across multiple client instances sharing a process. This generator takes
//! `machine_id` explicitly so callers decide how to avoid that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Generates unique, roughly time-ordered 64-bit ids: `41 bits millis-since-
/// epoch | 10 bits machine id | 12 bits per-millisecond sequence`.
pub struct SnowflakeGenerator {
    machine_id: u64,
    state: Mutex<(u64, u64)>,
    fallback: AtomicU64,
}

impl SnowflakeGenerator {
    /// Creates a generator for `machine_id` (masked to 10 bits). Distinct
    /// `machine_id`s guarantee distinct ids across instances in the same
    /// process or across processes on the same host.
    pub fn new(machine_id: u16) -> Self {
        Self {
            machine_id: (machine_id as u64) & ((1 << MACHINE_BITS) - 1),
            state: Mutex::new((0, 0)),
            fallback: AtomicU64::new(1),
        }
    }

    /// Returns the next id. Never returns `0`, since `0` is reserved by
    /// [`crate::session::SessionManager::send_msg`] to mean "allocate one".
    pub fn next_id(&self) -> u64 {
        let now = now_millis();
        let mut state = self.state.lock();
        let (last_millis, seq) = *state;

        let (millis, sequence) = if now == last_millis {
            let next_seq = (seq + 1) & MAX_SEQUENCE;
            if next_seq == 0 {
                (wait_next_millis(last_millis), 0)
            } else {
                (now, next_seq)
            }
        } else if now > last_millis {
            (now, 0)
        } else {
            // Clock went backwards; keep monotonicity off the last seen millis.
            (last_millis, (seq + 1) & MAX_SEQUENCE)
        };

        *state = (millis, sequence);
        let id = (millis << (MACHINE_BITS + SEQUENCE_BITS)) | (self.machine_id << SEQUENCE_BITS) | sequence;
        if id == 0 {
            self.fallback.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

fn wait_next_millis(last: u64) -> u64 {
    let mut now = now_millis();
    while now <= last {
        std::thread::yield_now();
        now = now_millis();
    }
    now
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let gen = SnowflakeGenerator::new(1);
        let mut seen = HashSet::new();
        for _ in 0..5_000 {
            let id = gen.next_id();
            assert_ne!(id, 0);
            assert!(seen.insert(id), "duplicate id generated");
        }
    }

    #[test]
    fn distinct_machine_ids_never_collide_at_the_same_instant() {
        let a = SnowflakeGenerator::new(1);
        let b = SnowflakeGenerator::new(2);
        for _ in 0..100 {
            assert_ne!(a.next_id(), b.next_id());
        }
    }

    #[test]
    fn ids_are_nondecreasing_over_time() {
        let gen = SnowflakeGenerator::new(1);
        let mut prev = gen.next_id();
        for _ in 0..1000 {
            let next = gen.next_id();
            assert!(next > prev);
            prev = next;
        }
    }
}
