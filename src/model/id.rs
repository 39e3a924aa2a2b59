//! Task and batch identifier generation
//!
//! Ids are 64-bit and monotone in wall time: sorting by id is equivalent to
//! sorting by submission order. Layout (MSB to LSB):
//!
//!   41 bits milliseconds since HAKURIVER_EPOCH | 4 bits coordinator salt | 18 bits sequence
//!
//! The salt distinguishes coordinator instances (a restart with a different
//! salt cannot collide with ids minted by a previous instance in the same
//! millisecond); the sequence distinguishes ids minted within one millisecond
//! by the same instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2024-01-01T00:00:00Z, in milliseconds since the Unix epoch.
const HAKURIVER_EPOCH_MILLIS: u64 = 1_704_067_200_000;

const SEQUENCE_BITS: u32 = 18;
const SALT_BITS: u32 = 4;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const SALT_MASK: u64 = (1 << SALT_BITS) - 1;

/// Monotone 64-bit id generator, one instance per process.
pub struct IdGenerator {
    salt: u64,
    state: AtomicU64,
}

/// Packed (last_millis << SEQUENCE_BITS) | sequence, updated with a CAS loop.
impl IdGenerator {
    pub fn new(salt: u8) -> Self {
        Self {
            salt: (salt as u64) & SALT_MASK,
            state: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> u64 {
        loop {
            let now = now_millis().saturating_sub(HAKURIVER_EPOCH_MILLIS);
            let prev = self.state.load(Ordering::Relaxed);
            let prev_millis = prev >> SEQUENCE_BITS;

            let (millis, sequence) = if now > prev_millis {
                (now, 0)
            } else {
                let seq = (prev & SEQUENCE_MASK) + 1;
                if seq > SEQUENCE_MASK {
                    // Sequence exhausted for this millisecond; spin into the next one.
                    (prev_millis + 1, 0)
                } else {
                    (prev_millis, seq)
                }
            };

            let next = (millis << SEQUENCE_BITS) | sequence;
            if self
                .state
                .compare_exchange(prev, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return (millis << (SEQUENCE_BITS + SALT_BITS))
                    | (self.salt << SEQUENCE_BITS)
                    | sequence;
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotone() {
        let gen = IdGenerator::new(3);
        let mut last = 0;
        for _ in 0..10_000 {
            let id = gen.next_id();
            assert!(id > last, "ids must strictly increase");
            last = id;
        }
    }

    #[test]
    fn different_salts_cannot_collide_same_tick() {
        let a = IdGenerator::new(1);
        let b = IdGenerator::new(2);
        let ids_a: Vec<u64> = (0..100).map(|_| a.next_id()).collect();
        let ids_b: Vec<u64> = (0..100).map(|_| b.next_id()).collect();
        for id in ids_a {
            assert!(!ids_b.contains(&id));
        }
    }
}
