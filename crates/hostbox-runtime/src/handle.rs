//! Container handle generation.
//!
//! Handles come from a lock-free 32-bit counter seeded from the clock, so
//! two backends started at different times are unlikely to hand out the same
//! handles. Each value is rendered as eleven base-32 digits, most significant
//! first, giving fixed-width handles that sort in creation order.

use std::sync::atomic::{AtomicU32, Ordering};

use hostbox_common::constants::HANDLE_LENGTH;
use hostbox_common::types::Handle;

const ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Atomic source of container handles.
#[derive(Debug)]
pub struct HandleGenerator {
    counter: AtomicU32,
}

impl HandleGenerator {
    /// Creates a generator seeded from the current wall-clock nanoseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn seeded_from_clock() -> Self {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_seed(nanos as u32)
    }

    /// Creates a generator whose first handle encodes `seed + 1`.
    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self {
            counter: AtomicU32::new(seed),
        }
    }

    /// Returns the next handle. Never blocks.
    pub fn generate(&self) -> Handle {
        let value = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Handle::new(encode(value))
    }
}

/// Renders `value` as [`HANDLE_LENGTH`] base-32 digits.
#[must_use]
pub fn encode(value: u32) -> String {
    let wide = u64::from(value);
    (1..=HANDLE_LENGTH)
        .map(|i| {
            let shift = 55 - i * 5;
            // masked to five bits
            #[allow(clippy::cast_possible_truncation)]
            let digit = ((wide >> shift) & 31) as usize;
            char::from(ALPHABET[digit])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn encode_is_fixed_width() {
        assert_eq!(encode(0), "00000000000");
        assert_eq!(encode(1), "00000000001");
        assert_eq!(encode(32), "00000000010");
        assert_eq!(encode(u32::MAX), "00003vvvvvv");
    }

    #[test]
    fn encoding_preserves_order() {
        let values = [0, 9, 10, 31, 32, 1_000, 65_535, 1 << 20, u32::MAX - 1, u32::MAX];
        for pair in values.windows(2) {
            assert!(encode(pair[0]) < encode(pair[1]), "{pair:?}");
        }
    }

    #[test]
    fn generate_starts_after_seed() {
        let generator = HandleGenerator::with_seed(41);
        assert_eq!(generator.generate().as_str(), encode(42));
        assert_eq!(generator.generate().as_str(), encode(43));
    }

    #[test]
    fn generate_wraps_at_counter_limit() {
        let generator = HandleGenerator::with_seed(u32::MAX - 1);
        assert_eq!(generator.generate().as_str(), encode(u32::MAX));
        assert_eq!(generator.generate().as_str(), encode(0));
    }

    #[test]
    fn ten_thousand_sequential_handles_are_unique() {
        let generator = HandleGenerator::seeded_from_clock();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let handle = generator.generate();
            assert_eq!(handle.as_str().len(), HANDLE_LENGTH);
            assert!(handle.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(seen.insert(handle), "duplicate handle");
        }
    }

    #[test]
    fn concurrent_handles_are_unique() {
        let generator = Arc::new(HandleGenerator::seeded_from_clock());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..2_000).map(|_| generator.generate()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for worker in workers {
            for handle in worker.join().expect("worker panicked") {
                assert!(seen.insert(handle), "duplicate handle");
            }
        }
        assert_eq!(seen.len(), 16_000);
    }
}
