use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;

use crate::limits::REFERENCE_ATTEMPTS;

use super::EngineError;

/// Suffixes are drawn from `0..SUFFIX_SPACE` and printed with five digits.
pub const SUFFIX_SPACE: u32 = 100_000;

/// Where candidate suffixes come from.
pub trait SuffixSource: Send + Sync {
    fn next_suffix(&self) -> u32;
}

#[derive(Debug, Default)]
pub struct RandomSuffix;

impl SuffixSource for RandomSuffix {
    fn next_suffix(&self) -> u32 {
        rand::thread_rng().gen_range(0..SUFFIX_SPACE)
    }
}

/// Deterministic suffixes starting at a seed, wrapping at the suffix space.
#[derive(Debug)]
pub struct SequentialSuffix {
    next: AtomicU32,
    step: u32,
}

impl SequentialSuffix {
    pub fn new(start: u32) -> Self {
        Self::with_step(start, 1)
    }

    /// A step of 0 yields the same suffix forever.
    pub fn with_step(start: u32, step: u32) -> Self {
        Self {
            next: AtomicU32::new(start % SUFFIX_SPACE),
            step,
        }
    }
}

impl SuffixSource for SequentialSuffix {
    fn next_suffix(&self) -> u32 {
        let step = self.step;
        let prev = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.wrapping_add(step) % SUFFIX_SPACE)
            })
            .unwrap_or_else(|n| n);
        prev % SUFFIX_SPACE
    }
}

/// Hands out `RES-{year}-{nnnnn}` references.
pub struct ReferenceAllocator {
    source: Box<dyn SuffixSource>,
    attempts: usize,
}

impl Default for ReferenceAllocator {
    fn default() -> Self {
        Self::new(Box::new(RandomSuffix))
    }
}

impl std::fmt::Debug for ReferenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceAllocator")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl ReferenceAllocator {
    pub fn new(source: Box<dyn SuffixSource>) -> Self {
        Self {
            source,
            attempts: REFERENCE_ATTEMPTS,
        }
    }

    pub fn format(year: i32, suffix: u32) -> String {
        format!("RES-{year}-{:05}", suffix % SUFFIX_SPACE)
    }

    /// Offer candidates to `claim` until one is accepted. `claim` must be the
    /// atomic uniqueness check itself (insert-if-absent), not a lookup.
    pub fn generate(
        &self,
        year: i32,
        mut claim: impl FnMut(&str) -> bool,
    ) -> Result<String, EngineError> {
        for attempt in 0..self.attempts {
            let candidate = Self::format(year, self.source.next_suffix());
            if claim(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!("reference {candidate} taken (attempt {})", attempt + 1);
            metrics::counter!(crate::observability::REFERENCE_COLLISIONS_TOTAL).increment(1);
        }
        Err(EngineError::ReferenceAllocationExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn format_pads_to_five_digits() {
        assert_eq!(ReferenceAllocator::format(2026, 42), "RES-2026-00042");
        assert_eq!(ReferenceAllocator::format(2026, 99_999), "RES-2026-99999");
    }

    #[test]
    fn random_references_have_expected_shape() {
        let alloc = ReferenceAllocator::default();
        let r = alloc.generate(2026, |_| true).unwrap();
        assert!(r.starts_with("RES-2026-"));
        assert_eq!(r.len(), "RES-2026-00000".len());
        assert!(r[9..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn retries_past_collisions() {
        let alloc = ReferenceAllocator::new(Box::new(SequentialSuffix::new(7)));
        let mut taken: HashSet<String> = ["RES-2026-00007", "RES-2026-00008"]
            .into_iter()
            .map(String::from)
            .collect();
        let r = alloc.generate(2026, |c| taken.insert(c.to_string())).unwrap();
        assert_eq!(r, "RES-2026-00009");
    }

    #[test]
    fn exhausts_after_bounded_attempts() {
        let alloc = ReferenceAllocator::new(Box::new(SequentialSuffix::with_step(1, 0)));
        let mut calls = 0;
        let result = alloc.generate(2026, |_| {
            calls += 1;
            false
        });
        assert_eq!(result, Err(EngineError::ReferenceAllocationExhausted));
        assert_eq!(calls, REFERENCE_ATTEMPTS);
    }

    #[test]
    fn sequential_wraps() {
        let s = SequentialSuffix::new(SUFFIX_SPACE - 1);
        assert_eq!(s.next_suffix(), SUFFIX_SPACE - 1);
        assert_eq!(s.next_suffix(), 0);
    }
}
