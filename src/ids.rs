//! Per-run identifier allocation.
//!
//! One [`IdAllocator`] is owned by one parse run and passed by `&mut` to
//! every component that mints ids, so two documents parsed side by side can
//! never collide and nothing needs a global lock.

use std::collections::HashSet;

/// How many counted suffixes (`x-2`, `x-3`, …) are tried before a repaired
/// id falls back to a freshly minted one.
const MAX_SUFFIX_ATTEMPTS: usize = 32;

#[derive(Debug, Default, Clone)]
pub struct IdAllocator {
    taken: HashSet<String>,
    counter: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new id `{prefix}-{n}` that has not been handed out yet.
    pub fn fresh(&mut self, prefix: &str) -> String {
        loop {
            self.counter += 1;
            let candidate = format!("{prefix}-{}", self.counter);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Reserve `wanted` if it is free; otherwise try `wanted-2`, `wanted-3`,
    /// … and finally mint a fresh id. Empty input always mints.
    pub fn claim(&mut self, wanted: &str, prefix: &str) -> String {
        let wanted = wanted.trim();
        if wanted.is_empty() {
            return self.fresh(prefix);
        }
        if self.taken.insert(wanted.to_string()) {
            return wanted.to_string();
        }
        for n in 2..MAX_SUFFIX_ATTEMPTS + 2 {
            let candidate = format!("{wanted}-{n}");
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
        self.fresh(prefix)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.taken.contains(id)
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        let mut ids = IdAllocator::new();
        let a = ids.fresh("para");
        let b = ids.fresh("para");
        assert_ne!(a, b);
        assert!(a.starts_with("para-"));
    }

    #[test]
    fn claim_keeps_free_id() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.claim("fig-a", "figure"), "fig-a");
    }

    #[test]
    fn claim_suffixes_duplicates() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.claim("x", "para"), "x");
        assert_eq!(ids.claim("x", "para"), "x-2");
        assert_eq!(ids.claim("x", "para"), "x-3");
    }

    #[test]
    fn claim_empty_mints() {
        let mut ids = IdAllocator::new();
        let id = ids.claim("   ", "table");
        assert!(id.starts_with("table-"));
    }

    #[test]
    fn fresh_skips_claimed_names() {
        let mut ids = IdAllocator::new();
        ids.claim("para-1", "para");
        assert_eq!(ids.fresh("para"), "para-2");
    }
}
