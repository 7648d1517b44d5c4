//! Deduplicated worklist of syntax nodes

use crate::syntax::SynId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Pending syntax nodes. Membership is a dense bitmap, so `push` and `pop`
/// are O(1). Seed 0 pops newest-first; any other seed pops in a
/// reproducible pseudo-random order.
#[derive(Debug)]
pub struct Worklist {
    items: Vec<SynId>,
    on: Vec<bool>,
    rng: Option<StdRng>,
}

impl Worklist {
    pub fn new(capacity: usize, seed: u64) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            on: vec![false; capacity],
            rng: (seed != 0).then(|| StdRng::seed_from_u64(seed)),
        }
    }

    /// Add `id` unless already queued; true when it was added
    pub fn push(&mut self, id: SynId) -> bool {
        let i = id.idx();
        if i >= self.on.len() {
            self.on.resize(i + 1, false);
        }
        if self.on[i] {
            return false;
        }
        self.on[i] = true;
        self.items.push(id);
        true
    }

    pub fn pop(&mut self) -> Option<SynId> {
        if self.items.is_empty() {
            return None;
        }
        let id = match self.rng.as_mut() {
            Some(rng) => {
                let at = rng.gen_range(0..self.items.len());
                self.items.swap_remove(at)
            }
            None => self.items.pop()?,
        };
        self.on[id.idx()] = false;
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::BTreeSet;

    #[test]
    fn test_lifo_without_seed() {
        let mut w = Worklist::new(4, 0);
        w.push(SynId(1));
        w.push(SynId(2));
        assert!(!w.push(SynId(1)));
        assert_eq!(w.pop(), Some(SynId(2)));
        assert_eq!(w.pop(), Some(SynId(1)));
        assert_eq!(w.pop(), None);
    }

    #[test]
    fn test_grows_past_capacity() {
        let mut w = Worklist::new(1, 0);
        assert!(w.push(SynId(9)));
        assert!(!w.push(SynId(9)));
        assert_eq!(w.len(), 1);
    }

    #[quickcheck]
    fn prop_every_distinct_push_pops_once(ids: Vec<u8>, seed: u64) -> bool {
        let mut w = Worklist::new(16, seed);
        for id in &ids {
            w.push(SynId(u32::from(*id)));
        }
        let mut popped = Vec::new();
        while let Some(id) = w.pop() {
            popped.push(id.0);
        }
        let expected: BTreeSet<u32> = ids.iter().map(|i| u32::from(*i)).collect();
        let got: BTreeSet<u32> = popped.iter().copied().collect();
        popped.len() == expected.len() && got == expected && w.is_empty()
    }
}
