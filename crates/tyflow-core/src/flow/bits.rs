//! Identity sets used as lattice coordinates (function and allocation ids)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// A sorted set of small integer identities, or the set of all of them.
///
/// Meeting two sets moves down the lattice and therefore unions them; the
/// empty set is the optimistic top of its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bits {
    Set(SmallVec<[u32; 4]>),
    Full,
}

impl Bits {
    pub fn empty() -> Self {
        Bits::Set(SmallVec::new())
    }

    pub fn single(id: u32) -> Self {
        let mut set = SmallVec::new();
        set.push(id);
        Bits::Set(set)
    }

    pub fn full() -> Self {
        Bits::Full
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Bits::Full)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Bits::Set(s) if s.is_empty())
    }

    pub fn contains(&self, id: u32) -> bool {
        match self {
            Bits::Set(s) => s.binary_search(&id).is_ok(),
            Bits::Full => true,
        }
    }

    /// Members of a finite set; a full set yields nothing.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        let ids: &[u32] = match self {
            Bits::Set(s) => s.as_slice(),
            Bits::Full => &[],
        };
        ids.iter().copied()
    }

    pub fn union(&self, other: &Bits) -> Bits {
        match (self, other) {
            (Bits::Full, _) | (_, Bits::Full) => Bits::Full,
            (Bits::Set(a), Bits::Set(b)) => {
                let mut out: SmallVec<[u32; 4]> = a.clone();
                for id in b {
                    if let Err(pos) = out.binary_search(id) {
                        out.insert(pos, *id);
                    }
                }
                Bits::Set(out)
            }
        }
    }

    pub fn intersect(&self, other: &Bits) -> Bits {
        match (self, other) {
            (Bits::Full, x) | (x, Bits::Full) => x.clone(),
            (Bits::Set(a), Bits::Set(b)) => {
                Bits::Set(a.iter().copied().filter(|id| b.binary_search(id).is_ok()).collect())
            }
        }
    }
}

impl fmt::Display for Bits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bits::Full => write!(f, "[*]"),
            Bits::Set(s) => {
                let ids: Vec<String> = s.iter().map(|id| id.to_string()).collect();
                write!(f, "[{}]", ids.join(","))
            }
        }
    }
}
