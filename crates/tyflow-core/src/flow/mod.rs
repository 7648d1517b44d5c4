//! Flow-value lattice for global constant propagation
//!
//! Values start optimistic at the top (`Any`, printed `~Scalar`) and only
//! fall toward the bottom (`Scalar`):
//! - `meet` is the greatest lower bound, the direction GCP moves in
//! - `join` is the least upper bound
//! - nil doubles as the integer and float zero and as the null pointer

mod bits;

pub use bits::Bits;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One coordinate of a flow value: optimistic top, a constant, or the
/// bottom of its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Num<T> {
    Top,
    Con(T),
    Bot,
}

impl<T: Clone + PartialEq> Num<T> {
    pub fn meet(&self, other: &Num<T>) -> Num<T> {
        match (self, other) {
            (Num::Top, x) | (x, Num::Top) => x.clone(),
            (Num::Bot, _) | (_, Num::Bot) => Num::Bot,
            (Num::Con(a), Num::Con(b)) => {
                if a == b {
                    Num::Con(a.clone())
                } else {
                    Num::Bot
                }
            }
        }
    }

    pub fn join(&self, other: &Num<T>) -> Num<T> {
        match (self, other) {
            (Num::Bot, x) | (x, Num::Bot) => x.clone(),
            (Num::Top, _) | (_, Num::Top) => Num::Top,
            (Num::Con(a), Num::Con(b)) => {
                if a == b {
                    Num::Con(a.clone())
                } else {
                    Num::Top
                }
            }
        }
    }

    pub fn dual(&self) -> Num<T> {
        match self {
            Num::Top => Num::Bot,
            Num::Bot => Num::Top,
            Num::Con(c) => Num::Con(c.clone()),
        }
    }

    pub fn con(&self) -> Option<&T> {
        match self {
            Num::Con(c) => Some(c),
            _ => None,
        }
    }
}

/// Coarse classification of a flow value, used when two base types clash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Any,
    Nil,
    Int,
    Flt,
    Str,
    Fun,
    Ptr,
    Scalar,
}

impl FlowKind {
    /// Survival order when unrelated base kinds merge: lower ranks win.
    pub fn priority(self) -> u8 {
        match self {
            FlowKind::Int => 0,
            FlowKind::Flt => 1,
            FlowKind::Str => 2,
            FlowKind::Ptr => 3,
            FlowKind::Fun => 4,
            FlowKind::Nil => 5,
            FlowKind::Any => 6,
            FlowKind::Scalar => 7,
        }
    }
}

/// A value in the flow lattice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Flow {
    /// Top: not yet reached, could still become anything
    Any,
    /// The null value, also the integer and float zero
    Nil,
    Int(Num<i64>),
    Flt(Num<f64>),
    Str { val: Num<String>, nil: bool },
    /// Set of function identities the value may call
    Fun { fidxs: Bits, nil: bool },
    /// Set of allocation sites the value may point at
    Ptr { aliases: Bits, nil: bool },
    /// Bottom: any value at all
    Scalar,
}

impl Flow {
    pub fn int(v: i64) -> Flow {
        Flow::Int(Num::Con(v))
    }

    pub fn int64() -> Flow {
        Flow::Int(Num::Bot)
    }

    pub fn flt(v: f64) -> Flow {
        Flow::Flt(Num::Con(v))
    }

    pub fn flt64() -> Flow {
        Flow::Flt(Num::Bot)
    }

    pub fn str(v: impl Into<String>) -> Flow {
        Flow::Str { val: Num::Con(v.into()), nil: false }
    }

    pub fn str_bot(nil: bool) -> Flow {
        Flow::Str { val: Num::Bot, nil }
    }

    pub fn fun(fidx: u32) -> Flow {
        Flow::Fun { fidxs: Bits::single(fidx), nil: false }
    }

    pub fn fun_full() -> Flow {
        Flow::Fun { fidxs: Bits::full(), nil: false }
    }

    pub fn ptr(alias: u32) -> Flow {
        Flow::Ptr { aliases: Bits::single(alias), nil: false }
    }

    pub fn ptr_full() -> Flow {
        Flow::Ptr { aliases: Bits::full(), nil: false }
    }

    pub fn bool(b: bool) -> Flow {
        Flow::int(i64::from(b))
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            Flow::Any => FlowKind::Any,
            Flow::Nil => FlowKind::Nil,
            Flow::Int(_) => FlowKind::Int,
            Flow::Flt(_) => FlowKind::Flt,
            Flow::Str { .. } => FlowKind::Str,
            Flow::Fun { .. } => FlowKind::Fun,
            Flow::Ptr { .. } => FlowKind::Ptr,
            Flow::Scalar => FlowKind::Scalar,
        }
    }

    /// Greatest lower bound
    pub fn meet(&self, other: &Flow) -> Flow {
        match (self, other) {
            (Flow::Any, x) | (x, Flow::Any) => x.clone(),
            (Flow::Scalar, _) | (_, Flow::Scalar) => Flow::Scalar,
            (Flow::Nil, Flow::Nil) => Flow::Nil,
            (Flow::Nil, x) | (x, Flow::Nil) => x.with_nil(),
            (Flow::Int(a), Flow::Int(b)) => Flow::Int(a.meet(b)),
            (Flow::Flt(a), Flow::Flt(b)) => Flow::Flt(a.meet(b)),
            (Flow::Str { val: a, nil: n0 }, Flow::Str { val: b, nil: n1 }) => {
                Flow::Str { val: a.meet(b), nil: *n0 || *n1 }
            }
            (Flow::Fun { fidxs: a, nil: n0 }, Flow::Fun { fidxs: b, nil: n1 }) => {
                Flow::Fun { fidxs: a.union(b), nil: *n0 || *n1 }
            }
            (Flow::Ptr { aliases: a, nil: n0 }, Flow::Ptr { aliases: b, nil: n1 }) => {
                Flow::Ptr { aliases: a.union(b), nil: *n0 || *n1 }
            }
            _ => Flow::Scalar,
        }
    }

    /// Least upper bound
    pub fn join(&self, other: &Flow) -> Flow {
        match (self, other) {
            (Flow::Scalar, x) | (x, Flow::Scalar) => x.clone(),
            (Flow::Any, _) | (_, Flow::Any) => Flow::Any,
            (Flow::Int(a), Flow::Int(b)) => Flow::Int(a.join(b)),
            (Flow::Flt(a), Flow::Flt(b)) => Flow::Flt(a.join(b)),
            (Flow::Str { val: a, nil: n0 }, Flow::Str { val: b, nil: n1 }) => {
                Flow::Str { val: a.join(b), nil: *n0 && *n1 }
            }
            (Flow::Fun { fidxs: a, nil: n0 }, Flow::Fun { fidxs: b, nil: n1 }) => {
                Flow::Fun { fidxs: a.intersect(b), nil: *n0 && *n1 }
            }
            (Flow::Ptr { aliases: a, nil: n0 }, Flow::Ptr { aliases: b, nil: n1 }) => {
                Flow::Ptr { aliases: a.intersect(b), nil: *n0 && *n1 }
            }
            // Across kinds the only common upper bounds are nil and top
            (a, b) => {
                if a.below_nil() && b.below_nil() {
                    Flow::Nil
                } else {
                    Flow::Any
                }
            }
        }
    }

    /// Mirror image across the lattice center
    pub fn dual(&self) -> Flow {
        match self {
            Flow::Any => Flow::Scalar,
            Flow::Scalar => Flow::Any,
            Flow::Nil => Flow::Nil,
            Flow::Int(n) => Flow::Int(n.dual()),
            Flow::Flt(n) => Flow::Flt(n.dual()),
            Flow::Str { val, nil } => Flow::Str { val: val.dual(), nil: *nil },
            Flow::Fun { fidxs, nil } => Flow::Fun { fidxs: dual_bits(fidxs), nil: *nil },
            Flow::Ptr { aliases, nil } => Flow::Ptr { aliases: dual_bits(aliases), nil: *nil },
        }
    }

    /// Drop constants to the bottom of their kind
    pub fn widen(&self) -> Flow {
        match self {
            Flow::Int(Num::Con(_)) => Flow::int64(),
            Flow::Flt(Num::Con(_)) => Flow::flt64(),
            Flow::Str { val: Num::Con(_), nil } => Flow::str_bot(*nil),
            other => other.clone(),
        }
    }

    pub fn is_con(&self) -> bool {
        match self {
            Flow::Nil => true,
            Flow::Int(Num::Con(_)) | Flow::Flt(Num::Con(_)) => true,
            Flow::Str { val: Num::Con(_), nil } => !nil,
            _ => false,
        }
    }

    /// Strictly on the optimistic side of the constants
    pub fn above_center(&self) -> bool {
        match self {
            Flow::Any => true,
            Flow::Int(Num::Top) | Flow::Flt(Num::Top) => true,
            Flow::Str { val: Num::Top, .. } => true,
            Flow::Fun { fidxs, .. } => fidxs.is_empty(),
            Flow::Ptr { aliases, .. } => aliases.is_empty(),
            _ => false,
        }
    }

    /// `self` is at or above `other`
    pub fn isa(&self, other: &Flow) -> bool {
        self.meet(other) == *other
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Flow::Any)
    }

    pub fn may_nil(&self) -> bool {
        match self {
            Flow::Nil | Flow::Scalar => true,
            Flow::Str { nil, .. } | Flow::Fun { nil, .. } | Flow::Ptr { nil, .. } => *nil,
            _ => false,
        }
    }

    /// Same value with the nil possibility added
    pub fn with_nil(&self) -> Flow {
        match self {
            Flow::Any | Flow::Nil => Flow::Nil,
            Flow::Int(n) => Flow::Int(n.meet(&Num::Con(0))),
            Flow::Flt(n) => Flow::Flt(n.meet(&Num::Con(0.0))),
            Flow::Str { val, .. } => Flow::Str { val: val.clone(), nil: true },
            Flow::Fun { fidxs, .. } => Flow::Fun { fidxs: fidxs.clone(), nil: true },
            Flow::Ptr { aliases, .. } => Flow::Ptr { aliases: aliases.clone(), nil: true },
            Flow::Scalar => Flow::Scalar,
        }
    }

    /// Same value with the nil possibility removed
    pub fn not_nil(&self) -> Flow {
        match self {
            Flow::Nil => Flow::Any,
            Flow::Str { val, .. } => Flow::Str { val: val.clone(), nil: false },
            Flow::Fun { fidxs, .. } => Flow::Fun { fidxs: fidxs.clone(), nil: false },
            Flow::Ptr { aliases, .. } => Flow::Ptr { aliases: aliases.clone(), nil: false },
            other => other.clone(),
        }
    }

    /// Truth value of a predicate, when the lattice knows it
    pub fn truthy(&self) -> Option<bool> {
        match self {
            Flow::Nil => Some(false),
            Flow::Int(Num::Con(v)) => Some(*v != 0),
            Flow::Flt(Num::Con(v)) => Some(*v != 0.0),
            Flow::Str { nil: false, .. } => Some(true),
            Flow::Fun { fidxs, nil: false } if !fidxs.is_empty() => Some(true),
            Flow::Ptr { aliases, nil: false } if !aliases.is_empty() => Some(true),
            _ => None,
        }
    }

    fn below_nil(&self) -> bool {
        Flow::Nil.isa(self)
    }
}

fn dual_bits(bits: &Bits) -> Bits {
    if bits.is_full() {
        Bits::empty()
    } else if bits.is_empty() {
        Bits::full()
    } else {
        bits.clone()
    }
}

impl Default for Flow {
    fn default() -> Self {
        Flow::Any
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let q = |nil: bool| if nil { "?" } else { "" };
        match self {
            Flow::Any => write!(f, "~Scalar"),
            Flow::Scalar => write!(f, "Scalar"),
            Flow::Nil => write!(f, "nil"),
            Flow::Int(Num::Top) => write!(f, "~int64"),
            Flow::Int(Num::Con(v)) => write!(f, "{}", v),
            Flow::Int(Num::Bot) => write!(f, "int64"),
            Flow::Flt(Num::Top) => write!(f, "~flt64"),
            Flow::Flt(Num::Con(v)) => write!(f, "{:?}", v),
            Flow::Flt(Num::Bot) => write!(f, "flt64"),
            Flow::Str { val: Num::Top, nil } => write!(f, "~str{}", q(*nil)),
            Flow::Str { val: Num::Con(s), nil } => write!(f, "{:?}{}", s, q(*nil)),
            Flow::Str { val: Num::Bot, nil } => write!(f, "str{}", q(*nil)),
            Flow::Fun { fidxs, nil } => write!(f, "fun{}{}", fidxs, q(*nil)),
            Flow::Ptr { aliases, nil } => write!(f, "*{}{}", aliases, q(*nil)),
        }
    }
}
