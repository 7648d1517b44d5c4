//! Primitive operators
//!
//! Each primitive has a fixed HM signature, built fresh per use site, and a
//! flow transfer function over the actual argument flows.

use crate::flow::{Flow, Num};
use crate::types::{T2Id, TypeGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimOp {
    Pair,
    Triple,
    If,
    Eq,
    Eq0,
    IsEmpty,
    NotNil,
    Mul,
    Add,
    Dec,
    Str,
    Factor,
    Rand,
}

impl PrimOp {
    pub const ALL: [PrimOp; 13] = [
        PrimOp::Pair,
        PrimOp::Triple,
        PrimOp::If,
        PrimOp::Eq,
        PrimOp::Eq0,
        PrimOp::IsEmpty,
        PrimOp::NotNil,
        PrimOp::Mul,
        PrimOp::Add,
        PrimOp::Dec,
        PrimOp::Str,
        PrimOp::Factor,
        PrimOp::Rand,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimOp::Pair => "pair",
            PrimOp::Triple => "triple",
            PrimOp::If => "if",
            PrimOp::Eq => "eq",
            PrimOp::Eq0 => "eq0",
            PrimOp::IsEmpty => "isempty",
            PrimOp::NotNil => "notnil",
            PrimOp::Mul => "*",
            PrimOp::Add => "+",
            PrimOp::Dec => "dec",
            PrimOp::Str => "str",
            PrimOp::Factor => "factor",
            PrimOp::Rand => "rand",
        }
    }

    pub fn from_name(name: &str) -> Option<PrimOp> {
        PrimOp::ALL.into_iter().find(|op| op.name() == name)
    }

    pub fn nargs(self) -> usize {
        match self {
            PrimOp::Triple | PrimOp::If => 3,
            PrimOp::Pair | PrimOp::Eq | PrimOp::Mul | PrimOp::Add => 2,
            _ => 1,
        }
    }

    /// Primitives whose result is a freshly allocated record
    pub fn allocates(self) -> bool {
        matches!(self, PrimOp::Pair | PrimOp::Triple | PrimOp::Factor)
    }

    /// Build this primitive's function type in `g`
    pub fn sig(self, g: &mut TypeGraph) -> T2Id {
        let int = |g: &mut TypeGraph| g.new_base(Flow::int64());
        match self {
            PrimOp::Pair | PrimOp::Triple => {
                let args: Vec<T2Id> = (0..self.nargs()).map(|_| g.new_leaf()).collect();
                let fields = args.iter().enumerate().map(|(i, a)| (i.to_string(), *a));
                let ret = g.new_ptr(fields.collect::<Vec<_>>(), false);
                g.new_fun(args, ret)
            }
            PrimOp::If => {
                let pred = g.new_leaf();
                let arm = g.new_leaf();
                g.new_fun([pred, arm, arm], arm)
            }
            PrimOp::Eq => {
                let a = g.new_leaf();
                let ret = int(g);
                g.new_fun([a, a], ret)
            }
            PrimOp::Eq0 | PrimOp::Dec | PrimOp::Rand => {
                let arg = int(g);
                let ret = int(g);
                g.new_fun([arg], ret)
            }
            PrimOp::IsEmpty => {
                let arg = g.new_base(Flow::str_bot(true));
                let ret = int(g);
                g.new_fun([arg], ret)
            }
            PrimOp::NotNil => {
                let a = g.new_leaf();
                let na = g.new_nilable(a);
                g.new_fun([na], a)
            }
            PrimOp::Mul | PrimOp::Add => {
                let x = int(g);
                let y = int(g);
                let ret = int(g);
                g.new_fun([x, y], ret)
            }
            PrimOp::Str => {
                let arg = int(g);
                let ret = g.new_base(Flow::str_bot(false));
                g.new_fun([arg], ret)
            }
            PrimOp::Factor => {
                let arg = g.new_base(Flow::flt64());
                let lo = g.new_base(Flow::flt64());
                let hi = g.new_base(Flow::flt64());
                let ret = g.new_ptr([("0".to_string(), lo), ("1".to_string(), hi)], false);
                g.new_fun([arg], ret)
            }
        }
    }

    /// Result flow for a call with these actuals
    pub fn apply(self, args: &[Flow], alias: Option<u32>) -> Flow {
        if let Some(alias) = alias.filter(|_| self.allocates()) {
            return Flow::ptr(alias);
        }
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Flow::Any);
        if self == PrimOp::If {
            let pred = arg(0);
            if pred.is_any() {
                return Flow::Any;
            }
            return match pred.truthy() {
                Some(true) => arg(1),
                Some(false) => arg(2),
                None => arg(1).meet(&arg(2)),
            };
        }
        // Everything else is strict in every argument
        if args.iter().any(Flow::is_any) {
            return Flow::Any;
        }
        match self {
            PrimOp::Eq => match con_eq(&arg(0), &arg(1)) {
                Some(b) => Flow::bool(b),
                None => Flow::int64(),
            },
            PrimOp::Eq0 => match arg(0) {
                Flow::Nil => Flow::bool(true),
                Flow::Int(Num::Con(v)) => Flow::bool(v == 0),
                Flow::Flt(Num::Con(v)) => Flow::bool(v == 0.0),
                _ => Flow::int64(),
            },
            PrimOp::IsEmpty => match arg(0) {
                Flow::Nil => Flow::bool(true),
                Flow::Str { val: Num::Con(s), nil: false } => Flow::bool(s.is_empty()),
                _ => Flow::int64(),
            },
            PrimOp::NotNil => match arg(0) {
                // Only nil reaches here: the call never returns
                Flow::Nil => Flow::Any,
                f => f.not_nil(),
            },
            PrimOp::Mul | PrimOp::Add => match (as_int(&arg(0)), as_int(&arg(1))) {
                (Some(x), Some(y)) if self == PrimOp::Mul => Flow::int(x.wrapping_mul(y)),
                (Some(x), Some(y)) => Flow::int(x.wrapping_add(y)),
                _ => Flow::int64(),
            },
            PrimOp::Dec => match as_int(&arg(0)) {
                Some(x) => Flow::int(x.wrapping_sub(1)),
                None => Flow::int64(),
            },
            PrimOp::Str => match as_int(&arg(0)) {
                Some(x) => Flow::str(x.to_string()),
                None => Flow::str_bot(false),
            },
            PrimOp::Rand => Flow::int64(),
            PrimOp::Pair | PrimOp::Triple | PrimOp::Factor => Flow::ptr_full(),
            PrimOp::If => Flow::Scalar,
        }
    }

    /// Field flow of a record allocated by this primitive
    pub fn load(self, label: &str, formals: &[Flow]) -> Option<Flow> {
        match self {
            PrimOp::Pair | PrimOp::Triple => {
                let i: usize = label.parse().ok()?;
                formals.get(i).cloned()
            }
            PrimOp::Factor if label == "0" || label == "1" => {
                let arg = formals.first().cloned().unwrap_or(Flow::Any);
                Some(if arg.is_any() { Flow::Any } else { Flow::flt64() })
            }
            _ => None,
        }
    }
}

/// Integer value of a constant; nil counts as zero
fn as_int(f: &Flow) -> Option<i64> {
    match f {
        Flow::Nil => Some(0),
        Flow::Int(Num::Con(v)) => Some(*v),
        _ => None,
    }
}

/// Equality of two constants, when both are known
fn con_eq(a: &Flow, b: &Flow) -> Option<bool> {
    if !a.is_con() || !b.is_con() {
        return None;
    }
    let zero = |f: &Flow| match f {
        Flow::Nil => Some(true),
        Flow::Int(Num::Con(v)) => Some(*v == 0),
        Flow::Flt(Num::Con(v)) => Some(*v == 0.0),
        _ => None,
    };
    match (a, b) {
        (Flow::Nil, x) | (x, Flow::Nil) => Some(zero(x).unwrap_or(false)),
        _ => Some(a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for op in PrimOp::ALL {
            assert_eq!(PrimOp::from_name(op.name()), Some(op));
        }
        assert_eq!(PrimOp::from_name("nope"), None);
    }

    #[test]
    fn test_constant_folding() {
        assert_eq!(PrimOp::Mul.apply(&[Flow::int(3), Flow::int(4)], None), Flow::int(12));
        assert_eq!(PrimOp::Add.apply(&[Flow::int(3), Flow::int64()], None), Flow::int64());
        assert_eq!(PrimOp::Dec.apply(&[Flow::int(2)], None), Flow::int(1));
        assert_eq!(PrimOp::Str.apply(&[Flow::int(7)], None), Flow::str("7"));
        assert_eq!(PrimOp::Eq0.apply(&[Flow::Nil], None), Flow::bool(true));
        assert_eq!(PrimOp::Eq.apply(&[Flow::int(2), Flow::int(2)], None), Flow::bool(true));
        assert_eq!(PrimOp::Eq.apply(&[Flow::Nil, Flow::int(1)], None), Flow::bool(false));
        assert_eq!(PrimOp::IsEmpty.apply(&[Flow::str("")], None), Flow::bool(true));
    }

    #[test]
    fn test_strict_in_unreached_args() {
        assert_eq!(PrimOp::Mul.apply(&[Flow::Any, Flow::int(4)], None), Flow::Any);
        assert_eq!(PrimOp::Rand.apply(&[Flow::Any], None), Flow::Any);
        assert_eq!(PrimOp::Pair.apply(&[Flow::Any, Flow::Any], Some(3)), Flow::ptr(3));
    }

    #[test]
    fn test_if_picks_arm() {
        let (a, b) = (Flow::int(1), Flow::str("b"));
        assert_eq!(PrimOp::If.apply(&[Flow::int(1), a.clone(), b.clone()], None), a);
        assert_eq!(PrimOp::If.apply(&[Flow::Nil, a.clone(), b.clone()], None), b);
        assert_eq!(PrimOp::If.apply(&[Flow::Any, a.clone(), b.clone()], None), Flow::Any);
        assert_eq!(PrimOp::If.apply(&[Flow::int64(), a.clone(), b.clone()], None), a.meet(&b));
    }

    #[test]
    fn test_notnil_strips_nil() {
        let f = Flow::str("abc").with_nil();
        assert_eq!(PrimOp::NotNil.apply(&[f], None), Flow::str("abc"));
    }

    #[test]
    fn test_pair_load() {
        let formals = [Flow::int(1), Flow::str("x")];
        assert_eq!(PrimOp::Pair.load("1", &formals), Some(Flow::str("x")));
        assert_eq!(PrimOp::Pair.load("2", &formals), None);
        assert_eq!(PrimOp::Factor.load("0", &[Flow::flt(2.0)]), Some(Flow::flt64()));
    }

    #[test]
    fn test_signatures_print() {
        let mut g = TypeGraph::new();
        let pair = PrimOp::Pair.sig(&mut g);
        assert_eq!(g.print(pair), "{A, B -> *@{0=A, 1=B}}");
        let notnil = PrimOp::NotNil.sig(&mut g);
        assert_eq!(g.print(notnil), "{A? -> A}");
        let isempty = PrimOp::IsEmpty.sig(&mut g);
        assert_eq!(g.print(isempty), "{str? -> int64}");
    }
}
