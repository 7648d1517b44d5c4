//! Structural unification and overload resolution

use super::{FunShape, Mode, ObjShape, OverShape, T2Id, TypeGraph, T2};
use crate::flow::Flow;
use smallvec::SmallVec;
use tracing::{debug, trace};

pub const MISMATCHED_ARGS: &str = "Mismatched argument lengths";
pub const AMBIGUOUS: &str = "Ambiguous overload";

type Pairs = SmallVec<[(T2Id, T2Id); 8]>;

/// Merge two base flows. Same kinds (or nil) meet; unrelated kinds keep the
/// higher-priority flow and return the other as an error flow.
pub(super) fn combine(f0: &Flow, f1: &Flow) -> (Flow, Option<Flow>) {
    if f0.kind() == f1.kind() || matches!(f0, Flow::Nil) || matches!(f1, Flow::Nil) {
        return (f0.meet(f1), None);
    }
    if f0.kind().priority() <= f1.kind().priority() {
        (f0.clone(), Some(f1.clone()))
    } else {
        (f1.clone(), Some(f0.clone()))
    }
}

fn meet_opt(a: Option<Flow>, b: Option<Flow>) -> Option<Flow> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.meet(&b)),
        (a, b) => a.or(b),
    }
}

impl TypeGraph {
    /// Unify `a` and `b`; true when an existing node changed.
    ///
    /// In `Mode::Test` the work happens on a scratch copy and only the
    /// progress flag survives.
    pub fn unify(&mut self, a: T2Id, b: T2Id, mode: Mode) -> bool {
        if mode == Mode::Test {
            return self.scratch().unify(a, b, Mode::Apply);
        }
        let before = self.begin_op();
        self.unify_rec(a, b);
        self.end_op(before)
    }

    /// Whether `a` and `b` unify without creating a new error.
    ///
    /// Errors can land on record fields that the merge then drops, so the
    /// scratch graph's message count is checked as well as the result.
    pub fn trial_unify_ok(&mut self, a: T2Id, b: T2Id) -> bool {
        let before = self.deep_err_count(a) + self.deep_err_count(b);
        let mut g = self.scratch();
        g.unify_rec(a, b);
        g.raised == 0 && g.deep_err_count(a) <= before
    }

    pub(super) fn unify_rec(&mut self, a: T2Id, b: T2Id) {
        let a = self.find(a);
        let b = self.find(b);
        if a == b {
            return;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if !self.visit.insert(key) {
            return;
        }
        trace!(a = a.0, b = b.0, "unify");
        let (lo, hi) = key;

        let na = &self.nodes[a.idx()];
        let nb = &self.nodes[b.idx()];
        match (na.is_leaf(), nb.is_leaf()) {
            (true, true) => return self.union(hi, lo),
            (true, false) => return self.union(a, b),
            (false, true) => return self.union(b, a),
            (false, false) => {}
        }
        match (na.over.is_some(), nb.over.is_some()) {
            (true, false) => return self.unify_over(a, b),
            (false, true) => return self.unify_over(b, a),
            _ => {}
        }
        if na.is_base() && nb.is_base() {
            return self.unify_base(lo, hi);
        }
        match (na.nil_child, nb.nil_child) {
            (Some(ca), Some(cb)) => {
                self.union(hi, lo);
                return self.unify_rec(ca, cb);
            }
            (Some(_), None) => return self.unify_nil(a, b),
            (None, Some(_)) => return self.unify_nil(b, a),
            (None, None) => {}
        }
        self.union(a, b);
        self.merge(a, b);
    }

    fn unify_base(&mut self, lo: T2Id, hi: T2Id) {
        let src = self.nodes[hi.idx()].clone();
        self.union(hi, lo);
        if let Some(f) = &src.flow {
            self.combine_into(lo, f);
        }
        self.merge_err(lo, src.eflow, src.err);
    }

    /// Meet a base flow into `into`; true when it changed
    pub(super) fn combine_into(&mut self, into: T2Id, flow: &Flow) -> bool {
        let node = &mut self.nodes[into.idx()];
        let (merged, lost) = match &node.flow {
            Some(cur) => combine(cur, flow),
            None => (flow.clone(), None),
        };
        let eflow = match lost {
            Some(lost) => meet_opt(node.eflow.clone(), Some(lost)),
            None => node.eflow.clone(),
        };
        if node.flow.as_ref() == Some(&merged) && node.eflow == eflow {
            return false;
        }
        node.flow = Some(merged);
        node.eflow = eflow;
        self.touch(into);
        true
    }

    pub(super) fn merge_err(&mut self, into: T2Id, eflow: Option<Flow>, err: Option<String>) {
        let node = &mut self.nodes[into.idx()];
        let new_eflow = meet_opt(node.eflow.clone(), eflow);
        let new_err = node.err.clone().or(err);
        if new_eflow != node.eflow || new_err != node.err {
            node.eflow = new_eflow;
            node.err = new_err;
            self.touch(into);
        }
    }

    /// Mark `x` as possibly nil
    pub(super) fn set_nil(&mut self, x: T2Id) {
        let node = &mut self.nodes[x.idx()];
        let mut changed = false;
        if let Some(f) = &node.flow {
            let nf = f.meet(&Flow::Nil);
            if nf != *f {
                node.flow = Some(nf);
                changed = true;
            }
        }
        let structural = node.ptr.is_some() || node.fun.is_some() || node.obj.is_some() || node.over.is_some();
        if structural && !node.may_nil {
            node.may_nil = true;
            changed = true;
        }
        if changed {
            self.touch(x);
        }
    }

    /// `n` is nilable, `x` is not: an unwrapped copy of `x` unifies with the
    /// nilable's child and `x` takes over as the nil-marked result
    fn unify_nil(&mut self, n: T2Id, x: T2Id) {
        let Some(child) = self.nodes[n.idx()].nil_child else {
            return;
        };
        let c = self.unwrapped_copy(x);
        self.union(n, x);
        self.set_nil(x);
        self.unify_rec(child, c);
    }

    /// New node sharing the components of `x` without its nil marking
    pub(super) fn unwrapped_copy(&mut self, x: T2Id) -> T2Id {
        let src = &self.nodes[x.idx()];
        let copy = T2 {
            flow: src.flow.as_ref().map(Flow::not_nil),
            ptr: src.ptr,
            fun: src.fun.clone(),
            obj: src.obj.clone(),
            over: src.over.clone(),
            ..T2::default()
        };
        self.push(copy)
    }

    /// Fold the components of `a` (already redirected) into `b`
    fn merge(&mut self, a: T2Id, b: T2Id) {
        let src = self.nodes[a.idx()].clone();
        let mut pairs = Pairs::new();
        let mut missing: Vec<(T2Id, String)> = Vec::new();
        let mut changed = false;

        if let Some(f) = &src.flow {
            changed |= self.combine_into(b, f);
        }
        self.merge_err(b, src.eflow.clone(), src.err.clone());

        let dst = &mut self.nodes[b.idx()];
        match (src.ptr, dst.ptr) {
            (Some(p), Some(q)) => pairs.push((p, q)),
            (Some(p), None) => {
                dst.ptr = Some(p);
                changed = true;
            }
            _ => {}
        }
        match (src.fun, dst.fun.clone()) {
            (Some(fa), Some(fb)) => {
                if fa.args.len() != fb.args.len() && dst.err.is_none() {
                    dst.err = Some(MISMATCHED_ARGS.to_string());
                    self.raised += 1;
                    changed = true;
                }
                pairs.extend(fun_pairs(&fa, &fb));
            }
            (Some(fa), None) => {
                dst.fun = Some(fa);
                changed = true;
            }
            _ => {}
        }
        if let Some(oa) = &src.obj {
            match dst.obj.take() {
                Some(mut ob) => {
                    changed |= merge_fields(oa, &mut ob, &mut pairs, &mut missing);
                    dst.obj = Some(ob);
                }
                None => {
                    dst.obj = Some(oa.clone());
                    changed = true;
                }
            }
        }
        match (src.over, dst.over.clone()) {
            (Some(va), Some(vb)) if va.tag != vb.tag => {
                if va.alts.len() == vb.alts.len() {
                    pairs.extend(va.alts.iter().copied().zip(vb.alts.iter().copied()));
                } else if dst.err.is_none() {
                    dst.err = Some("Cannot unify overloads of different sizes".to_string());
                    self.raised += 1;
                    changed = true;
                }
            }
            (Some(va), None) => {
                dst.over = Some(va);
                changed = true;
            }
            _ => {}
        }
        if src.may_nil && !dst.may_nil {
            dst.may_nil = true;
            changed = true;
        }

        if changed {
            self.touch(b);
        }
        for (t2, label) in missing {
            self.set_err(t2, format!("Missing field {}", label));
        }
        for (x, y) in pairs {
            self.unify_rec(x, y);
        }
    }

    /// Resolve overload `o` against `x` by probing each alternative
    pub(super) fn unify_over(&mut self, o: T2Id, x: T2Id) {
        let Some(OverShape { alts, tag }) = self.nodes[o.idx()].over.clone() else {
            return;
        };
        let mut clean: SmallVec<[usize; 2]> = SmallVec::new();
        for (i, alt) in alts.iter().enumerate() {
            if self.trial_unify_ok(*alt, x) {
                clean.push(i);
            }
        }
        match clean.as_slice() {
            [i] => {
                debug!(tag, alt = *i, "overload resolved");
                self.record_resolution(tag, *i);
                let alt = self.find(alts[*i]);
                if alt != o {
                    self.union(o, alt);
                }
                self.unify_rec(alt, x);
            }
            [] => {
                debug!(tag, "no alternative fits; unifying all");
                for i in 0..alts.len() {
                    self.record_resolution(tag, i);
                }
                self.union(o, x);
                for alt in alts {
                    self.unify_rec(alt, x);
                }
            }
            _ if self.force_ambiguity => {
                debug!(tag, choices = clean.len(), "ambiguous overload committed");
                for i in 0..alts.len() {
                    self.record_resolution(tag, i);
                }
                self.union(o, x);
                self.set_err(x, AMBIGUOUS);
            }
            _ => {
                trace!(tag, choices = clean.len(), "overload stalled");
                if let Some(ctx) = self.ctx {
                    self.add_deps_deep(o, ctx);
                    self.add_deps_deep(x, ctx);
                }
            }
        }
    }
}

/// Merge record `oa` into record `ob` in place. Shared keys become unify
/// pairs; a key missing on a closed side is dropped and reported.
pub(super) fn merge_fields(
    oa: &ObjShape,
    ob: &mut ObjShape,
    pairs: &mut Pairs,
    missing: &mut Vec<(T2Id, String)>,
) -> bool {
    let mut changed = false;
    let open = oa.open && ob.open;
    for (k, ta) in &oa.fields {
        match ob.fields.get(k) {
            Some(tb) => pairs.push((*ta, *tb)),
            None if ob.open => {
                ob.fields.insert(k.clone(), *ta);
                changed = true;
            }
            None => missing.push((*ta, k.clone())),
        }
    }
    if !oa.open {
        let extra: Vec<String> = ob
            .fields
            .keys()
            .filter(|k| !oa.fields.contains_key(*k))
            .cloned()
            .collect();
        for k in extra {
            if let Some(tb) = ob.fields.shift_remove(&k) {
                missing.push((tb, k));
                changed = true;
            }
        }
    }
    if ob.open != open {
        ob.open = open;
        changed = true;
    }
    changed
}

/// Function shapes of equal arity pair up argument by argument
pub(super) fn fun_pairs(fa: &FunShape, fb: &FunShape) -> Pairs {
    let mut pairs: Pairs = fa.args.iter().copied().zip(fb.args.iter().copied()).collect();
    pairs.push((fa.ret, fb.ret));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mode;

    fn int(g: &mut TypeGraph) -> T2Id {
        g.new_base(Flow::int64())
    }

    #[test]
    fn test_leaf_absorbed() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = int(&mut g);
        assert!(g.unify(a, b, Mode::Apply));
        assert_eq!(g.find(a), b);
        assert!(!g.unify(a, b, Mode::Apply));
    }

    #[test]
    fn test_leaves_union_toward_lower_id() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = g.new_leaf();
        g.unify(b, a, Mode::Apply);
        assert_eq!(g.find(b), a);
    }

    #[test]
    fn test_test_mode_does_not_mutate() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = int(&mut g);
        assert!(g.unify(a, b, Mode::Test));
        assert!(g.is_leaf(a));
    }

    #[test]
    fn test_base_clash_keeps_error_flow() {
        let mut g = TypeGraph::new();
        let a = g.new_base(Flow::int(1));
        let b = g.new_base(Flow::str("a"));
        g.unify(b, a, Mode::Apply);
        let r = g.find(b);
        assert_eq!(r, a);
        assert_eq!(g.node(r).flow, Some(Flow::int(1)));
        assert_eq!(g.node(r).eflow, Some(Flow::str("a")));
        assert!(g.is_err(r));
    }

    #[test]
    fn test_same_kind_constants_meet() {
        let mut g = TypeGraph::new();
        let a = g.new_base(Flow::int(3));
        let b = int(&mut g);
        g.unify(a, b, Mode::Apply);
        let r = g.find(a);
        assert_eq!(g.node(r).flow, Some(Flow::int64()));
        assert!(!g.is_err(r));
    }

    #[test]
    fn test_nilable_meets_pointer() {
        let mut g = TypeGraph::new();
        let leaf = g.new_leaf();
        let n = g.new_nilable(leaf);
        let x = g.new_leaf();
        let p = g.new_ptr([("x".to_string(), x)], false);
        g.unify(n, p, Mode::Apply);
        let r = g.find(n);
        assert_eq!(r, p);
        assert!(g.node(p).may_nil);
        // the child became an unwrapped pointer to the same record
        let c = g.find(leaf);
        assert!(!g.node(c).may_nil);
        assert_eq!(g.pointee(c), g.pointee(p));
    }

    #[test]
    fn test_open_record_gains_fields() {
        let mut g = TypeGraph::new();
        let x = g.new_leaf();
        let y = g.new_leaf();
        let z = int(&mut g);
        let open = g.new_ptr([("x".to_string(), x)], true);
        let full = g.new_ptr([("x".to_string(), z), ("y".to_string(), y)], false);
        g.unify(open, full, Mode::Apply);
        let obj = g.pointee(open).unwrap();
        let field_y = g.field(obj, "y").map(|t| g.find(t));
        assert_eq!(field_y, Some(g.find(y)));
        assert_eq!(g.find(x), g.find(z));
        let o = g.find(obj);
        assert!(!g.node(o).obj.as_ref().unwrap().open);
    }

    #[test]
    fn test_closed_records_drop_missing_fields() {
        let mut g = TypeGraph::new();
        let x0 = g.new_leaf();
        let y0 = g.new_leaf();
        let x1 = g.new_leaf();
        let a = g.new_ptr([("x".to_string(), x0), ("y".to_string(), y0)], false);
        let b = g.new_ptr([("x".to_string(), x1)], false);
        g.unify(a, b, Mode::Apply);
        let obj = g.pointee(b).unwrap();
        assert!(g.field(obj, "y").is_none());
        let y = g.find(y0);
        assert_eq!(g.node(y).err.as_deref(), Some("Missing field y"));
    }

    #[test]
    fn test_fun_arity_mismatch_is_error() {
        let mut g = TypeGraph::new();
        let (a, b, r0, r1) = (g.new_leaf(), g.new_leaf(), g.new_leaf(), g.new_leaf());
        let f1 = g.new_fun([a], r0);
        let f2 = g.new_fun([a, b], r1);
        g.unify(f1, f2, Mode::Apply);
        assert!(g.is_err(f1));
        assert_eq!(g.find(r0), g.find(r1));
    }

    #[test]
    fn test_cyclic_unify_terminates() {
        let mut g = TypeGraph::new();
        let l0 = g.new_leaf();
        let l1 = g.new_leaf();
        let p0 = g.new_ptr([("next".to_string(), l0)], false);
        let p1 = g.new_ptr([("next".to_string(), l1)], false);
        g.unify(l0, p0, Mode::Apply);
        g.unify(l1, p1, Mode::Apply);
        g.unify(p0, p1, Mode::Apply);
        assert_eq!(g.find(p0), g.find(p1));
        assert!(!g.unify(p0, p1, Mode::Apply));
    }

    #[test]
    fn test_overload_single_clean_alternative() {
        let mut g = TypeGraph::new();
        let two = g.new_base(Flow::int(2));
        let flt = g.new_base(Flow::flt(2.3));
        let over = g.new_over([two, flt], 9);
        let formal = int(&mut g);
        g.unify(over, formal, Mode::Apply);
        assert_eq!(g.resolution(9), Some(&[0usize][..]));
        assert!(!g.is_err(formal));
        assert_eq!(g.find(over), g.find(formal));
    }

    #[test]
    fn test_overload_stalls_then_forced() {
        let mut g = TypeGraph::new();
        let one = g.new_base(Flow::int(1));
        let two = g.new_base(Flow::int(2));
        let over = g.new_over([one, two], 4);
        let formal = int(&mut g);
        assert!(!g.unify(over, formal, Mode::Apply));
        assert!(g.is_over(over));
        g.force_ambiguity = true;
        assert!(g.unify(over, formal, Mode::Apply));
        let f = g.find(formal);
        assert_eq!(g.node(f).err.as_deref(), Some(AMBIGUOUS));
    }

    #[test]
    fn test_overload_of_closed_records_resolves_by_field() {
        let mut g = TypeGraph::new();
        let one = g.new_base(Flow::int(1));
        let s = g.new_base(Flow::str("a"));
        let rx = g.new_ptr([("x".to_string(), one)], false);
        let ry = g.new_ptr([("y".to_string(), s)], false);
        let over = g.new_over([rx, ry], 3);
        let fx = g.new_leaf();
        let load = g.new_ptr([("x".to_string(), fx)], true);
        assert!(g.trial_unify_ok(rx, load));
        assert!(!g.trial_unify_ok(ry, load));

        g.force_ambiguity = true;
        g.unify(over, load, Mode::Apply);
        assert_eq!(g.resolution(3), Some(&[0usize][..]));
        assert!(!g.is_err(load));
        let f = g.find(fx);
        assert_eq!(g.node(f).flow, Some(Flow::int(1)));
    }

    #[test]
    fn test_combine_priority() {
        assert_eq!(combine(&Flow::str("a"), &Flow::int(1)), (Flow::int(1), Some(Flow::str("a"))));
        assert_eq!(combine(&Flow::Nil, &Flow::str("a")), (Flow::str("a").with_nil(), None));
    }
}
