//! Instantiate-and-unify without a separate copy pass

use super::unify::{fun_pairs, MISMATCHED_ARGS};
use super::{FunShape, Mode, ObjShape, OverShape, T2Id, TypeGraph, T2};
use crate::vstack::VStack;
use fnv::{FnvHashMap, FnvHashSet};
use smallvec::SmallVec;
use tracing::trace;

/// Source node -> its instance in the current fresh-unify
type Vars = FnvHashMap<T2Id, T2Id>;

impl TypeGraph {
    /// Unify a fresh instance of `src` into `dst`.
    ///
    /// Parts of `src` reachable from the non-generative stack are shared
    /// rather than copied; if `src` itself is one of them this is a plain
    /// unify. Only the parts of `src` that `dst` does not already mirror are
    /// actually cloned.
    pub fn fresh_unify(&mut self, src: T2Id, dst: T2Id, nongen: &VStack, mode: Mode) -> bool {
        if mode == Mode::Test {
            return self.scratch().fresh_unify(src, dst, nongen, Mode::Apply);
        }
        let before = self.begin_op();
        let ng = self.nongen_set(nongen);
        let s = self.find(src);
        if ng.contains(&s) {
            self.unify_rec(s, dst);
        } else {
            let mut vars = Vars::default();
            self.fresh_rec(s, dst, &ng, &mut vars);
        }
        self.end_op(before)
    }

    fn fresh_rec(&mut self, s: T2Id, d: T2Id, ng: &FnvHashSet<T2Id>, vars: &mut Vars) {
        let s = self.find(s);
        let d = self.find(d);
        if let Some(&m) = vars.get(&s) {
            return self.unify_rec(m, d);
        }
        if ng.contains(&s) {
            vars.insert(s, s);
            return self.unify_rec(s, d);
        }
        let sn = self.nodes[s.idx()].clone();
        if sn.is_leaf() || s == d {
            vars.insert(s, d);
            return;
        }
        if self.nodes[d.idx()].is_leaf() {
            let c = self.fresh_copy(s, ng, vars);
            let c = self.find(c);
            if c != d {
                self.union(d, c);
            }
            return;
        }
        let dn = self.nodes[d.idx()].clone();

        if let Some(child) = sn.nil_child {
            vars.insert(s, d);
            match dn.nil_child {
                Some(dchild) => self.fresh_rec(child, dchild, ng, vars),
                None => {
                    let c = self.unwrapped_copy(d);
                    self.set_nil(d);
                    self.fresh_rec(child, c, ng, vars);
                }
            }
            return;
        }
        // Shapes without a parallel walk go through a copy
        if dn.is_nilable() || sn.over.is_some() || dn.over.is_some() {
            let c = self.fresh_copy(s, ng, vars);
            return self.unify_rec(c, d);
        }

        vars.insert(s, d);
        trace!(src = s.0, dst = d.0, "fresh walk");
        let mut pairs: SmallVec<[(T2Id, T2Id); 8]> = SmallVec::new();
        let mut missing: Vec<(T2Id, String)> = Vec::new();
        let mut changed = false;

        if let Some(f) = &sn.flow {
            changed |= self.combine_into(d, f);
        }
        if sn.eflow.is_some() || sn.err.is_some() {
            self.merge_err(d, sn.eflow.clone(), sn.err.clone());
        }

        // New components are copied before `d` is borrowed
        let new_ptr = match (sn.ptr, dn.ptr) {
            (Some(p), Some(q)) => {
                pairs.push((p, q));
                None
            }
            (Some(p), None) => Some(self.fresh_copy(p, ng, vars)),
            _ => None,
        };
        let new_fun = match (&sn.fun, &dn.fun) {
            (Some(fs), Some(fd)) => {
                if fs.args.len() != fd.args.len() {
                    missing.push((d, MISMATCHED_ARGS.to_string()));
                }
                pairs.extend(fun_pairs(fs, fd));
                None
            }
            (Some(fs), None) => Some(self.copy_fun(fs, ng, vars)),
            _ => None,
        };
        let mut new_fields: Vec<(String, T2Id)> = Vec::new();
        let mut drop_fields: Vec<String> = Vec::new();
        let mut new_obj = None;
        match (&sn.obj, &dn.obj) {
            (Some(os), Some(od)) => {
                for (k, ts) in &os.fields {
                    match od.fields.get(k) {
                        Some(td) => pairs.push((*ts, *td)),
                        None if od.open => {
                            let c = self.fresh_copy(*ts, ng, vars);
                            new_fields.push((k.clone(), c));
                        }
                        None => {}
                    }
                }
                if !os.open {
                    for (k, td) in &od.fields {
                        if !os.fields.contains_key(k) {
                            drop_fields.push(k.clone());
                            missing.push((*td, format!("Missing field {}", k)));
                        }
                    }
                }
            }
            (Some(os), None) => new_obj = Some(self.copy_obj(os, ng, vars)),
            _ => {}
        }

        let node = &mut self.nodes[d.idx()];
        if let Some(p) = new_ptr {
            node.ptr = Some(p);
            changed = true;
        }
        if let Some(f) = new_fun {
            node.fun = Some(f);
            changed = true;
        }
        if let Some(o) = new_obj {
            node.obj = Some(o);
            changed = true;
        }
        if let (Some(os), Some(od)) = (&sn.obj, node.obj.as_mut()) {
            for (k, c) in new_fields {
                od.fields.insert(k, c);
                changed = true;
            }
            for k in &drop_fields {
                od.fields.shift_remove(k);
                changed = true;
            }
            if od.open && !os.open {
                od.open = false;
                changed = true;
            }
        }
        if sn.may_nil && !node.may_nil {
            node.may_nil = true;
            changed = true;
        }

        if changed {
            self.touch(d);
        }
        for (t2, msg) in missing {
            self.set_err(t2, msg);
        }
        for (x, y) in pairs {
            self.fresh_rec(x, y, ng, vars);
        }
    }

    /// Memoized deep copy; non-generative parts are shared
    fn fresh_copy(&mut self, s: T2Id, ng: &FnvHashSet<T2Id>, vars: &mut Vars) -> T2Id {
        let s = self.find(s);
        if let Some(&m) = vars.get(&s) {
            return m;
        }
        if ng.contains(&s) {
            vars.insert(s, s);
            return s;
        }
        let sn = self.nodes[s.idx()].clone();
        let n = self.push(T2 {
            flow: sn.flow.clone(),
            eflow: sn.eflow.clone(),
            may_nil: sn.may_nil,
            err: sn.err.clone(),
            ..T2::default()
        });
        vars.insert(s, n);
        if sn.is_leaf() {
            return n;
        }
        let nil_child = sn.nil_child.map(|c| self.fresh_copy(c, ng, vars));
        let ptr = sn.ptr.map(|p| self.fresh_copy(p, ng, vars));
        let fun = sn.fun.as_ref().map(|f| self.copy_fun(f, ng, vars));
        let obj = sn.obj.as_ref().map(|o| self.copy_obj(o, ng, vars));
        let over = sn.over.as_ref().map(|o| {
            let mut alts = SmallVec::new();
            for alt in &o.alts {
                alts.push(self.fresh_copy(*alt, ng, vars));
            }
            OverShape { alts, tag: o.tag }
        });
        let node = &mut self.nodes[n.idx()];
        node.nil_child = nil_child;
        node.ptr = ptr;
        node.fun = fun;
        node.obj = obj;
        node.over = over;
        n
    }

    fn copy_fun(&mut self, f: &FunShape, ng: &FnvHashSet<T2Id>, vars: &mut Vars) -> FunShape {
        let mut args = SmallVec::new();
        for a in &f.args {
            args.push(self.fresh_copy(*a, ng, vars));
        }
        let ret = self.fresh_copy(f.ret, ng, vars);
        FunShape { args, ret }
    }

    fn copy_obj(&mut self, o: &ObjShape, ng: &FnvHashSet<T2Id>, vars: &mut Vars) -> ObjShape {
        let mut fields = indexmap::IndexMap::with_capacity(o.fields.len());
        for (k, t) in &o.fields {
            fields.insert(k.clone(), self.fresh_copy(*t, ng, vars));
        }
        ObjShape { fields, open: o.open }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;

    fn id_type(g: &mut TypeGraph) -> (T2Id, T2Id) {
        let x = g.new_leaf();
        (g.new_fun([x], x), x)
    }

    #[test]
    fn test_fresh_copy_leaves_source_generic() {
        let mut g = TypeGraph::new();
        let (id, x) = id_type(&mut g);
        let use1 = g.new_leaf();
        let one = g.new_base(Flow::int(1));
        let r1 = g.new_leaf();
        let call1 = g.new_fun([one], r1);
        assert!(g.fresh_unify(id, use1, &VStack::new(), Mode::Apply));
        g.unify(use1, call1, Mode::Apply);
        assert!(g.is_leaf(x));
        let r = g.find(r1);
        assert_eq!(g.node(r).flow, Some(Flow::int(1)));
    }

    #[test]
    fn test_repeat_fresh_unify_is_idempotent() {
        let mut g = TypeGraph::new();
        let (id, _) = id_type(&mut g);
        let dst = g.new_leaf();
        assert!(g.fresh_unify(id, dst, &VStack::new(), Mode::Apply));
        assert!(!g.fresh_unify(id, dst, &VStack::new(), Mode::Apply));
    }

    #[test]
    fn test_nongen_source_is_shared() {
        let mut g = TypeGraph::new();
        let (id, x) = id_type(&mut g);

        let dst = g.new_leaf();
        g.fresh_unify(id, dst, &VStack::new().push(id), Mode::Apply);
        assert_eq!(g.find(dst), g.find(id));

        let y = g.new_leaf();
        let f = g.new_fun([x], y);
        let dst = g.new_leaf();
        g.fresh_unify(f, dst, &VStack::new().push(x), Mode::Apply);
        let copy = g.fun_shape(dst).unwrap();
        assert_eq!(g.find(copy.args[0]), g.find(x));
        assert_ne!(g.find(copy.ret), g.find(y));
    }

    #[test]
    fn test_cyclic_source_copies_once() {
        let mut g = TypeGraph::new();
        let leaf = g.new_leaf();
        let p = g.new_ptr([("self".to_string(), leaf)], false);
        g.unify(leaf, p, Mode::Apply);
        let dst = g.new_leaf();
        g.fresh_unify(p, dst, &VStack::new(), Mode::Apply);
        let d = g.find(dst);
        assert_ne!(d, g.find(p));
        let obj = g.pointee(d).unwrap();
        let inner = g.field(obj, "self").unwrap();
        assert_eq!(g.find(inner), d);
    }

    #[test]
    fn test_nilable_source_marks_destination() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let na = g.new_nilable(a);
        let sig = g.new_fun([na], a);
        let r = g.new_leaf();
        let s = g.new_base(Flow::str("abc"));
        let call = g.new_fun([s], r);
        g.fresh_unify(sig, call, &VStack::new(), Mode::Apply);
        let rr = g.find(r);
        assert_eq!(g.node(rr).flow, Some(Flow::str("abc")));
        let ss = g.find(s);
        assert_eq!(g.node(ss).flow, Some(Flow::str("abc").with_nil()));
    }
}
