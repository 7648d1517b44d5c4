//! Per-node constant propagation steps and call-site lifting

use super::{Phase, Session};
use crate::flow::Flow;
use crate::syntax::{Apply, Kind, SynId};
use crate::types::T2Id;
use fnv::{FnvHashMap, FnvHashSet};
use tracing::trace;

/// Type node -> flow observed for it at one call site
type Seen = FnvHashMap<T2Id, Flow>;

impl Session {
    /// New flow for `id`; the caller enforces that it never rises
    pub(super) fn gcp_step(&mut self, id: SynId) -> Flow {
        match self.ast.get(id).kind.clone() {
            Kind::Con(flow) => flow,
            Kind::Ident(ident) => match &self.ast.get(ident.def).kind {
                Kind::Lambda(l) => l.formals.get(ident.idx).cloned().unwrap_or(Flow::Any),
                Kind::Let(l) => self.flow(l.def),
                _ => Flow::Scalar,
            },
            Kind::Lambda(l) => Flow::fun(l.fidx),
            Kind::Prim(p) => Flow::fun(p.fidx),
            Kind::Let(l) => self.flow(l.body),
            Kind::Apply(a) => self.gcp_apply(id, &a),
            Kind::Struct(s) => Flow::ptr(s.alias),
            Kind::Field(f) => match self.flow(f.rec) {
                Flow::Any | Flow::Nil => Flow::Any,
                Flow::Ptr { aliases, .. } if !aliases.is_full() => {
                    let mut out = Flow::Any;
                    for alias in aliases.iter() {
                        let readers = self.readers.entry(alias).or_default();
                        if !readers.contains(&id) {
                            readers.push(id);
                        }
                        // A missing field is a type error; the load yields nothing
                        if let Some(v) = self.ast.load(alias, &f.label) {
                            out = out.meet(&v);
                        }
                    }
                    out
                }
                _ => self.bound(id),
            },
            Kind::Overload(o) => {
                let chosen = if self.config.do_hm {
                    self.g.resolution(o.tag).map(<[usize]>::to_vec)
                } else {
                    None
                };
                match chosen {
                    Some(chosen) => chosen
                        .iter()
                        .filter_map(|i| o.alts.get(*i))
                        .fold(Flow::Any, |acc, alt| acc.meet(&self.flow(*alt))),
                    None if self.phase >= Phase::AmbiguityForced => {
                        o.alts.iter().fold(Flow::Any, |acc, alt| acc.meet(&self.flow(*alt)))
                    }
                    None => Flow::Any,
                }
            }
            Kind::Root(r) => self.root_step(r.body),
        }
    }

    /// Most conservative flow the node's HM type allows
    pub(super) fn bound(&mut self, id: SynId) -> Flow {
        if !self.config.do_hm {
            return Flow::Scalar;
        }
        let t2 = self.ast.get(id).t2;
        self.g.add_deps_deep(t2, id);
        self.g.as_flow(t2, &Flow::Scalar)
    }

    fn gcp_apply(&mut self, id: SynId, a: &Apply) -> Flow {
        let callee = self.flow(a.fun);
        let actuals: Vec<Flow> = a.args.iter().map(|x| self.flow(*x)).collect();
        match &callee {
            Flow::Any => {
                let callee_t2 = self.ast.get(a.fun).t2;
                if self.config.do_hm && self.g.is_over(callee_t2) && !self.delayed.contains(&id) {
                    self.delayed.push(id);
                }
                Flow::Any
            }
            // Calling nil faults
            Flow::Nil => Flow::Any,
            Flow::Fun { fidxs, .. } if !fidxs.is_full() => {
                let mut rez = Flow::Any;
                let mut lambdas = Vec::new();
                let mut prims = false;
                for fidx in fidxs.iter() {
                    let Some(fid) = self.ast.func(fidx) else {
                        continue;
                    };
                    rez = rez.meet(&self.call(id, fid, &actuals));
                    match self.ast.get(fid).kind {
                        Kind::Lambda(_) => lambdas.push(fid),
                        _ => prims = true,
                    }
                }
                let ret_err = self.g.is_err(self.ast.get(id).t2);
                if self.config.do_hm && !prims && !ret_err {
                    if let Some(lift) = self.lift(id, &lambdas, &actuals) {
                        trace!(apply = id.0, rez = %rez, lift = %lift, "call-site lift");
                        rez = rez.join(&lift);
                    }
                }
                rez
            }
            _ => {
                self.escape_args(&actuals);
                self.bound(id)
            }
        }
    }

    /// Register a call of `fid` from `apply`, meet the actuals into its
    /// formals, and return what the call yields
    fn call(&mut self, apply: SynId, fid: SynId, actuals: &[Flow]) -> Flow {
        let changed = match self.ast.get_mut(fid).kind.as_func_mut() {
            Some(func) => {
                func.add_apply(apply);
                func.arg_meet(actuals)
            }
            None => return Flow::Scalar,
        };
        match &self.ast.get(fid).kind {
            Kind::Lambda(l) => {
                let body = l.body;
                if changed {
                    let refs = l.refs.clone();
                    self.push_all(refs);
                }
                self.flow(body)
            }
            Kind::Prim(p) => {
                let (op, alias) = (p.op, p.alias);
                if changed {
                    if let Some(alias) = alias {
                        self.push_readers(alias);
                    }
                }
                op.apply(actuals, alias)
            }
            _ => Flow::Scalar,
        }
    }

    /// Functions and records passed to an unknown callee escape
    fn escape_args(&mut self, actuals: &[Flow]) {
        let mut grew = false;
        for flow in actuals {
            match flow {
                Flow::Fun { fidxs, .. } if !fidxs.is_full() => {
                    for fidx in fidxs.iter() {
                        grew |= self.extern_fidxs.insert(fidx);
                    }
                }
                Flow::Ptr { aliases, .. } if !aliases.is_full() => {
                    for alias in aliases.iter() {
                        grew |= self.extern_aliases.insert(alias);
                    }
                }
                _ => {}
            }
        }
        if grew {
            let root = self.ast.root();
            self.work.push(root);
        }
    }

    /// Sharpen a call's result through the callees' generic types: a
    /// result typed by the same type variable as an argument carries that
    /// argument's flow at this call site.
    fn lift(&mut self, apply: SynId, lambdas: &[SynId], actuals: &[Flow]) -> Option<Flow> {
        if lambdas.is_empty() {
            return None;
        }
        let mut out = Flow::Any;
        for lam in lambdas {
            out = out.meet(&self.lift_one(apply, *lam, actuals)?);
        }
        Some(out)
    }

    fn lift_one(&mut self, apply: SynId, lam: SynId, actuals: &[Flow]) -> Option<Flow> {
        let t2 = self.ast.get(lam).t2;
        self.g.add_deps_deep(t2, apply);
        let shape = self.g.fun_shape(t2)?;
        if shape.args.len() != actuals.len() || self.g.deep_err_count(t2) > 0 {
            return None;
        }
        let outer = self.outer_types(lam);
        let mut seen = Seen::default();
        let mut busy = FnvHashSet::default();
        for (arg, flow) in shape.args.iter().zip(actuals) {
            self.walk_in(apply, *arg, flow, &outer, &mut seen, &mut busy);
        }
        self.walk_out(shape.ret, &outer, &seen)
    }

    /// Record the flow each type variable in `t2` takes when a value of
    /// flow `flow` is passed; pointers are followed into their fields
    fn walk_in(
        &mut self,
        apply: SynId,
        t2: T2Id,
        flow: &Flow,
        outer: &FnvHashSet<T2Id>,
        seen: &mut Seen,
        busy: &mut FnvHashSet<T2Id>,
    ) {
        let r = self.g.find(t2);
        if outer.contains(&r) {
            return;
        }
        let (leaf, child) = {
            let node = self.g.node(r);
            (node.is_leaf(), node.nil_child)
        };
        if leaf {
            let entry = seen.entry(r).or_insert(Flow::Any);
            *entry = entry.meet(flow);
            return;
        }
        if let Some(c) = child {
            self.walk_in(apply, c, &flow.not_nil(), outer, seen, busy);
            return;
        }
        let Some(obj) = self.g.pointee(r) else {
            return;
        };
        if !busy.insert(r) {
            // Recursive type: deeper values are not tracked
            self.poison(r, outer, seen);
            return;
        }
        let fields: Vec<(String, T2Id)> = match &self.g.node(obj).obj {
            Some(shape) => shape.fields.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            None => Vec::new(),
        };
        for (label, ft) in fields {
            let fflow = self.field_flow(apply, flow, &label);
            self.walk_in(apply, ft, &fflow, outer, seen, busy);
        }
        busy.remove(&r);
    }

    /// What a load of `label` through a pointer of flow `flow` can see
    fn field_flow(&mut self, apply: SynId, flow: &Flow, label: &str) -> Flow {
        match flow {
            Flow::Any | Flow::Nil => Flow::Any,
            Flow::Ptr { aliases, .. } if !aliases.is_full() => {
                let mut out = Flow::Any;
                for alias in aliases.iter() {
                    let readers = self.readers.entry(alias).or_default();
                    if !readers.contains(&apply) {
                        readers.push(apply);
                    }
                    if let Some(v) = self.ast.load(alias, label) {
                        out = out.meet(&v);
                    }
                }
                out
            }
            _ => Flow::Scalar,
        }
    }

    fn poison(&mut self, r: T2Id, outer: &FnvHashSet<T2Id>, seen: &mut Seen) {
        for n in self.g.reach(r) {
            if self.g.node(n).is_leaf() && !outer.contains(&n) {
                seen.insert(n, Flow::Scalar);
            }
        }
    }

    fn walk_out(&mut self, t2: T2Id, outer: &FnvHashSet<T2Id>, seen: &Seen) -> Option<Flow> {
        let r = self.g.find(t2);
        if outer.contains(&r) {
            return None;
        }
        if let Some(flow) = seen.get(&r) {
            return Some(flow.clone());
        }
        let (leaf, child) = {
            let node = self.g.node(r);
            (node.is_leaf(), node.nil_child)
        };
        if leaf {
            // Nothing produces this variable; until frozen, assume unreached
            return (self.phase < Phase::NewLeafFrozen).then_some(Flow::Any);
        }
        let c = self.g.find(child?);
        seen.get(&c).map(Flow::with_nil)
    }

    /// Types bound by parameters of lambdas enclosing `lam`; values of
    /// these types can come from outside the call
    fn outer_types(&mut self, lam: SynId) -> FnvHashSet<T2Id> {
        let mut targs = Vec::new();
        let mut cur = self.ast.get(lam).parent;
        while let Some(p) = cur {
            if let Kind::Lambda(l) = &self.ast.get(p).kind {
                targs.extend(l.targs.iter().copied());
            }
            cur = self.ast.get(p).parent;
        }
        let mut set = FnvHashSet::default();
        for t in targs {
            set.extend(self.g.reach(t));
        }
        set
    }
}
