//! Per-node Hindley-Milner steps

use super::Session;
use crate::syntax::{Apply, Field, Kind, SynId};
use crate::types::{Mode, T2Id, MISMATCHED_ARGS};

impl Session {
    /// Unify this node's type with what its shape demands. Progress is read
    /// from the type graph by the caller.
    pub(super) fn hm_step(&mut self, id: SynId) {
        let node = self.ast.get(id);
        let t2 = node.t2;
        let nongen = node.nongen.clone();
        match node.kind.clone() {
            Kind::Con(_) | Kind::Prim(_) | Kind::Struct(_) | Kind::Overload(_) => {}
            Kind::Ident(ident) => {
                let def_t2 = match &self.ast.get(ident.def).kind {
                    Kind::Lambda(l) => l.targs.get(ident.idx).copied(),
                    Kind::Let(l) => Some(l.targ),
                    _ => None,
                };
                let Some(def_t2) = def_t2 else {
                    return;
                };
                if ident.fresh {
                    self.g.fresh_unify(def_t2, t2, &nongen, Mode::Apply);
                    self.g.add_deps_deep(def_t2, id);
                } else {
                    self.g.unify(def_t2, t2, Mode::Apply);
                }
            }
            Kind::Lambda(l) => {
                let body_t2 = self.ast.get(l.body).t2;
                match self.g.fun_shape(t2) {
                    Some(shape) if shape.args.len() == l.targs.len() => {
                        for (targ, arg) in l.targs.iter().zip(&shape.args) {
                            self.g.unify(*targ, *arg, Mode::Apply);
                        }
                        self.g.unify(body_t2, shape.ret, Mode::Apply);
                    }
                    _ => {
                        let fun = self.g.new_fun(l.targs.iter().copied(), body_t2);
                        self.g.unify(fun, t2, Mode::Apply);
                    }
                }
            }
            Kind::Let(l) => {
                let def_t2 = self.ast.get(l.def).t2;
                let body_t2 = self.ast.get(l.body).t2;
                self.g.unify(l.targ, def_t2, Mode::Apply);
                self.g.unify(t2, body_t2, Mode::Apply);
            }
            Kind::Apply(a) => self.hm_apply(t2, &a),
            Kind::Field(f) => self.hm_field(t2, &f),
            Kind::Root(r) => {
                let body_t2 = self.ast.get(r.body).t2;
                self.g.unify(t2, body_t2, Mode::Apply);
            }
        }
    }

    fn hm_apply(&mut self, t2: T2Id, a: &Apply) {
        let callee_t2 = self.ast.get(a.fun).t2;
        let args: Vec<T2Id> = a.args.iter().map(|x| self.ast.get(*x).t2).collect();

        if self.config.do_gcp && self.is_if(a.fun) && args.len() == 3 && self.hm_if(t2, callee_t2, a, &args) {
            return;
        }

        match self.g.fun_shape(callee_t2) {
            Some(shape) => {
                if shape.args.len() != args.len() {
                    self.g.set_err(t2, MISMATCHED_ARGS);
                }
                for (actual, formal) in args.iter().zip(&shape.args) {
                    self.g.unify(*actual, *formal, Mode::Apply);
                }
                self.g.unify(t2, shape.ret, Mode::Apply);
            }
            None => {
                let fun = self.g.new_fun(args, t2);
                self.g.unify(callee_t2, fun, Mode::Apply);
            }
        }
    }

    /// `if` with a known predicate leaves its dead arm out of the result
    /// type. False when the callee lost its primitive shape.
    fn hm_if(&mut self, t2: T2Id, callee_t2: T2Id, a: &Apply, args: &[T2Id]) -> bool {
        let Some(shape) = self.g.fun_shape(callee_t2).filter(|s| s.args.len() == 3) else {
            return false;
        };
        let pred = self.flow(a.args[0]);
        let (then_live, else_live) = if pred.is_any() {
            (false, false)
        } else {
            match pred.truthy() {
                Some(true) => (true, false),
                Some(false) => (false, true),
                None => (true, true),
            }
        };
        self.g.unify(args[0], shape.args[0], Mode::Apply);
        if then_live {
            self.g.unify(args[1], shape.args[1], Mode::Apply);
        }
        if else_live {
            self.g.unify(args[2], shape.args[2], Mode::Apply);
        }
        self.g.unify(t2, shape.ret, Mode::Apply);
        true
    }

    fn hm_field(&mut self, t2: T2Id, f: &Field) {
        let rec_t2 = self.ast.get(f.rec).t2;
        let Some(obj) = self.g.pointee(rec_t2) else {
            let ptr = self.g.new_ptr([(f.label.clone(), t2)], true);
            self.g.unify(rec_t2, ptr, Mode::Apply);
            return;
        };
        let r = self.g.find(rec_t2);
        if self.g.node(r).may_nil {
            self.g.set_err(t2, format!("May be nil when loading field {}", f.label));
        }
        match self.g.field(obj, &f.label) {
            Some(field) => {
                self.g.unify(field, t2, Mode::Apply);
            }
            None => {
                if !self.g.add_field(obj, &f.label, t2) {
                    self.g.set_err(t2, format!("Missing field {}", f.label));
                }
            }
        }
    }
}
