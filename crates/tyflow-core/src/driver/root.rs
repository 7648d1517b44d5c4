//! The program's result and everything that escapes through it

use super::{Phase, Session};
use crate::flow::Flow;
use crate::syntax::{Kind, SynId};
use std::collections::BTreeSet;
use tracing::debug;

impl Session {
    /// Close over what the result reaches, then give every escaped function
    /// the most conservative arguments its type allows.
    pub(super) fn root_step(&mut self, body: SynId) -> Flow {
        let out = self.flow(body);
        let mut fidxs: BTreeSet<u32> = BTreeSet::new();
        let mut aliases: BTreeSet<u32> = BTreeSet::new();
        let mut stack = vec![out.clone()];
        for fidx in self.extern_fidxs.clone() {
            stack.push(Flow::fun(fidx));
        }
        for alias in self.extern_aliases.clone() {
            stack.push(Flow::ptr(alias));
        }

        while let Some(flow) = stack.pop() {
            match &flow {
                Flow::Fun { fidxs: fs, .. } if !fs.is_full() => {
                    for fidx in fs.iter() {
                        if !fidxs.insert(fidx) {
                            continue;
                        }
                        let Some(fid) = self.ast.func(fidx) else {
                            continue;
                        };
                        match &self.ast.get(fid).kind {
                            Kind::Lambda(l) => stack.push(self.flow(l.body)),
                            Kind::Prim(p) => stack.extend(p.alias.map(Flow::ptr)),
                            _ => {}
                        }
                    }
                }
                Flow::Ptr { aliases: al, .. } if !al.is_full() => {
                    for alias in al.iter() {
                        if aliases.insert(alias) {
                            stack.extend(self.alloc_fields(alias));
                        }
                    }
                }
                _ => {}
            }
        }

        if fidxs != self.escaped_fidxs || aliases != self.escaped_aliases {
            debug!(fidxs = ?fidxs, aliases = ?aliases, "escapes grew");
        }
        self.escaped_fidxs = fidxs;
        self.escaped_aliases = aliases;

        let root = self.ast.root();
        let escaped: Vec<u32> = self.escaped_fidxs.iter().copied().collect();
        for fidx in escaped {
            if let Some(fid) = self.ast.func(fidx) {
                self.pin_formals(root, fid);
            }
        }
        out
    }

    /// Escaped functions can be called from anywhere with anything their
    /// argument types admit
    fn pin_formals(&mut self, root: SynId, fid: SynId) {
        let arg_types = match &self.ast.get(fid).kind {
            Kind::Lambda(l) => l.targs.clone(),
            Kind::Prim(_) => {
                let t2 = self.ast.get(fid).t2;
                match self.g.fun_shape(t2) {
                    Some(shape) => shape.args.to_vec(),
                    None => return,
                }
            }
            _ => return,
        };
        let leaf = if self.phase >= Phase::AmbiguityForced { Flow::Scalar } else { Flow::Any };
        let actuals: Vec<Flow> = arg_types
            .iter()
            .map(|t| {
                if self.config.do_hm {
                    self.g.add_deps_deep(*t, root);
                    self.g.as_flow(*t, &leaf)
                } else {
                    Flow::Scalar
                }
            })
            .collect();
        let changed = match self.ast.get_mut(fid).kind.as_func_mut() {
            Some(func) => func.arg_meet(&actuals),
            None => false,
        };
        if !changed {
            return;
        }
        match &self.ast.get(fid).kind {
            Kind::Lambda(l) => {
                let refs = l.refs.clone();
                self.push_all(refs);
            }
            Kind::Prim(p) => {
                if let Some(alias) = p.alias {
                    self.push_readers(alias);
                }
            }
            _ => {}
        }
    }

    /// Flows stored in the fields of allocation site `alias`
    fn alloc_fields(&self, alias: u32) -> Vec<Flow> {
        let Some(site) = self.ast.alloc(alias) else {
            return Vec::new();
        };
        match &self.ast.get(site).kind {
            Kind::Struct(s) => s.children.iter().map(|c| self.flow(*c)).collect(),
            Kind::Prim(p) => p.formals.clone(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::InferConfig;
    use crate::driver::Session;
    use crate::flow::Flow;

    fn run(src: &str) -> Session {
        let mut s = Session::new(src, InferConfig::default()).unwrap();
        s.run();
        s
    }

    #[test]
    fn test_returned_lambda_escapes_with_pinned_formals() {
        let s = run("{x -> (dec x)}");
        assert_eq!(s.escaped_fidxs(), vec![1]);
        assert_eq!(s.root_flow(), &Flow::fun(1));
    }

    #[test]
    fn test_escape_follows_record_fields() {
        let s = run("@{f = {x -> x}, n = 3}");
        assert_eq!(s.escaped_aliases(), vec![1]);
        assert_eq!(s.escaped_fidxs(), vec![1]);
    }

    #[test]
    fn test_unescaped_lambda_keeps_precise_formals() {
        let s = run("f = {x -> x}; (f 5)");
        assert!(s.escaped_fidxs().is_empty());
        assert_eq!(s.root_flow(), &Flow::int(5));
    }
}
