//! Human-readable rendering of type graphs
//!
//! Leaves get letter names in first-visit order. A composite reached again
//! while it is still being printed becomes a named cycle head, e.g.
//! `A:*@{next=A}`.

use super::{T2Id, TypeGraph, T2};
use fnv::{FnvHashMap, FnvHashSet};

#[derive(Default)]
struct Printer {
    names: FnvHashMap<T2Id, String>,
    heads: FnvHashSet<T2Id>,
    busy: FnvHashSet<T2Id>,
}

impl Printer {
    fn name(&mut self, id: T2Id) -> String {
        let n = self.names.len();
        self.names.entry(id).or_insert_with(|| leaf_name(n)).clone()
    }
}

fn leaf_name(n: usize) -> String {
    let letter = char::from(b'A' + (n % 26) as u8);
    if n < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter, n / 26)
    }
}

fn q(may_nil: bool) -> &'static str {
    if may_nil {
        "?"
    } else {
        ""
    }
}

impl TypeGraph {
    pub fn print(&mut self, id: T2Id) -> String {
        let mut p = Printer::default();
        self.print_rec(id, &mut p)
    }

    /// Message for an error node: its own text, or the clashing shapes
    pub fn err_message(&mut self, id: T2Id) -> Option<String> {
        let r = self.find(id);
        let node = self.nodes[r.idx()].clone();
        if !node.is_err() {
            return None;
        }
        let mut p = Printer::default();
        p.busy.insert(r);
        Some(self.err_text(&node, &mut p))
    }

    fn print_rec(&mut self, id: T2Id, p: &mut Printer) -> String {
        let r = self.find(id);
        if p.busy.contains(&r) {
            p.heads.insert(r);
            return p.name(r);
        }
        let node = self.nodes[r.idx()].clone();
        if node.is_leaf() {
            return p.name(r);
        }
        p.busy.insert(r);
        let body = if node.is_err() {
            format!("[{}]", self.err_text(&node, p))
        } else {
            self.shape_text(&node, p)
        };
        p.busy.remove(&r);
        if p.heads.contains(&r) {
            let name = p.name(r);
            format!("{}:{}", name, body)
        } else {
            body
        }
    }

    fn err_text(&mut self, node: &T2, p: &mut Printer) -> String {
        if let Some(msg) = &node.err {
            return msg.clone();
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(f) = &node.flow {
            parts.push(f.to_string());
        }
        if let Some(f) = &node.eflow {
            parts.push(f.to_string());
        }
        if let Some(ptr) = node.ptr {
            parts.push(format!("*{}{}", self.print_rec(ptr, p), q(node.may_nil)));
        }
        let only = |node: &T2, keep: fn(&mut T2)| {
            let mut t = T2::default();
            t.fun = node.fun.clone();
            t.obj = node.obj.clone();
            t.over = node.over.clone();
            t.may_nil = node.may_nil;
            keep(&mut t);
            t
        };
        if node.fun.is_some() {
            let t = only(node, |t| {
                t.obj = None;
                t.over = None;
            });
            parts.push(self.shape_text(&t, p));
        }
        if node.obj.is_some() {
            let t = only(node, |t| {
                t.fun = None;
                t.over = None;
            });
            parts.push(self.shape_text(&t, p));
        }
        if node.over.is_some() {
            let t = only(node, |t| {
                t.fun = None;
                t.obj = None;
            });
            parts.push(self.shape_text(&t, p));
        }
        format!("Cannot unify {}", parts.join(" and "))
    }

    fn shape_text(&mut self, node: &T2, p: &mut Printer) -> String {
        if let Some(child) = node.nil_child {
            return format!("{}?", self.print_rec(child, p));
        }
        if let Some(f) = &node.flow {
            return f.to_string();
        }
        if let Some(ptr) = node.ptr {
            return format!("*{}{}", self.print_rec(ptr, p), q(node.may_nil));
        }
        if let Some(fun) = &node.fun {
            let args: Vec<String> = fun.args.iter().map(|a| self.print_rec(*a, p)).collect();
            let ret = self.print_rec(fun.ret, p);
            return format!("{{{} -> {}}}{}", args.join(", "), ret, q(node.may_nil));
        }
        if let Some(obj) = &node.obj {
            let mut keys: Vec<&String> = obj.fields.keys().collect();
            keys.sort();
            let mut fields: Vec<String> = Vec::with_capacity(keys.len() + 1);
            for k in keys {
                let t = obj.fields[k];
                fields.push(format!("{}={}", k, self.print_rec(t, p)));
            }
            if obj.open {
                fields.push("...".to_string());
            }
            return format!("@{{{}}}", fields.join(", "));
        }
        if let Some(over) = &node.over {
            let alts: Vec<String> = over.alts.iter().map(|a| self.print_rec(*a, p)).collect();
            return format!("&[{}]{}", alts.join(", "), q(node.may_nil));
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use crate::types::Mode;

    #[test]
    fn test_leaf_names_in_visit_order() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = g.new_leaf();
        let f = g.new_fun([b, a], b);
        assert_eq!(g.print(f), "{A, B -> A}");
    }

    #[test]
    fn test_records_sorted_and_open() {
        let mut g = TypeGraph::new();
        let y = g.new_base(Flow::int64());
        let x = g.new_base(Flow::str("s"));
        let p = g.new_ptr([("y".to_string(), y), ("x".to_string(), x)], true);
        assert_eq!(g.print(p), "*@{x=\"s\", y=int64, ...}");
        let e = g.new_ptr([], true);
        assert_eq!(g.print(e), "*@{...}");
    }

    #[test]
    fn test_cycle_head_named() {
        let mut g = TypeGraph::new();
        let leaf = g.new_leaf();
        let p = g.new_ptr([("self".to_string(), leaf)], false);
        g.unify(leaf, p, Mode::Apply);
        assert_eq!(g.print(p), "A:*@{self=A}");
    }

    #[test]
    fn test_nilable_and_clash() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let n = g.new_nilable(a);
        assert_eq!(g.print(n), "A?");
        let one = g.new_base(Flow::int(1));
        let s = g.new_base(Flow::str("a"));
        g.unify(one, s, Mode::Apply);
        assert_eq!(g.print(s), "[Cannot unify 1 and \"a\"]");
        assert_eq!(g.err_message(one).as_deref(), Some("Cannot unify 1 and \"a\""));
    }

    #[test]
    fn test_overload_print() {
        let mut g = TypeGraph::new();
        let a = g.new_base(Flow::int(2));
        let b = g.new_base(Flow::flt(2.3));
        let o = g.new_over([a, b], 1);
        assert_eq!(g.print(o), "&[2, 2.3]");
    }

    #[test]
    fn test_shape_clash() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let f = g.new_fun([a], a);
        let i = g.new_base(Flow::int64());
        g.unify(f, i, Mode::Apply);
        assert_eq!(g.print(i), "[Cannot unify int64 and {A -> A}]");
    }
}
