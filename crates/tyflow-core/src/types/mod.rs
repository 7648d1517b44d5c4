//! Type graph: a union-find arena of T2 nodes
//!
//! Every node is addressed by a dense [`T2Id`]. Unifying `a` into `b`
//! overwrites slot `a` with a redirect to `b`; [`TypeGraph::find`] follows
//! redirects with path compression and folds nilable wrappers whose child
//! gained structure.
//!
//! Progress is measured against an epoch: only changes to nodes that existed
//! when the current step (or standalone operation) began count. Fresh copies
//! and synthetic shapes built during a step can be merged freely without
//! making the step look productive.

mod fresh;
mod print;
mod unify;

pub use unify::{AMBIGUOUS, MISMATCHED_ARGS};

use crate::flow::Flow;
use crate::syntax::SynId;
use crate::vstack::VStack;
use fnv::{FnvHashMap, FnvHashSet};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::trace;

/// Index of a node in the type graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct T2Id(pub u32);

impl T2Id {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Whether an operation commits its effects or only reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Apply,
    Test,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunShape {
    pub args: SmallVec<[T2Id; 3]>,
    pub ret: T2Id,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjShape {
    pub fields: IndexMap<String, T2Id>,
    /// Open records accept new fields on unification
    pub open: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverShape {
    pub alts: SmallVec<[T2Id; 2]>,
    /// Identity of the overload literal; fresh copies keep it
    pub tag: u32,
}

/// One node of the type graph.
///
/// A node with nothing set is a leaf (an unconstrained type variable).
/// Carrying two or more of {base, pointer, function, record, overload}
/// at once is a structural clash and marks the node as an error.
#[derive(Debug, Clone, Default)]
pub struct T2 {
    uf: Option<T2Id>,
    /// Base type: a flow value
    pub flow: Option<Flow>,
    /// Secondary base flow kept after a clash between unrelated kinds
    pub eflow: Option<Flow>,
    /// Nilable wrapper around a non-nilable child
    pub nil_child: Option<T2Id>,
    /// Pointer to a record-shaped node
    pub ptr: Option<T2Id>,
    pub fun: Option<FunShape>,
    pub obj: Option<ObjShape>,
    pub over: Option<OverShape>,
    pub may_nil: bool,
    pub err: Option<String>,
    deps: SmallVec<[SynId; 2]>,
}

impl T2 {
    pub fn is_leaf(&self) -> bool {
        self.flow.is_none()
            && self.eflow.is_none()
            && self.nil_child.is_none()
            && self.ptr.is_none()
            && self.fun.is_none()
            && self.obj.is_none()
            && self.over.is_none()
            && self.err.is_none()
    }

    fn shape_count(&self) -> usize {
        usize::from(self.flow.is_some())
            + usize::from(self.ptr.is_some())
            + usize::from(self.fun.is_some())
            + usize::from(self.obj.is_some())
            + usize::from(self.over.is_some())
    }

    pub fn is_err(&self) -> bool {
        self.err.is_some() || self.eflow.is_some() || self.shape_count() >= 2
    }

    pub fn is_nilable(&self) -> bool {
        self.nil_child.is_some()
    }

    /// Only a base flow, possibly with error payload
    fn is_base(&self) -> bool {
        self.flow.is_some() && self.shape_count() == 1 && self.nil_child.is_none()
    }

    /// Children in a fixed order: nilable child, pointee, args, return,
    /// fields, alternatives
    fn children(&self) -> SmallVec<[T2Id; 4]> {
        let mut out = SmallVec::new();
        out.extend(self.nil_child);
        out.extend(self.ptr);
        if let Some(fun) = &self.fun {
            out.extend(fun.args.iter().copied());
            out.push(fun.ret);
        }
        if let Some(obj) = &self.obj {
            out.extend(obj.fields.values().copied());
        }
        if let Some(over) = &self.over {
            out.extend(over.alts.iter().copied());
        }
        out
    }
}

/// The shared arena of type nodes for one inference session
#[derive(Debug, Clone, Default)]
pub struct TypeGraph {
    nodes: Vec<T2>,
    /// Nodes below this index existed before the current step
    epoch: u32,
    in_step: bool,
    changes: usize,
    visit: FnvHashSet<(T2Id, T2Id)>,
    /// Syntax nodes whose types changed under them
    pending: Vec<SynId>,
    /// Syntax node running the current step; stalls register on it
    ctx: Option<SynId>,
    /// Overload tag -> alternatives chosen by unification
    resolved: FnvHashMap<u32, SmallVec<[usize; 2]>>,
    /// Tags whose resolution grew since the last drain
    newly_resolved: Vec<u32>,
    /// Error messages attached since the graph was created or cloned
    raised: usize,
    /// Ambiguous overloads become errors instead of stalling
    pub force_ambiguity: bool,
}

impl TypeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, node: T2) -> T2Id {
        let id = T2Id(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn new_leaf(&mut self) -> T2Id {
        self.push(T2::default())
    }

    pub fn new_base(&mut self, flow: Flow) -> T2Id {
        self.push(T2 { flow: Some(flow), ..T2::default() })
    }

    pub fn new_nilable(&mut self, child: T2Id) -> T2Id {
        self.push(T2 { nil_child: Some(child), ..T2::default() })
    }

    pub fn new_fun(&mut self, args: impl IntoIterator<Item = T2Id>, ret: T2Id) -> T2Id {
        let fun = FunShape { args: args.into_iter().collect(), ret };
        self.push(T2 { fun: Some(fun), ..T2::default() })
    }

    pub fn new_obj(&mut self, fields: impl IntoIterator<Item = (String, T2Id)>, open: bool) -> T2Id {
        let obj = ObjShape { fields: fields.into_iter().collect(), open };
        self.push(T2 { obj: Some(obj), ..T2::default() })
    }

    /// Pointer to a fresh record node
    pub fn new_ptr(&mut self, fields: impl IntoIterator<Item = (String, T2Id)>, open: bool) -> T2Id {
        let obj = self.new_obj(fields, open);
        self.push(T2 { ptr: Some(obj), ..T2::default() })
    }

    pub fn new_over(&mut self, alts: impl IntoIterator<Item = T2Id>, tag: u32) -> T2Id {
        let over = OverShape { alts: alts.into_iter().collect(), tag };
        self.push(T2 { over: Some(over), ..T2::default() })
    }

    /// Raw node access; pass an id returned by `find` to see current shape
    pub fn node(&self, id: T2Id) -> &T2 {
        &self.nodes[id.idx()]
    }

    /// Representative of `id`, compressing the path and folding nilables
    pub fn find(&mut self, id: T2Id) -> T2Id {
        let mut root = id;
        while let Some(next) = self.nodes[root.idx()].uf {
            root = next;
        }
        let mut cur = id;
        while let Some(next) = self.nodes[cur.idx()].uf {
            if next != root {
                self.nodes[cur.idx()].uf = Some(root);
            }
            cur = next;
        }
        self.fold_nil(root);
        root
    }

    /// A nilable whose child gained structure becomes a nil-marked copy of
    /// the child; the child itself stays untouched.
    fn fold_nil(&mut self, n: T2Id) {
        let Some(child) = self.nodes[n.idx()].nil_child else {
            return;
        };
        let c = self.find(child);
        if c == n {
            self.nodes[n.idx()].nil_child = None;
            return;
        }
        if c != child {
            self.nodes[n.idx()].nil_child = Some(c);
        }
        if self.nodes[c.idx()].is_leaf() {
            return;
        }
        let src = self.nodes[c.idx()].clone();
        trace!(nilable = n.0, child = c.0, "folding nilable");
        let node = &mut self.nodes[n.idx()];
        node.nil_child = src.nil_child;
        node.flow = src.flow.map(|f| f.meet(&Flow::Nil));
        node.eflow = src.eflow;
        node.ptr = src.ptr;
        node.fun = src.fun;
        node.obj = src.obj;
        node.over = src.over;
        node.err = node.err.take().or(src.err);
        node.may_nil = node.nil_child.is_none();
    }

    pub fn is_leaf(&mut self, id: T2Id) -> bool {
        let r = self.find(id);
        self.nodes[r.idx()].is_leaf()
    }

    pub fn is_err(&mut self, id: T2Id) -> bool {
        let r = self.find(id);
        self.nodes[r.idx()].is_err()
    }

    pub fn fun_shape(&mut self, id: T2Id) -> Option<FunShape> {
        let r = self.find(id);
        self.nodes[r.idx()].fun.clone()
    }

    pub fn is_over(&mut self, id: T2Id) -> bool {
        let r = self.find(id);
        self.nodes[r.idx()].over.is_some()
    }

    /// Record shape behind a pointer
    pub fn pointee(&mut self, id: T2Id) -> Option<T2Id> {
        let r = self.find(id);
        let p = self.nodes[r.idx()].ptr?;
        let o = self.find(p);
        self.nodes[o.idx()].obj.as_ref().map(|_| o)
    }

    pub fn field(&mut self, obj: T2Id, label: &str) -> Option<T2Id> {
        let o = self.find(obj);
        self.nodes[o.idx()].obj.as_ref()?.fields.get(label).copied()
    }

    // ---- progress accounting ----

    /// Start a driver step: nodes created from here on are new
    pub fn begin_step(&mut self, ctx: SynId) {
        self.epoch = self.nodes.len() as u32;
        self.changes = 0;
        self.in_step = true;
        self.ctx = Some(ctx);
    }

    /// Finish a driver step; true when an existing node changed
    pub fn end_step(&mut self) -> bool {
        self.in_step = false;
        self.ctx = None;
        self.changes > 0
    }

    fn begin_op(&mut self) -> usize {
        if !self.in_step {
            self.epoch = self.nodes.len() as u32;
        }
        self.visit.clear();
        self.changes
    }

    fn end_op(&mut self, before: usize) -> bool {
        self.visit.clear();
        self.changes > before
    }

    /// Scratch copy for a trial that must not touch this graph
    fn scratch(&self) -> TypeGraph {
        let mut g = self.clone();
        g.epoch = g.nodes.len() as u32;
        g.in_step = false;
        g.changes = 0;
        g.visit.clear();
        g.pending.clear();
        g.newly_resolved.clear();
        g.raised = 0;
        g
    }

    fn touch(&mut self, id: T2Id) {
        if id.0 < self.epoch {
            self.changes += 1;
        }
        let deps = self.nodes[id.idx()].deps.clone();
        self.pending.extend(deps);
    }

    /// Redirect `a` into `b`; both must be representatives
    fn union(&mut self, a: T2Id, b: T2Id) {
        debug_assert!(a != b);
        self.touch(a);
        self.nodes[a.idx()].uf = Some(b);
        let deps = std::mem::take(&mut self.nodes[a.idx()].deps);
        let into = &mut self.nodes[b.idx()].deps;
        for d in deps {
            if !into.contains(&d) {
                into.push(d);
            }
        }
    }

    /// Attach an error message unless one is already present
    pub fn set_err(&mut self, id: T2Id, msg: impl Into<String>) -> bool {
        let r = self.find(id);
        if self.nodes[r.idx()].err.is_some() {
            return false;
        }
        let msg = msg.into();
        trace!(node = r.0, %msg, "error recorded");
        self.nodes[r.idx()].err = Some(msg);
        self.raised += 1;
        self.touch(r);
        true
    }

    /// Overwrite an existing error message with a more detailed one
    pub fn replace_err(&mut self, id: T2Id, msg: impl Into<String>) {
        let r = self.find(id);
        if self.nodes[r.idx()].err.is_some() {
            self.nodes[r.idx()].err = Some(msg.into());
        }
    }

    /// Add a field to an open record; false when closed or already present
    pub fn add_field(&mut self, obj: T2Id, label: &str, t2: T2Id) -> bool {
        let o = self.find(obj);
        let added = match self.nodes[o.idx()].obj.as_mut() {
            Some(shape) if shape.open && !shape.fields.contains_key(label) => {
                shape.fields.insert(label.to_string(), t2);
                true
            }
            _ => false,
        };
        if added {
            self.touch(o);
        }
        added
    }

    /// Syntax nodes to revisit because a type they read changed
    pub fn take_pending(&mut self) -> Vec<SynId> {
        std::mem::take(&mut self.pending)
    }

    /// Every representative reachable from `id`, `id` first
    pub fn reach(&mut self, id: T2Id) -> Vec<T2Id> {
        let mut seen = FnvHashSet::default();
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            let r = self.find(n);
            if !seen.insert(r) {
                continue;
            }
            out.push(r);
            let kids = self.nodes[r.idx()].children();
            stack.extend(kids.into_iter().rev());
        }
        out
    }

    /// Register `syn` on every node reachable from `id`
    pub fn add_deps_deep(&mut self, id: T2Id, syn: SynId) {
        for r in self.reach(id) {
            let deps = &mut self.nodes[r.idx()].deps;
            if !deps.contains(&syn) {
                deps.push(syn);
            }
        }
    }

    pub fn deep_err_count(&mut self, id: T2Id) -> usize {
        self.reach(id)
            .into_iter()
            .filter(|r| self.nodes[r.idx()].is_err())
            .count()
    }

    /// Set of representatives reachable from the non-generative stack
    pub fn nongen_set(&mut self, nongen: &VStack) -> FnvHashSet<T2Id> {
        let mut set = FnvHashSet::default();
        for t2 in nongen.iter() {
            if set.contains(&self.find(t2)) {
                continue;
            }
            set.extend(self.reach(t2));
        }
        set
    }

    pub fn resolution(&self, tag: u32) -> Option<&[usize]> {
        self.resolved.get(&tag).map(|v| v.as_slice())
    }

    fn record_resolution(&mut self, tag: u32, alt: usize) {
        let chosen = self.resolved.entry(tag).or_default();
        if !chosen.contains(&alt) {
            chosen.push(alt);
            chosen.sort_unstable();
            self.newly_resolved.push(tag);
        }
    }

    /// Overload tags that gained a resolution since the last call
    pub fn take_resolved(&mut self) -> Vec<u32> {
        std::mem::take(&mut self.newly_resolved)
    }

    /// Most conservative flow a value of this type may hold; `leaf` is used
    /// for unconstrained variables
    pub fn as_flow(&mut self, id: T2Id, leaf: &Flow) -> Flow {
        let r = self.find(id);
        let node = &self.nodes[r.idx()];
        if node.is_err() {
            return Flow::Scalar;
        }
        if let Some(child) = node.nil_child {
            return self.as_flow(child, leaf).meet(&Flow::Nil);
        }
        if node.is_leaf() {
            return leaf.clone();
        }
        let nil = |f: Flow, may_nil: bool| if may_nil { f.with_nil() } else { f };
        if let Some(flow) = &node.flow {
            return flow.widen();
        }
        if node.fun.is_some() {
            return nil(Flow::fun_full(), node.may_nil);
        }
        if node.ptr.is_some() {
            return nil(Flow::ptr_full(), node.may_nil);
        }
        Flow::Scalar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_err_classification() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        assert!(g.is_leaf(a));
        let b = g.new_base(Flow::int64());
        assert!(!g.is_leaf(b) && !g.is_err(b));
        let f = g.new_fun([a], b);
        g.nodes[f.idx()].flow = Some(Flow::int(1));
        assert!(g.is_err(f));
    }

    #[test]
    fn test_find_compresses_paths() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = g.new_leaf();
        let c = g.new_leaf();
        g.union(a, b);
        g.union(b, c);
        assert_eq!(g.find(a), c);
        assert_eq!(g.nodes[a.idx()].uf, Some(c));
    }

    #[test]
    fn test_nilable_folds_into_base_copy() {
        let mut g = TypeGraph::new();
        let child = g.new_leaf();
        let n = g.new_nilable(child);
        let s = g.new_base(Flow::str("abc"));
        g.union(child, s);
        let r = g.find(n);
        assert_eq!(r, n);
        assert!(!g.node(n).is_nilable());
        assert_eq!(g.node(n).flow, Some(Flow::str("abc").with_nil()));
        // the child keeps its own non-nil type
        assert_eq!(g.node(s).flow, Some(Flow::str("abc")));
    }

    #[test]
    fn test_set_err_first_wins() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        assert!(g.set_err(a, "first"));
        assert!(!g.set_err(a, "second"));
        assert_eq!(g.node(a).err.as_deref(), Some("first"));
    }

    #[test]
    fn test_as_flow() {
        let mut g = TypeGraph::new();
        let leaf = g.new_leaf();
        let int = g.new_base(Flow::int(3));
        let nil = g.new_nilable(leaf);
        let fun = g.new_fun([leaf], int);
        assert_eq!(g.as_flow(leaf, &Flow::Scalar), Flow::Scalar);
        assert_eq!(g.as_flow(int, &Flow::Scalar), Flow::int64());
        assert_eq!(g.as_flow(nil, &Flow::Any), Flow::Nil);
        assert_eq!(g.as_flow(fun, &Flow::Any), Flow::fun_full());
    }

    #[test]
    fn test_deps_move_on_union() {
        let mut g = TypeGraph::new();
        let a = g.new_leaf();
        let b = g.new_leaf();
        g.add_deps_deep(a, SynId(7));
        g.union(a, b);
        assert_eq!(g.take_pending(), vec![SynId(7)]);
        g.touch(b);
        assert_eq!(g.take_pending(), vec![SynId(7)]);
    }
}
