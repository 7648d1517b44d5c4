//! Abstract syntax for the inference engine
//!
//! Nodes live in one arena and are addressed by [`SynId`]. Every node owns a
//! type-graph node and a flow cell; both only ever fall. Each variant defines
//! one HM step and one GCP step (see `driver`).

mod prim;

pub use prim::PrimOp;

use crate::flow::Flow;
use crate::types::T2Id;
use crate::vstack::VStack;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Index of a node in the syntax arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SynId(pub u32);

impl SynId {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Call sites currently targeting a function
pub type Applys = SmallVec<[SynId; 4]>;

#[derive(Debug, Clone)]
pub struct Syntax {
    pub kind: Kind,
    pub t2: T2Id,
    pub flow: Flow,
    pub parent: Option<SynId>,
    /// Variables of enclosing scopes still being defined
    pub nongen: VStack,
    /// Byte offset in the source
    pub pos: usize,
}

#[derive(Debug, Clone)]
pub enum Kind {
    /// Literal constant
    Con(Flow),
    Ident(Ident),
    Lambda(Lambda),
    Prim(Prim),
    Let(Let),
    Apply(Apply),
    Struct(Struct),
    Field(Field),
    Overload(Overload),
    Root(Root),
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    /// Binding Lambda or Let
    pub def: SynId,
    /// Parameter position when bound by a lambda
    pub idx: usize,
    /// Uses in a let body instantiate the binding freshly
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<String>,
    pub targs: Vec<T2Id>,
    pub body: SynId,
    pub formals: Vec<Flow>,
    pub fidx: u32,
    pub applys: Applys,
    /// Identifiers naming one of the parameters
    pub refs: Vec<SynId>,
}

#[derive(Debug, Clone)]
pub struct Prim {
    pub op: PrimOp,
    pub fidx: u32,
    pub formals: Vec<Flow>,
    /// Allocation site for primitives that build records
    pub alias: Option<u32>,
    pub applys: Applys,
}

#[derive(Debug, Clone)]
pub struct Let {
    pub name: String,
    pub targ: T2Id,
    pub def: SynId,
    pub body: SynId,
    pub refs: Vec<SynId>,
}

#[derive(Debug, Clone)]
pub struct Apply {
    pub fun: SynId,
    pub args: Vec<SynId>,
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub alias: u32,
    pub labels: Vec<String>,
    pub children: Vec<SynId>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub label: String,
    pub rec: SynId,
}

#[derive(Debug, Clone)]
pub struct Overload {
    pub alts: Vec<SynId>,
    pub tag: u32,
}

#[derive(Debug, Clone)]
pub struct Root {
    pub body: SynId,
}

/// Something that can be called: user lambdas and primitives
pub trait Func {
    fn formals(&self) -> &[Flow];
    fn formals_mut(&mut self) -> &mut [Flow];
    fn applys_mut(&mut self) -> &mut Applys;

    /// Meet actual arguments into the formals; true when any formal fell
    fn arg_meet(&mut self, actuals: &[Flow]) -> bool {
        let mut changed = false;
        for (formal, actual) in self.formals_mut().iter_mut().zip(actuals) {
            let m = formal.meet(actual);
            if m != *formal {
                *formal = m;
                changed = true;
            }
        }
        changed
    }

    fn add_apply(&mut self, apply: SynId) {
        let applys = self.applys_mut();
        if !applys.contains(&apply) {
            applys.push(apply);
        }
    }
}

/// Something that allocates a record: struct literals and pair-like primitives
pub trait Alloc {
    /// Flow stored in `label`, given a way to read child flows
    fn load(&self, label: &str, child_flow: &dyn Fn(SynId) -> Flow) -> Option<Flow>;
}

impl Func for Lambda {
    fn formals(&self) -> &[Flow] {
        &self.formals
    }
    fn formals_mut(&mut self) -> &mut [Flow] {
        &mut self.formals
    }
    fn applys_mut(&mut self) -> &mut Applys {
        &mut self.applys
    }
}

impl Func for Prim {
    fn formals(&self) -> &[Flow] {
        &self.formals
    }
    fn formals_mut(&mut self) -> &mut [Flow] {
        &mut self.formals
    }
    fn applys_mut(&mut self) -> &mut Applys {
        &mut self.applys
    }
}

impl Alloc for Struct {
    fn load(&self, label: &str, child_flow: &dyn Fn(SynId) -> Flow) -> Option<Flow> {
        let i = self.labels.iter().position(|l| l == label)?;
        Some(child_flow(self.children[i]))
    }
}

impl Alloc for Prim {
    fn load(&self, label: &str, _child_flow: &dyn Fn(SynId) -> Flow) -> Option<Flow> {
        self.op.load(label, &self.formals)
    }
}

impl Kind {
    pub fn as_func_mut(&mut self) -> Option<&mut dyn Func> {
        match self {
            Kind::Lambda(l) => Some(l),
            Kind::Prim(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_alloc(&self) -> Option<&dyn Alloc> {
        match self {
            Kind::Struct(s) => Some(s),
            Kind::Prim(p) if p.alias.is_some() => Some(p),
            _ => None,
        }
    }

    pub fn children(&self) -> SmallVec<[SynId; 4]> {
        let mut out = SmallVec::new();
        match self {
            Kind::Con(_) | Kind::Ident(_) | Kind::Prim(_) => {}
            Kind::Lambda(l) => out.push(l.body),
            Kind::Let(l) => {
                out.push(l.def);
                out.push(l.body);
            }
            Kind::Apply(a) => {
                out.push(a.fun);
                out.extend(a.args.iter().copied());
            }
            Kind::Struct(s) => out.extend(s.children.iter().copied()),
            Kind::Field(f) => out.push(f.rec),
            Kind::Overload(o) => out.extend(o.alts.iter().copied()),
            Kind::Root(r) => out.push(r.body),
        }
        out
    }

    /// Short description for listings
    pub fn label(&self) -> String {
        match self {
            Kind::Con(f) => format!("con {}", f),
            Kind::Ident(i) => format!("ident {}", i.name),
            Kind::Lambda(l) => format!("lambda {{{}}}", l.params.join(" ")),
            Kind::Prim(p) => format!("prim {}", p.op.name()),
            Kind::Let(l) => format!("let {}", l.name),
            Kind::Apply(a) => format!("apply/{}", a.args.len()),
            Kind::Struct(s) => format!("struct @{{{}}}", s.labels.join(",")),
            Kind::Field(f) => format!("field .{}", f.label),
            Kind::Overload(o) => format!("overload/{}", o.alts.len()),
            Kind::Root(_) => "root".to_string(),
        }
    }
}

/// The syntax arena for one program
#[derive(Debug, Clone, Default)]
pub struct Ast {
    nodes: Vec<Syntax>,
    root: Option<SynId>,
    /// Function identity `i` lives at `funcs[i - 1]`
    funcs: Vec<SynId>,
    /// Allocation site `a` lives at `allocs[a - 1]`
    allocs: Vec<SynId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = SynId> {
        (0..self.nodes.len() as u32).map(SynId)
    }

    pub fn get(&self, id: SynId) -> &Syntax {
        &self.nodes[id.idx()]
    }

    pub fn get_mut(&mut self, id: SynId) -> &mut Syntax {
        &mut self.nodes[id.idx()]
    }

    /// The Root node; the arena's last node when none was set
    pub fn root(&self) -> SynId {
        self.root.unwrap_or(SynId(self.nodes.len().saturating_sub(1) as u32))
    }

    pub fn set_root(&mut self, id: SynId) {
        self.root = Some(id);
    }

    pub fn push(&mut self, kind: Kind, t2: T2Id, nongen: VStack, pos: usize) -> SynId {
        let id = SynId(self.nodes.len() as u32);
        for child in kind.children() {
            self.nodes[child.idx()].parent = Some(id);
        }
        self.nodes.push(Syntax { kind, t2, flow: Flow::Any, parent: None, nongen, pos });
        id
    }

    /// Replace a placeholder's kind once its children exist
    pub fn fill(&mut self, id: SynId, kind: Kind, t2: T2Id) {
        for child in kind.children() {
            self.nodes[child.idx()].parent = Some(id);
        }
        let node = &mut self.nodes[id.idx()];
        node.kind = kind;
        node.t2 = t2;
    }

    pub fn next_fidx(&mut self, id: SynId) -> u32 {
        self.funcs.push(id);
        self.funcs.len() as u32
    }

    pub fn next_alias(&mut self, id: SynId) -> u32 {
        self.allocs.push(id);
        self.allocs.len() as u32
    }

    pub fn func(&self, fidx: u32) -> Option<SynId> {
        let i = (fidx as usize).checked_sub(1)?;
        self.funcs.get(i).copied()
    }

    pub fn alloc(&self, alias: u32) -> Option<SynId> {
        let i = (alias as usize).checked_sub(1)?;
        self.allocs.get(i).copied()
    }

    /// Flow of field `label` at allocation site `alias`
    pub fn load(&self, alias: u32, label: &str) -> Option<Flow> {
        let site = self.alloc(alias)?;
        let alloc = self.get(site).kind.as_alloc()?;
        alloc.load(label, &|child| self.get(child).flow.clone())
    }

    pub fn fidx_count(&self) -> usize {
        self.funcs.len()
    }

    pub fn alias_count(&self) -> usize {
        self.allocs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lambda(n: usize) -> Lambda {
        Lambda {
            params: vec!["x".into(); n],
            targs: vec![],
            body: SynId(0),
            formals: vec![Flow::Any; n],
            fidx: 1,
            applys: Applys::new(),
            refs: vec![],
        }
    }

    #[test]
    fn test_arg_meet_reports_fall() {
        let mut l = lambda(2);
        assert!(l.arg_meet(&[Flow::int(1), Flow::Any]));
        assert!(!l.arg_meet(&[Flow::int(1), Flow::Any]));
        assert!(l.arg_meet(&[Flow::int(2), Flow::Any]));
        assert_eq!(l.formals(), &[Flow::int64(), Flow::Any]);
    }

    #[test]
    fn test_add_apply_dedups() {
        let mut l = lambda(1);
        l.add_apply(SynId(3));
        l.add_apply(SynId(3));
        assert_eq!(l.applys.len(), 1);
    }

    #[test]
    fn test_struct_load() {
        let s = Struct { alias: 1, labels: vec!["x".into(), "y".into()], children: vec![SynId(4), SynId(5)] };
        let flow = |id: SynId| Flow::int(i64::from(id.0));
        assert_eq!(s.load("y", &flow), Some(Flow::int(5)));
        assert_eq!(s.load("z", &flow), None);
    }

    #[test]
    fn test_ids_walk_both_ways() {
        let mut ast = Ast::new();
        for v in 0..3 {
            ast.push(Kind::Con(Flow::int(v)), T2Id(0), VStack::new(), 0);
        }
        let back: Vec<SynId> = ast.ids().rev().collect();
        assert_eq!(back, vec![SynId(2), SynId(1), SynId(0)]);
    }
}
