//! Fixpoint driver
//!
//! One [`Session`] owns the syntax arena, the type graph and every registry
//! the analysis needs. [`Session::run`] walks four one-way phases; in each,
//! nodes are popped from the worklist, their HM step and GCP step run, and
//! on progress their dependents are queued again. The phase ends when the
//! worklist is empty.

mod gcp;
mod hm;
mod root;
mod worklist;

pub use worklist::Worklist;

use crate::config::InferConfig;
use crate::error::Result;
use crate::flow::Flow;
use crate::parse::parse;
use crate::syntax::{Ast, Kind, PrimOp, SynId};
use crate::types::{TypeGraph, AMBIGUOUS};
use fnv::{FnvHashMap, FnvHashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Rounds of the confluence sweep before giving up on late progress
const MAX_SWEEPS: usize = 4;

/// Driver phases, entered in order and never re-entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Every node starts at the top of both lattices
    #[default]
    Optimistic,
    /// Call-site lifting stops treating unconstrained results as unreached
    NewLeafFrozen,
    /// Overloads with several viable alternatives become errors
    AmbiguityForced,
    /// The type graph stops changing; only flows still fall
    HmFrozen,
}

impl Phase {
    pub const ALL: [Phase; 4] =
        [Phase::Optimistic, Phase::NewLeafFrozen, Phase::AmbiguityForced, Phase::HmFrozen];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Optimistic => "optimistic",
            Phase::NewLeafFrozen => "new-leaf-frozen",
            Phase::AmbiguityForced => "ambiguity-forced",
            Phase::HmFrozen => "hm-frozen",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counters describing one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Worklist pops over all phases
    pub iterations: usize,
    /// Last phase entered
    pub phase: Phase,
    /// Nodes that still progressed when swept at quiescence
    pub confluence_misses: usize,
    /// GCP results that tried to rise and were forced down
    pub monotonic_repairs: usize,
    /// False when the iteration cap stopped the run
    pub converged: bool,
    pub nodes: usize,
    pub types: usize,
}

/// A type error on a reachable node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeErrorReport {
    pub node: u32,
    pub pos: usize,
    pub message: String,
}

/// One syntax node in a full listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: u32,
    pub pos: usize,
    pub label: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub flow: String,
}

/// Serializable outcome of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub root_type: String,
    pub root_flow: String,
    pub escaped_fidxs: Vec<u32>,
    pub escaped_aliases: Vec<u32>,
    pub errors: Vec<TypeErrorReport>,
    pub stats: Stats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<NodeReport>,
}

/// All state for one inference run. Dropping it resets everything.
#[derive(Debug)]
pub struct Session {
    ast: Ast,
    g: TypeGraph,
    config: InferConfig,
    phase: Phase,
    work: Worklist,
    /// Applies whose callee is an overload not yet resolved for flows
    delayed: Vec<SynId>,
    /// Allocation site -> Field nodes loading from it
    readers: FnvHashMap<u32, SmallVec<[SynId; 4]>>,
    /// Functions and allocations handed to unknown callees
    extern_fidxs: BTreeSet<u32>,
    extern_aliases: BTreeSet<u32>,
    escaped_fidxs: BTreeSet<u32>,
    escaped_aliases: BTreeSet<u32>,
    stats: Stats,
    done: bool,
}

impl Session {
    /// Parse `source` and prepare a run; nothing is inferred yet
    pub fn new(source: &str, config: InferConfig) -> Result<Self> {
        let mut g = TypeGraph::new();
        let ast = parse(source, &mut g)?;
        let work = Worklist::new(ast.len(), config.seed);
        Ok(Self {
            ast,
            g,
            config,
            phase: Phase::Optimistic,
            work,
            delayed: Vec::new(),
            readers: FnvHashMap::default(),
            extern_fidxs: BTreeSet::new(),
            extern_aliases: BTreeSet::new(),
            escaped_fidxs: BTreeSet::new(),
            escaped_aliases: BTreeSet::new(),
            stats: Stats::default(),
            done: false,
        })
    }

    /// Run every phase to quiescence; later calls are no-ops
    pub fn run(&mut self) -> &Stats {
        if self.done {
            return &self.stats;
        }
        self.stats.converged = true;
        for phase in Phase::ALL {
            self.enter(phase);
            if !self.drain() {
                break;
            }
        }
        if self.stats.converged && self.config.check_confluence {
            self.confluence_sweep();
        }
        self.final_pass();
        self.stats.nodes = self.ast.len();
        self.stats.types = self.g.len();
        self.done = true;
        info!(
            iterations = self.stats.iterations,
            phase = %self.stats.phase,
            converged = self.stats.converged,
            "inference complete"
        );
        &self.stats
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.stats.phase = phase;
        if phase >= Phase::AmbiguityForced {
            self.g.force_ambiguity = true;
        }
        info!(phase = %phase, "entering phase");
        if phase == Phase::HmFrozen && self.config.do_hm {
            self.commit_ambiguous();
        }
        for id in std::mem::take(&mut self.delayed) {
            self.work.push(id);
        }
        for id in self.ast.ids().rev() {
            self.work.push(id);
        }
    }

    /// Overloads that no use ever narrowed stay ambiguous once HM stops
    fn commit_ambiguous(&mut self) {
        for id in self.ast.ids() {
            let Kind::Overload(o) = &self.ast.get(id).kind else {
                continue;
            };
            if self.g.resolution(o.tag).is_some() {
                continue;
            }
            let t2 = self.ast.get(id).t2;
            let r = self.g.find(t2);
            if self.g.node(r).over.is_some() && self.g.set_err(r, AMBIGUOUS) {
                debug!(node = id.0, "unresolved overload committed as ambiguous");
            }
        }
    }

    /// Pop until empty; false when the iteration cap was hit
    fn drain(&mut self) -> bool {
        while let Some(id) = self.work.pop() {
            if self.stats.iterations >= self.config.max_iterations {
                warn!(limit = self.config.max_iterations, "iteration limit reached; stopping early");
                self.stats.converged = false;
                return false;
            }
            self.stats.iterations += 1;
            self.step(id);
        }
        true
    }

    /// Re-run every node; anything that still moves is late progress
    fn confluence_sweep(&mut self) {
        for _ in 0..MAX_SWEEPS {
            let mut late = 0;
            for id in self.ast.ids() {
                if self.step(id) {
                    warn!(node = id.0, kind = %self.ast.get(id).kind.label(), "late progress at quiescence");
                    late += 1;
                }
            }
            self.stats.confluence_misses += late;
            debug_assert!(late == 0, "{} nodes progressed at quiescence", late);
            let drained = self.drain();
            if late == 0 || !drained {
                return;
            }
        }
    }

    /// One HM step then one GCP step; true on progress
    fn step(&mut self, id: SynId) -> bool {
        let mut progress = false;
        if self.config.do_hm && self.phase < Phase::HmFrozen {
            self.g.begin_step(id);
            self.hm_step(id);
            progress |= self.g.end_step();
        }
        if self.config.do_gcp {
            let old = self.ast.get(id).flow.clone();
            let mut new = self.gcp_step(id);
            debug_assert!(old.isa(&new), "flow of node {} rose from {} to {}", id.0, old, new);
            if !old.isa(&new) {
                warn!(node = id.0, old = %old, new = %new, "flow rose; forcing it down");
                self.stats.monotonic_repairs += 1;
                new = old.meet(&new);
            }
            if new != old {
                self.ast.get_mut(id).flow = new;
                progress = true;
            }
        }
        for dep in self.g.take_pending() {
            self.work.push(dep);
        }
        for tag in self.g.take_resolved() {
            if (tag as usize) < self.ast.len() {
                self.work.push(SynId(tag));
            }
        }
        if progress {
            debug!(node = id.0, kind = %self.ast.get(id).kind.label(), "progress");
            self.push_neighbors(id);
        }
        progress
    }

    fn push_readers(&mut self, alias: u32) {
        if let Some(readers) = self.readers.get(&alias) {
            for r in readers.clone() {
                self.work.push(r);
            }
        }
    }

    fn push_all(&mut self, ids: impl IntoIterator<Item = SynId>) {
        for id in ids {
            self.work.push(id);
        }
    }

    fn push_neighbors(&mut self, id: SynId) {
        let node = self.ast.get(id);
        let mut out: SmallVec<[SynId; 8]> = SmallVec::new();
        let mut aliases: SmallVec<[u32; 2]> = SmallVec::new();
        out.extend(node.parent);
        out.extend(node.kind.children());
        match &node.kind {
            Kind::Lambda(l) => {
                out.extend(l.applys.iter().copied());
                out.extend(l.refs.iter().copied());
            }
            Kind::Prim(p) => {
                out.extend(p.applys.iter().copied());
                aliases.extend(p.alias);
            }
            Kind::Let(l) => out.extend(l.refs.iter().copied()),
            Kind::Struct(s) => aliases.push(s.alias),
            _ => {}
        }
        if let Some(parent) = node.parent {
            match &self.ast.get(parent).kind {
                Kind::Lambda(l) => out.extend(l.applys.iter().copied()),
                Kind::Struct(s) => aliases.push(s.alias),
                Kind::Let(l) if l.def == id => out.extend(l.refs.iter().copied()),
                _ => {}
            }
        }
        if !self.escaped_fidxs.is_empty() || !self.escaped_aliases.is_empty() {
            out.push(self.ast.root());
        }
        self.push_all(out);
        for alias in aliases {
            self.push_readers(alias);
        }
    }

    /// Expand terse errors now that the final types are known
    fn final_pass(&mut self) {
        for id in self.ast.ids() {
            let Kind::Field(f) = &self.ast.get(id).kind else {
                continue;
            };
            let t2 = self.ast.get(id).t2;
            let rec_t2 = self.ast.get(f.rec).t2;
            let terse = format!("Missing field {}", f.label);
            let r = self.g.find(t2);
            if self.g.node(r).err.as_deref() == Some(terse.as_str()) {
                let rec = self.g.print(rec_t2);
                self.g.replace_err(t2, format!("{} in {}", terse, rec));
            }
        }
    }

    fn flow(&self, id: SynId) -> Flow {
        self.ast.get(id).flow.clone()
    }

    pub fn config(&self) -> &InferConfig {
        &self.config
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn root(&self) -> SynId {
        self.ast.root()
    }

    /// Printed type of a node
    pub fn type_of(&mut self, id: SynId) -> String {
        let t2 = self.ast.get(id).t2;
        self.g.print(t2)
    }

    pub fn flow_of(&self, id: SynId) -> &Flow {
        &self.ast.get(id).flow
    }

    pub fn root_type(&mut self) -> String {
        self.type_of(self.root())
    }

    pub fn root_flow(&self) -> &Flow {
        self.flow_of(self.root())
    }

    pub fn escaped_fidxs(&self) -> Vec<u32> {
        self.escaped_fidxs.iter().copied().collect()
    }

    pub fn escaped_aliases(&self) -> Vec<u32> {
        self.escaped_aliases.iter().copied().collect()
    }

    /// Nodes live at the fixpoint. Without GCP every node counts as live.
    pub fn reachable(&self) -> Vec<bool> {
        let mut live = vec![!self.config.do_gcp; self.ast.len()];
        if !self.config.do_gcp {
            return live;
        }
        let mut stack = vec![self.ast.root()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut live[id.idx()], true) {
                continue;
            }
            match &self.ast.get(id).kind {
                Kind::Lambda(l) => {
                    if !l.applys.is_empty() || self.escaped_fidxs.contains(&l.fidx) {
                        stack.push(l.body);
                    }
                }
                Kind::Apply(a) if self.is_if(a.fun) && a.args.len() == 3 => {
                    stack.push(a.fun);
                    stack.push(a.args[0]);
                    let pred = &self.ast.get(a.args[0]).flow;
                    if !pred.is_any() {
                        match pred.truthy() {
                            Some(true) => stack.push(a.args[1]),
                            Some(false) => stack.push(a.args[2]),
                            None => stack.extend([a.args[1], a.args[2]]),
                        }
                    }
                }
                kind => stack.extend(kind.children()),
            }
        }
        live
    }

    /// Type errors on reachable nodes, one per error type
    pub fn errors(&mut self) -> Vec<TypeErrorReport> {
        let live = self.reachable();
        let mut seen = FnvHashSet::default();
        let mut out = Vec::new();
        for id in self.ast.ids() {
            if !live[id.idx()] {
                continue;
            }
            let t2 = self.ast.get(id).t2;
            let r = self.g.find(t2);
            if !seen.insert(r) {
                continue;
            }
            if let Some(message) = self.g.err_message(r) {
                out.push(TypeErrorReport { node: id.0, pos: self.ast.get(id).pos, message });
            }
        }
        out
    }

    pub fn nodes(&mut self) -> Vec<NodeReport> {
        let ids: Vec<SynId> = self.ast.ids().collect();
        ids.into_iter()
            .map(|id| NodeReport {
                id: id.0,
                pos: self.ast.get(id).pos,
                label: self.ast.get(id).kind.label(),
                ty: self.type_of(id),
                flow: self.flow_of(id).to_string(),
            })
            .collect()
    }

    pub fn summary(&mut self, with_nodes: bool) -> Summary {
        Summary {
            root_type: self.root_type(),
            root_flow: self.root_flow().to_string(),
            escaped_fidxs: self.escaped_fidxs(),
            escaped_aliases: self.escaped_aliases(),
            errors: self.errors(),
            stats: self.stats.clone(),
            nodes: if with_nodes { self.nodes() } else { Vec::new() },
        }
    }

    fn is_if(&self, id: SynId) -> bool {
        matches!(&self.ast.get(id).kind, Kind::Prim(p) if p.op == PrimOp::If)
    }
}
