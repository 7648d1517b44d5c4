//! # tyflow-core
//!
//! Hindley-Milner type inference and global constant propagation run as one
//! monotone worklist fixpoint over a small expression language.
//!
//! ## Modules
//!
//! - **[`flow`]** - flow-value lattice
//! - **[`types`]** - union-find type graph with fresh-unify and overloads
//! - **[`syntax`]** - AST node kinds and the primitive library
//! - **[`parse`]** - source text to [`syntax::Ast`]
//! - **[`driver`]** - the inference [`Session`] and its phases
//!
//! ## Quick Start
//!
//! ```rust
//! let mut s = tyflow_core::hm("id = {x -> x}; (pair (id 1) (id \"a\"))", 0, true, true).unwrap();
//! assert_eq!(s.root_type(), "*@{0=1, 1=\"a\"}");
//! assert!(s.errors().is_empty());
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod flow;
pub mod parse;
pub mod syntax;
pub mod types;
pub mod vstack;

pub use config::InferConfig;
pub use driver::{NodeReport, Phase, Session, Stats, Summary, TypeErrorReport};
pub use error::{InferError, Result};
pub use flow::Flow;
pub use syntax::SynId;

/// Parse and infer `source`; `seed` picks the worklist order
pub fn hm(source: &str, seed: u64, do_hm: bool, do_gcp: bool) -> Result<Session> {
    let config = InferConfig::new().with_seed(seed).with_hm(do_hm).with_gcp(do_gcp);
    infer(source, &config)
}

pub fn infer(source: &str, config: &InferConfig) -> Result<Session> {
    let mut session = Session::new(source, config.clone())?;
    session.run();
    Ok(session)
}
