//! Non-generative stack
//!
//! An immutable cons-list of type variables bound by enclosing scopes that
//! are still being defined. Pushing shares the tail, so every syntax node
//! can hold the stack in effect at its position.

use crate::types::T2Id;
use std::rc::Rc;

#[derive(Debug)]
struct Link {
    t2: T2Id,
    next: VStack,
}

#[derive(Debug, Clone, Default)]
pub struct VStack(Option<Rc<Link>>);

impl VStack {
    pub fn new() -> Self {
        VStack(None)
    }

    pub fn push(&self, t2: T2Id) -> VStack {
        VStack(Some(Rc::new(Link { t2, next: self.clone() })))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Innermost scope first
    pub fn iter(&self) -> impl Iterator<Item = T2Id> + '_ {
        let mut cur = self.0.as_deref();
        std::iter::from_fn(move || {
            let link = cur?;
            cur = link.next.0.as_deref();
            Some(link.t2)
        })
    }
}
