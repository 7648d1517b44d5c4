//! Inference session configuration

use serde::{Deserialize, Serialize};

/// Default cap on worklist pops, summed over all phases
pub const MAX_ITERATIONS: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferConfig {
    /// Worklist pop order; 0 pops newest-first, anything else seeds a random order
    pub seed: u64,
    /// Run Hindley-Milner unification
    pub do_hm: bool,
    /// Run global constant propagation
    pub do_gcp: bool,
    /// Safety stop for the fixpoint loop
    pub max_iterations: usize,
    /// Re-run every node once at quiescence and report late progress
    pub check_confluence: bool,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            do_hm: true,
            do_gcp: true,
            max_iterations: MAX_ITERATIONS,
            check_confluence: true,
        }
    }
}

impl InferConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_hm(mut self, on: bool) -> Self {
        self.do_hm = on;
        self
    }

    pub fn with_gcp(mut self, on: bool) -> Self {
        self.do_gcp = on;
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_confluence_check(mut self, on: bool) -> Self {
        self.check_confluence = on;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = InferConfig::default();
        assert!(c.do_hm && c.do_gcp);
        assert_eq!(c.seed, 0);
        assert_eq!(c.max_iterations, MAX_ITERATIONS);
    }

    #[test]
    fn test_partial_toml() {
        let c: InferConfig = toml::from_str("seed = 7\ndo_gcp = false\n").unwrap();
        assert_eq!(c, InferConfig::new().with_seed(7).with_gcp(false));
    }

    #[test]
    fn test_json_roundtrip() {
        let c = InferConfig::new().with_hm(false).with_max_iterations(10);
        let s = serde_json::to_string(&c).unwrap();
        let back: InferConfig = serde_json::from_str(&s).unwrap();
        assert_eq!(back, c);
    }
}
