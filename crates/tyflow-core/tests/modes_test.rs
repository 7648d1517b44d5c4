use proptest::prelude::*;
use tyflow_core::{hm, infer, Flow, InferConfig, InferError, Phase};

const PROGRAMS: &[&str] = &[
    "(dec 3)",
    "(* (dec 4) 5)",
    "id = {x -> x}; (pair (id 1) (id \"a\"))",
    "@{x = 1, y = \"s\"}.y",
    "x = @{self = x}; x",
    "fact = {n -> (if (eq0 n) 1 (* n (fact (dec n))))}; (fact 3)",
    "(if (rand 1) 0 \"abc\")",
    "f = {a b -> (pair b a)}; (f 1 (f 2 3))",
    "(dec &[2 2.3])",
    "o = &[@{x = 1} @{y = \"a\"}]; (pair o.x o.y)",
    "red = &[0x123 \"red\"]; (if (rand 1) red &[0x456 \"blue\"])",
    "fst = {p -> p.0}; (+ (fst (pair 1 2)) (fst (pair 3 4)))",
];

#[test]
fn test_hm_only_leaves_flows_at_top() {
    let mut s = hm("(dec 3)", 0, true, false).unwrap();
    assert_eq!(s.root_type(), "int64");
    assert_eq!(s.root_flow(), &Flow::Any);
}

#[test]
fn test_gcp_only_folds_constants() {
    let s = hm("(dec 3)", 0, false, true).unwrap();
    assert_eq!(s.root_flow(), &Flow::int(2));

    let s = hm("f = {x -> x}; (f 5)", 0, false, true).unwrap();
    assert_eq!(s.root_flow(), &Flow::int(5));
}

#[test]
fn test_gcp_only_escaped_formals_are_scalar() {
    let s = hm("{x -> x}", 0, false, true).unwrap();
    assert_eq!(s.escaped_fidxs(), vec![1]);
    let body = s.ast().get(s.root()).kind.children()[0];
    let tyflow_core::syntax::Kind::Lambda(l) = &s.ast().get(body).kind else {
        panic!("expected a lambda");
    };
    assert_eq!(l.formals, vec![Flow::Scalar]);
}

#[test]
fn test_config_drives_run() {
    let config = InferConfig::new().with_seed(11).with_confluence_check(false);
    let s = infer("(dec 3)", &config).unwrap();
    assert_eq!(s.stats().phase, Phase::HmFrozen);
    assert_eq!(s.stats().confluence_misses, 0);
    assert_eq!(s.config().seed, 11);
}

#[test]
fn test_hard_failures_surface_as_errors() {
    assert!(matches!(hm("(frob 1)", 0, true, true), Err(InferError::Unbound { .. })));
    assert!(matches!(hm("[1 2]", 0, true, true), Err(InferError::Unsupported { .. })));
    assert!(matches!(hm("(dec 3", 0, true, true), Err(InferError::Parse { .. })));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_hm_types_independent_of_order(i in 0..PROGRAMS.len(), seed in 1u64..u64::MAX) {
        let src = PROGRAMS[i];
        let mut base = hm(src, 0, true, false).unwrap();
        let mut other = hm(src, seed, true, false).unwrap();
        prop_assert_eq!(base.root_type(), other.root_type());
        prop_assert_eq!(base.errors().len(), other.errors().len());
        prop_assert_eq!(other.stats().confluence_misses, 0);
    }

    #[test]
    fn prop_gcp_flows_independent_of_order(i in 0..PROGRAMS.len(), seed in 1u64..u64::MAX) {
        let src = PROGRAMS[i];
        let base = hm(src, 0, false, true).unwrap();
        let other = hm(src, seed, false, true).unwrap();
        prop_assert_eq!(base.root_flow(), other.root_flow());
        prop_assert_eq!(base.escaped_fidxs(), other.escaped_fidxs());
        prop_assert_eq!(base.escaped_aliases(), other.escaped_aliases());
        prop_assert_eq!(other.stats().confluence_misses, 0);
        prop_assert_eq!(other.stats().monotonic_repairs, 0);
    }

    #[test]
    fn prop_combined_results_independent_of_order(i in 0..PROGRAMS.len(), seed in 1u64..u64::MAX) {
        let src = PROGRAMS[i];
        let mut base = hm(src, 0, true, true).unwrap();
        let mut other = hm(src, seed, true, true).unwrap();
        prop_assert_eq!(base.root_type(), other.root_type());
        prop_assert_eq!(base.root_flow(), other.root_flow());
        prop_assert_eq!(base.errors().len(), other.errors().len());
        prop_assert_eq!(base.escaped_fidxs(), other.escaped_fidxs());
        prop_assert_eq!(other.stats().confluence_misses, 0);
        prop_assert_eq!(other.stats().monotonic_repairs, 0);
    }
}
