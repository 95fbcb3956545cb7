use std::collections::BTreeMap;

use strata_ast::build as ast;
use strata_ast::{BinOp, CompositionDef, Program, ReversibilityTag, Type};
use strata_engine::{
    analyze_program, ConstraintOutcome, EngineConfig, EngineError, GuardKind, InversionOutcome,
};
use strata_sym::{eval, Value};

fn bindings(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

/// fn safe_div(a, b) assume b != 0 { a / b } plus one caller per argument
/// shape: literal-satisfying, unconstrained, literal-violating.
fn divider_program() -> Program {
    let mut safe_div = ast::function(
        "safe_div",
        vec![ast::param("a", Type::Int), ast::param("b", Type::Int)],
        Type::Rational,
        ast::binary(
            BinOp::Div,
            ast::var("a", Type::Int),
            ast::var("b", Type::Int),
        ),
    );
    safe_div.assumes.push(ast::constraint(
        ast::binary(BinOp::Ne, ast::var("b", Type::Int), ast::int(0)),
        "b != 0",
    ));

    let good = ast::function(
        "call_good",
        vec![],
        Type::Rational,
        ast::call("safe_div", vec![ast::int(10), ast::int(5)], Type::Rational),
    );
    let unconstrained = ast::function(
        "call_unconstrained",
        vec![ast::param("x", Type::Int)],
        Type::Rational,
        ast::call(
            "safe_div",
            vec![ast::int(10), ast::var("x", Type::Int)],
            Type::Rational,
        ),
    );
    let bad = ast::function(
        "call_bad",
        vec![],
        Type::Rational,
        ast::call("safe_div", vec![ast::int(10), ast::int(0)], Type::Rational),
    );

    let mut p = Program::new();
    p.functions = vec![safe_div, good, unconstrained, bad];
    p
}

fn outcome_of<'r>(
    report: &'r strata_engine::AnalysisReport,
    function: &str,
) -> &'r ConstraintOutcome {
    &report
        .constraints
        .iter()
        .find(|e| e.function == function)
        .expect("entry exists")
        .outcome
}

#[test]
fn assumption_trichotomy_across_call_sites() {
    let report = analyze_program(&divider_program(), &EngineConfig::default());

    assert_eq!(*outcome_of(&report, "call_good"), ConstraintOutcome::Proven);
    assert_eq!(
        *outcome_of(&report, "call_unconstrained"),
        ConstraintOutcome::Guarded
    );
    assert_eq!(*outcome_of(&report, "call_bad"), ConstraintOutcome::Refuted);

    // The undecided site got a runtime guard over the substituted constraint.
    let guard = report
        .guards
        .iter()
        .find(|g| g.function == "call_unconstrained")
        .expect("guard request");
    assert_eq!(guard.kind, GuardKind::AssumptionViolation);
    assert_eq!(strata_sym::render(&guard.guard.arena, guard.guard.root), "(x != 0)");

    // The refuted site is a compile error naming callee and counterexample.
    let error = report
        .errors
        .iter()
        .find(|e| matches!(e, EngineError::RefutedAssumption { .. }))
        .expect("refuted assumption error");
    let EngineError::RefutedAssumption {
        callee,
        constraint,
        counterexample,
        ..
    } = error
    else {
        unreachable!();
    };
    assert_eq!(callee, "safe_div");
    assert_eq!(constraint, "b != 0");
    assert!(!counterexample.is_empty());

    assert_eq!(report.summary.proven_constraints, 1);
    assert_eq!(report.summary.guarded_constraints, 1);
    assert_eq!(report.summary.refuted_constraints, 1);
}

#[test]
fn clamp_guarantee_proves_over_three_branches() {
    // fn clamp(x) guarantee result >= 0 && result <= 100
    //   { if x < 0 then 0 else if x > 100 then 100 else x }
    let x = || ast::var("x", Type::Int);
    let mut clamp = ast::function(
        "clamp",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::if_else(
            ast::binary(BinOp::Lt, x(), ast::int(0)),
            ast::int(0),
            ast::if_else(
                ast::binary(BinOp::Gt, x(), ast::int(100)),
                ast::int(100),
                x(),
            ),
        ),
    );
    clamp.guarantees.push(ast::constraint(
        ast::binary(
            BinOp::And,
            ast::binary(
                BinOp::Ge,
                ast::var(strata_ast::RESULT_VAR, Type::Int),
                ast::int(0),
            ),
            ast::binary(
                BinOp::Le,
                ast::var(strata_ast::RESULT_VAR, Type::Int),
                ast::int(100),
            ),
        ),
        "result >= 0 && result <= 100",
    ));
    let mut program = Program::new();
    program.functions = vec![clamp];

    let report = analyze_program(&program, &EngineConfig::default());
    assert_eq!(*outcome_of(&report, "clamp"), ConstraintOutcome::Proven);
    assert!(report.errors.is_empty());
    assert!(report.guards.is_empty());
}

#[test]
fn reversible_function_lands_in_the_inverse_table() {
    let mut to_f = ast::function(
        "to_fahrenheit",
        vec![ast::param("c", Type::Rational)],
        Type::Rational,
        ast::binary(
            BinOp::Add,
            ast::binary(
                BinOp::Div,
                ast::binary(BinOp::Mul, ast::var("c", Type::Rational), ast::int(9)),
                ast::int(5),
            ),
            ast::int(32),
        ),
    );
    to_f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![to_f];

    let report = analyze_program(&program, &EngineConfig::default());
    assert_eq!(report.summary.inverted_functions, 1);
    let inverse = report.inverses.get("to_fahrenheit").expect("inverse body");
    let back = eval(
        &inverse.arena,
        inverse.body,
        &bindings(&[("result", Value::int(212))]),
    )
    .unwrap();
    assert_eq!(back, Value::int(100));
}

#[test]
fn failed_reversible_tag_is_a_compile_error_citing_the_node() {
    let mut parity = ast::function(
        "parity",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::binary(BinOp::Mod, ast::var("x", Type::Int), ast::int(2)),
    );
    parity.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![parity];

    let report = analyze_program(&program, &EngineConfig::default());
    assert_eq!(report.summary.failed_inversions, 1);
    let error = report
        .errors
        .iter()
        .find(|e| matches!(e, EngineError::NotReversible { .. }))
        .expect("inversion error");
    let EngineError::NotReversible { node, reason, .. } = error else {
        unreachable!();
    };
    assert_eq!(node, "(x % 2)");
    assert!(reason.contains("modulo"));
}

#[test]
fn lossy_composition_leg_is_cited_by_name() {
    // pipeline = scale >> shift >> round_down, where round_down is lossy.
    let mut scale = ast::function(
        "scale",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Mul, ast::var("x", Type::Rational), ast::int(2)),
    );
    scale.tag = ReversibilityTag::Reversible;
    let mut shift = ast::function(
        "shift",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Add, ast::var("x", Type::Rational), ast::int(3)),
    );
    shift.tag = ReversibilityTag::Reversible;
    let mut round_down = ast::function(
        "round_down",
        vec![ast::param("x", Type::Rational)],
        Type::Int,
        ast::call("floor", vec![ast::var("x", Type::Rational)], Type::Int),
    );
    round_down.tag = ReversibilityTag::Lossy;

    let mut program = Program::new();
    program.functions = vec![scale, shift, round_down];
    program.compositions = vec![CompositionDef {
        span: ast::zspan(),
        name: ast::ident("pipeline"),
        legs: vec![ast::ident("scale"), ast::ident("shift"), ast::ident("round_down")],
    }];

    let report = analyze_program(&program, &EngineConfig::default());
    assert!(report.composites.is_empty());
    let error = report
        .errors
        .iter()
        .find(|e| matches!(e, EngineError::CompositionNotInvertible { .. }))
        .expect("composition error");
    let EngineError::CompositionNotInvertible { name, leg, .. } = error else {
        unreachable!();
    };
    assert_eq!(name, "pipeline");
    assert_eq!(leg, "round_down");

    let entry = report
        .inversions
        .iter()
        .find(|e| e.function == "pipeline")
        .expect("inversion entry");
    assert_eq!(entry.outcome, InversionOutcome::Failed);
}

#[test]
fn invertible_composition_chains_in_reverse_order() {
    let mut scale = ast::function(
        "scale",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Mul, ast::var("x", Type::Rational), ast::int(2)),
    );
    scale.tag = ReversibilityTag::Reversible;
    let mut shift = ast::function(
        "shift",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Add, ast::var("x", Type::Rational), ast::int(3)),
    );
    shift.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![scale, shift];
    program.compositions = vec![CompositionDef {
        span: ast::zspan(),
        name: ast::ident("pipeline"),
        legs: vec![ast::ident("scale"), ast::ident("shift")],
    }];

    let report = analyze_program(&program, &EngineConfig::default());
    let composite = report.composites.get("pipeline").expect("composite inverse");
    assert_eq!(composite.legs[0].function, "shift");
    assert_eq!(composite.legs[1].function, "scale");

    // Forward: 4 * 2 + 3 = 11; inverse chain returns 4.
    let mut value = Value::int(11);
    for leg in &composite.legs {
        value = eval(&leg.arena, leg.body, &bindings(&[("result", value)])).unwrap();
    }
    assert_eq!(value, Value::int(4));
}

#[test]
fn analysis_is_deterministic_across_runs() {
    let program = divider_program();
    let first = analyze_program(&program, &EngineConfig::default());
    let second = analyze_program(&program, &EngineConfig::default());

    let signature = |report: &strata_engine::AnalysisReport| {
        report
            .constraints
            .iter()
            .map(|e| (e.function.clone(), e.text.clone(), e.outcome))
            .collect::<Vec<_>>()
    };
    assert_eq!(signature(&first), signature(&second));
    assert_eq!(
        first.summary.render(),
        second.summary.render()
    );
}

#[test]
fn incremental_cache_round_trips_and_invalidates() {
    let dir = std::env::temp_dir().join(format!("strata-engine-cache-{}", std::process::id()));
    let cache_path = dir.join("engine-cache.json");
    let _ = std::fs::remove_file(&cache_path);

    let config = EngineConfig {
        cache_path: Some(cache_path.clone()),
        ..EngineConfig::default()
    };

    let cold = analyze_program(&divider_program(), &config);
    assert!(cache_path.exists(), "cache file written after analysis");

    // Warm run must reproduce the cold run exactly.
    let warm = analyze_program(&divider_program(), &config);
    assert_eq!(
        cold.summary.render(),
        warm.summary.render()
    );
    assert_eq!(cold.constraints.len(), warm.constraints.len());
    for (a, b) in cold.constraints.iter().zip(warm.constraints.iter()) {
        assert_eq!(a.function, b.function);
        assert_eq!(a.outcome, b.outcome);
    }

    // Changing the callee's precondition changes the key, so the stale
    // entry is not served.
    let mut changed = divider_program();
    changed.functions[0].assumes[0] = ast::constraint(
        ast::binary(BinOp::Gt, ast::var("b", Type::Int), ast::int(0)),
        "b > 0",
    );
    let after = analyze_program(&changed, &config);
    // call_good passes b = 5 > 0: still proven; call_bad passes 0, refuted.
    assert_eq!(*outcome_of(&after, "call_good"), ConstraintOutcome::Proven);
    assert_eq!(*outcome_of(&after, "call_bad"), ConstraintOutcome::Refuted);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn effectful_bodies_degrade_to_guarded_not_proven() {
    // fn emit(x) guarantee result >= 0 { <effectful> }
    let mut emit = ast::function(
        "emit",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::var("x", Type::Int),
    );
    emit.effectful = true;
    emit.guarantees.push(ast::constraint(
        ast::binary(
            BinOp::Ge,
            ast::var(strata_ast::RESULT_VAR, Type::Int),
            ast::int(0),
        ),
        "result >= 0",
    ));
    let mut program = Program::new();
    program.functions = vec![emit];

    let report = analyze_program(&program, &EngineConfig::default());
    assert_eq!(*outcome_of(&report, "emit"), ConstraintOutcome::Guarded);
    assert!(report.errors.is_empty());
    assert_eq!(report.guards.len(), 1);
}
