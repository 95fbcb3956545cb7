use std::collections::BTreeMap;

use strata_ast::build as ast;
use strata_ast::{
    BinOp, Program, RecordDef, RecordFieldDef, ReversibilityTag, Type,
};
use strata_invert::{
    invert, invert_composition, invert_for, InversionResult, LinearDisjointness,
    NonInvertibleReason, RecordTable,
};
use strata_sym::{build, eval, BuildLimits, FunctionSymbolicModel, Value};
use strata_verify::VerifyLimits;

fn model_of(program: &Program, name: &str) -> FunctionSymbolicModel {
    let def = program.function(name).expect("function exists");
    build(def, program, &BuildLimits::default())
}

fn invert_model(program: &Program, name: &str) -> InversionResult {
    let model = model_of(program, name);
    let records = RecordTable::from_program(program);
    let mut oracle = LinearDisjointness::for_model(&model, VerifyLimits::default());
    invert(&model, &records, &mut oracle)
}

fn bindings(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(n, v)| (n.to_string(), v.clone()))
        .collect()
}

#[test]
fn celsius_to_fahrenheit_inverts_linearly() {
    // reversible fn to_fahrenheit(c) { c * 9 / 5 + 32 }
    let mut f = ast::function(
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
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];

    let InversionResult::Invertible(inverse) = invert_model(&program, "to_fahrenheit") else {
        panic!("expected an inverse");
    };
    assert_eq!(inverse.target_param, "c");
    assert!(inverse.free_params.is_empty());

    // Applying the inverse to 32 yields 0, to 212 yields 100.
    let freezing = eval(
        &inverse.arena,
        inverse.body,
        &bindings(&[("result", Value::int(32))]),
    )
    .unwrap();
    assert_eq!(freezing, Value::int(0));

    let boiling = eval(
        &inverse.arena,
        inverse.body,
        &bindings(&[("result", Value::int(212))]),
    )
    .unwrap();
    assert_eq!(boiling, Value::int(100));
}

#[test]
fn round_trip_law_holds_on_sampled_inputs() {
    let mut f = ast::function(
        "shift_scale",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(
            BinOp::Mul,
            ast::binary(BinOp::Sub, ast::var("x", Type::Rational), ast::int(7)),
            ast::int(3),
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];
    let model = model_of(&program, "shift_scale");

    let InversionResult::Invertible(inverse) = invert_model(&program, "shift_scale") else {
        panic!("expected an inverse");
    };

    for input in [-25i64, -1, 0, 1, 7, 41, 1000] {
        let forward = eval(
            &model.arena,
            model.body,
            &bindings(&[("x", Value::int(input))]),
        )
        .unwrap();
        let back = eval(
            &inverse.arena,
            inverse.body,
            &bindings(&[("result", forward)]),
        )
        .unwrap();
        assert_eq!(back, Value::int(input), "round trip failed for {input}");
    }
}

#[test]
fn field_renaming_record_transform_inverts_to_pure_projection() {
    // reversible fn rename(p: Point) -> Renamed { Renamed { e: p.n, s: p.w } }
    let mut program = Program::new();
    program.records = vec![
        RecordDef {
            span: ast::zspan(),
            name: ast::ident("Point"),
            fields: vec![
                RecordFieldDef {
                    span: ast::zspan(),
                    name: ast::ident("n"),
                    ty: Type::Int,
                },
                RecordFieldDef {
                    span: ast::zspan(),
                    name: ast::ident("w"),
                    ty: Type::Int,
                },
            ],
        },
        RecordDef {
            span: ast::zspan(),
            name: ast::ident("Renamed"),
            fields: vec![
                RecordFieldDef {
                    span: ast::zspan(),
                    name: ast::ident("e"),
                    ty: Type::Int,
                },
                RecordFieldDef {
                    span: ast::zspan(),
                    name: ast::ident("s"),
                    ty: Type::Int,
                },
            ],
        },
    ];
    let p = || ast::var("p", Type::Record("Point".to_string()));
    let mut rename = ast::function(
        "rename",
        vec![ast::param("p", Type::Record("Point".to_string()))],
        Type::Record("Renamed".to_string()),
        ast::record(
            "Renamed",
            vec![
                ("e", ast::field(p(), "n", Type::Int)),
                ("s", ast::field(p(), "w", Type::Int)),
            ],
        ),
    );
    rename.tag = ReversibilityTag::Reversible;
    program.functions = vec![rename];

    let InversionResult::Invertible(inverse) = invert_model(&program, "rename") else {
        panic!("expected an inverse");
    };

    // The inverse is pure projection: no arithmetic nodes at all.
    let rendered = strata_sym::render(&inverse.arena, inverse.body);
    assert_eq!(rendered, "Point { n: result.e, w: result.s }");

    let out = Value::Record(
        "Renamed".to_string(),
        vec![
            ("e".to_string(), Value::int(3)),
            ("s".to_string(), Value::int(9)),
        ],
    );
    let back = eval(&inverse.arena, inverse.body, &bindings(&[("result", out)])).unwrap();
    assert_eq!(
        back,
        Value::Record(
            "Point".to_string(),
            vec![
                ("n".to_string(), Value::int(3)),
                ("w".to_string(), Value::int(9)),
            ]
        )
    );
}

#[test]
fn lossy_and_unmarked_functions_are_rejected_without_symbolic_work() {
    let mut lossy = ast::function(
        "discard",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::var("x", Type::Int),
    );
    lossy.tag = ReversibilityTag::Lossy;
    let unmarked = ast::function(
        "plain",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::var("x", Type::Int),
    );
    let mut program = Program::new();
    program.functions = vec![lossy, unmarked];

    match invert_model(&program, "discard") {
        InversionResult::NotInvertible { reason, .. } => {
            assert_eq!(reason, NonInvertibleReason::TaggedLossy)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    match invert_model(&program, "plain") {
        InversionResult::NotInvertible { reason, .. } => {
            assert_eq!(reason, NonInvertibleReason::NotTaggedReversible)
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}

#[test]
fn disjoint_conditional_inverts_with_branch_test() {
    // reversible fn fold(x) { if x < 0 then x - 100 else x }
    // Branch ranges: (..., -100) and [0, ...): provably disjoint.
    let mut f = ast::function(
        "fold",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::if_else(
            ast::binary(BinOp::Lt, ast::var("x", Type::Int), ast::int(0)),
            ast::binary(BinOp::Sub, ast::var("x", Type::Int), ast::int(100)),
            ast::var("x", Type::Int),
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];
    let model = model_of(&program, "fold");

    let InversionResult::Invertible(inverse) = invert_model(&program, "fold") else {
        panic!("expected an inverse");
    };

    for input in [-5i64, -1, 0, 3, 250] {
        let forward = eval(
            &model.arena,
            model.body,
            &bindings(&[("x", Value::int(input))]),
        )
        .unwrap();
        let back = eval(
            &inverse.arena,
            inverse.body,
            &bindings(&[("result", forward)]),
        )
        .unwrap();
        assert_eq!(back, Value::int(input), "round trip failed for {input}");
    }
}

#[test]
fn overlapping_conditional_branches_fail_with_disjointness_reason() {
    // clamp-to-zero: both branches can produce 0.
    let mut f = ast::function(
        "clamp_low",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::if_else(
            ast::binary(BinOp::Lt, ast::var("x", Type::Int), ast::int(0)),
            ast::int(0),
            ast::var("x", Type::Int),
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];

    match invert_model(&program, "clamp_low") {
        InversionResult::NotInvertible { reason, .. } => {
            assert_eq!(reason, NonInvertibleReason::BranchesNotDisjoint)
        }
        other => panic!("expected disjointness failure, got {other:?}"),
    }
}

#[test]
fn modulo_fails_with_the_offending_node_and_reason() {
    let mut f = ast::function(
        "parity",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::binary(BinOp::Mod, ast::var("x", Type::Int), ast::int(2)),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];

    match invert_model(&program, "parity") {
        InversionResult::NotInvertible { reason, .. } => {
            assert_eq!(
                reason,
                NonInvertibleReason::NoInverseRule("modulo discards information".to_string())
            );
        }
        other => panic!("expected modulo failure, got {other:?}"),
    }
}

#[test]
fn shared_target_dependency_is_non_injective() {
    // x + x is injective mathematically, but both operands reference the
    // target, which the structural rules reject.
    let mut f = ast::function(
        "doubled",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::binary(
            BinOp::Add,
            ast::var("x", Type::Int),
            ast::var("x", Type::Int),
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];

    match invert_model(&program, "doubled") {
        InversionResult::NotInvertible { reason, .. } => {
            assert!(matches!(reason, NonInvertibleReason::NonInjective(_)))
        }
        other => panic!("expected non-injectivity failure, got {other:?}"),
    }
}

#[test]
fn multi_parameter_function_solves_for_the_designated_target() {
    // reversible fn offset(x, base) { x + base * 2 }, solved for x:
    // the inverse is result - base * 2 with base free in the closure.
    let mut f = ast::function(
        "offset",
        vec![ast::param("x", Type::Int), ast::param("base", Type::Int)],
        Type::Int,
        ast::binary(
            BinOp::Add,
            ast::var("x", Type::Int),
            ast::binary(BinOp::Mul, ast::var("base", Type::Int), ast::int(2)),
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];
    let model = model_of(&program, "offset");
    let records = RecordTable::from_program(&program);

    let mut oracle = LinearDisjointness::for_model(&model, VerifyLimits::default());
    let InversionResult::Invertible(inverse) = invert_for(&model, "x", &records, &mut oracle)
    else {
        panic!("expected an inverse");
    };
    assert_eq!(inverse.free_params, vec!["base".to_string()]);

    let back = eval(
        &inverse.arena,
        inverse.body,
        &bindings(&[("result", Value::int(25)), ("base", Value::int(10))]),
    )
    .unwrap();
    assert_eq!(back, Value::int(5));

    // Solving for `base` works too; x becomes the free symbol.
    let mut oracle = LinearDisjointness::for_model(&model, VerifyLimits::default());
    let InversionResult::Invertible(for_base) = invert_for(&model, "base", &records, &mut oracle)
    else {
        panic!("expected an inverse for base");
    };
    let back = eval(
        &for_base.arena,
        for_base.body,
        &bindings(&[("result", Value::int(25)), ("x", Value::int(5))]),
    )
    .unwrap();
    assert_eq!(back, Value::int(10));
}

#[test]
fn composition_failure_cites_the_lossy_leg() {
    // f and g are invertible; h rounds and is tagged lossy.
    let mut f = ast::function(
        "scale_up",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Mul, ast::var("x", Type::Rational), ast::int(3)),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut g = ast::function(
        "shift",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Add, ast::var("x", Type::Rational), ast::int(1)),
    );
    g.tag = ReversibilityTag::Reversible;
    let mut h = ast::function(
        "round_down",
        vec![ast::param("x", Type::Rational)],
        Type::Int,
        ast::call("floor", vec![ast::var("x", Type::Rational)], Type::Int),
    );
    h.tag = ReversibilityTag::Lossy;
    let mut program = Program::new();
    program.functions = vec![f, g, h];

    let models: Vec<FunctionSymbolicModel> = ["scale_up", "shift", "round_down"]
        .iter()
        .map(|n| model_of(&program, n))
        .collect();
    let legs: Vec<&FunctionSymbolicModel> = models.iter().collect();
    let records = RecordTable::from_program(&program);

    let failure = invert_composition("pipeline", &legs, &records, |model| {
        Box::new(LinearDisjointness::for_model(model, VerifyLimits::default()))
    })
    .expect_err("lossy leg must fail the composition");
    assert_eq!(failure.leg, "round_down");
    assert_eq!(failure.reason, NonInvertibleReason::TaggedLossy);
}

#[test]
fn composition_inverse_applies_legs_in_reverse_order() {
    // f: x * 3, g: x + 1; (f >> g)^-1 = g^-1 >> f^-1.
    let mut f = ast::function(
        "triple",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Mul, ast::var("x", Type::Rational), ast::int(3)),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut g = ast::function(
        "increment",
        vec![ast::param("x", Type::Rational)],
        Type::Rational,
        ast::binary(BinOp::Add, ast::var("x", Type::Rational), ast::int(1)),
    );
    g.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f, g];

    let triple = model_of(&program, "triple");
    let increment = model_of(&program, "increment");
    let legs = vec![&triple, &increment];
    let records = RecordTable::from_program(&program);

    let composite = invert_composition("pipe", &legs, &records, |model| {
        Box::new(LinearDisjointness::for_model(model, VerifyLimits::default()))
    })
    .expect("both legs invert");
    assert_eq!(composite.legs.len(), 2);
    assert_eq!(composite.legs[0].function, "increment");
    assert_eq!(composite.legs[1].function, "triple");

    // Forward: 5 * 3 + 1 = 16. Inverse chain: (16 - 1) / 3 = 5.
    let mut value = Value::int(16);
    for leg in &composite.legs {
        value = eval(&leg.arena, leg.body, &bindings(&[("result", value)])).unwrap();
    }
    assert_eq!(value, Value::int(5));
}

#[test]
fn opaque_nodes_fail_inversion_with_their_reason() {
    let mut f = ast::function(
        "through_loop",
        vec![ast::param("x", Type::Int)],
        Type::Int,
        ast::binary(
            BinOp::Add,
            ast::var("x", Type::Int),
            strata_ast::TypedExpr {
                span: ast::zspan(),
                ty: Type::Int,
                kind: strata_ast::TypedExprKind::UnboundedLoop,
            },
        ),
    );
    f.tag = ReversibilityTag::Reversible;
    let mut program = Program::new();
    program.functions = vec![f];

    match invert_model(&program, "through_loop") {
        InversionResult::NotInvertible { reason, .. } => {
            assert!(matches!(reason, NonInvertibleReason::Opaque(_)))
        }
        other => panic!("expected opaque failure, got {other:?}"),
    }
}
