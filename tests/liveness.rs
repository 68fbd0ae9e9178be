use yal_jvm::backend::liveness::MAIN_ARGS;
use yal_jvm::backend::InterferenceGraph;
use yal_jvm::ir::ast::*;
use yal_jvm::ir::{ArithOp, Cond, VarKind};
use yal_jvm::{analyze_liveness, build_ir};

fn analyze(items: Vec<Item>) -> std::collections::BTreeMap<String, InterferenceGraph> {
    let module = Module {
        name: "Test".to_string(),
        items,
    };
    let ir = build_ir(&module).expect("lowering succeeds");
    analyze_liveness(&ir).expect("analysis succeeds")
}

fn assign(lhs: Access, rhs: Rhs) -> Stmt {
    Stmt::Assign { lhs, rhs }
}

#[test]
fn parameters_carry_their_declaration_positions() {
    let f = Item::Function(Function {
        name: "f".to_string(),
        params: vec![
            Param {
                name: "a".to_string(),
                kind: VarKind::Integer,
            },
            Param {
                name: "b".to_string(),
                kind: VarKind::Array,
            },
        ],
        ret: Some(RetVar {
            name: "r".to_string(),
            kind: VarKind::Integer,
        }),
        body: vec![assign(
            Access::scalar("r"),
            Rhs::Term(Term::Access(Access::scalar("a"))),
        )],
    });
    let graphs = analyze(vec![f]);
    let g = &graphs["f"];
    assert_eq!(g.node("a").and_then(|n| n.required), Some(0));
    assert_eq!(g.node("b").and_then(|n| n.required), Some(1));
    assert_eq!(g.node("r").and_then(|n| n.required), None);
}

#[test]
fn main_reserves_register_zero_for_the_argument_vector() {
    let main = Item::Function(Function {
        name: "main".to_string(),
        params: vec![],
        ret: None,
        body: vec![assign(Access::scalar("x"), Rhs::Term(Term::Literal(1)))],
    });
    let graphs = analyze(vec![main]);
    let g = &graphs["main"];
    let args = g.node(MAIN_ARGS).expect("synthetic argument node exists");
    assert_eq!(args.required, Some(0));
    assert!(g.node("x").is_some());
}

#[test]
fn loop_locals_interfere_across_the_back_edge() {
    // s = 0; i = 0; while (i < 10) { s = s + i; i = i + 1; }
    let body = vec![
        assign(Access::scalar("s"), Rhs::Term(Term::Literal(0))),
        assign(Access::scalar("i"), Rhs::Term(Term::Literal(0))),
        Stmt::While {
            test: Test {
                cond: Cond::Lt,
                lhs: Access::scalar("i"),
                rhs: Rhs::Term(Term::Literal(10)),
            },
            body: vec![
                assign(
                    Access::scalar("s"),
                    Rhs::Arith {
                        op: ArithOp::Add,
                        lhs: Term::Access(Access::scalar("s")),
                        rhs: Term::Access(Access::scalar("i")),
                    },
                ),
                assign(
                    Access::scalar("i"),
                    Rhs::Arith {
                        op: ArithOp::Add,
                        lhs: Term::Access(Access::scalar("i")),
                        rhs: Term::Literal(1),
                    },
                ),
            ],
        },
    ];
    let main = Item::Function(Function {
        name: "main".to_string(),
        params: vec![],
        ret: None,
        body,
    });
    let graphs = analyze(vec![main]);
    assert!(graphs["main"].interferes("i", "s"));
}

#[test]
fn dead_values_do_not_interfere() {
    // a's value is dead before b exists.
    let body = vec![
        assign(Access::scalar("a"), Rhs::Term(Term::Literal(1))),
        assign(
            Access::scalar("x"),
            Rhs::Term(Term::Access(Access::scalar("a"))),
        ),
        assign(Access::scalar("b"), Rhs::Term(Term::Literal(2))),
        assign(
            Access::scalar("y"),
            Rhs::Term(Term::Access(Access::scalar("b"))),
        ),
    ];
    let main = Item::Function(Function {
        name: "main".to_string(),
        params: vec![],
        ret: None,
        body,
    });
    let graphs = analyze(vec![main]);
    assert!(!graphs["main"].interferes("a", "b"));
}

#[test]
fn globals_never_enter_the_graph() {
    let items = vec![
        Item::Declaration(Declaration {
            name: "g".to_string(),
            array_marker: false,
            init: Some(DeclInit::Literal(1)),
        }),
        Item::Function(Function {
            name: "main".to_string(),
            params: vec![],
            ret: None,
            body: vec![assign(
                Access::scalar("x"),
                Rhs::Term(Term::Access(Access::scalar("g"))),
            )],
        }),
    ];
    let graphs = analyze(items);
    assert!(graphs["main"].node("g").is_none());
    assert!(graphs["main"].node("x").is_some());
}

#[test]
fn analysis_is_deterministic() {
    let body = vec![
        assign(Access::scalar("a"), Rhs::Term(Term::Literal(1))),
        assign(Access::scalar("b"), Rhs::Term(Term::Literal(2))),
        assign(
            Access::scalar("c"),
            Rhs::Arith {
                op: ArithOp::Add,
                lhs: Term::Access(Access::scalar("a")),
                rhs: Term::Access(Access::scalar("b")),
            },
        ),
    ];
    let mk = || {
        vec![Item::Function(Function {
            name: "main".to_string(),
            params: vec![],
            ret: None,
            body: body.clone(),
        })]
    };
    assert_eq!(analyze(mk()), analyze(mk()));
}
