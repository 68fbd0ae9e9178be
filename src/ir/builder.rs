//! Lowers the validated syntax tree into the flat IR.
//!
//! Control flow is shaped here: `if`/`while` become comparison, jump and
//! label statements with one module-wide construct number each, and
//! every assignment is classified into the allocate / store-arith /
//! store-call statement forms by the shape of its sides. All remaining
//! context (register maps, constant state) is threaded explicitly by the
//! later stages; the IR itself holds no back references.

use std::collections::BTreeMap;

use tracing::{debug, enabled, trace, Level};

use super::ast;
use super::ir::*;
use crate::BackendError;

/// Lowers `module` into backend IR.
pub fn build(module: &ast::Module) -> Result<Module, BackendError> {
    let mut shared = Shared {
        label_count: 0,
        global_kinds: BTreeMap::new(),
    };

    let mut globals = Vec::new();
    let mut methods: Vec<Method> = Vec::new();

    for item in &module.items {
        match item {
            ast::Item::Declaration(decl) => {
                globals.push(shared.lower_declaration(decl)?);
            }
            ast::Item::Function(f) => {
                if methods.iter().any(|m| m.name == f.name) {
                    return Err(BackendError::Structural(format!(
                        "duplicate method `{}`",
                        f.name
                    )));
                }
                let method = FnLower::new(&mut shared, f)?.lower(f)?;
                methods.push(method);
            }
        }
    }

    let module = Module {
        name: module.name.clone(),
        globals,
        methods,
    };
    debug!(
        module = %module.name,
        globals = module.globals.len(),
        methods = module.methods.len(),
        "ir lowered"
    );
    if enabled!(Level::TRACE) {
        for line in module.to_lines() {
            trace!("{line}");
        }
    }
    Ok(module)
}

/// State shared across the whole module while lowering.
struct Shared {
    label_count: usize,
    global_kinds: BTreeMap<String, VarKind>,
}

impl Shared {
    /// Construct numbers are module-wide and start at 1.
    fn next_label_number(&mut self) -> usize {
        self.label_count += 1;
        self.label_count
    }

    fn lower_declaration(&mut self, decl: &ast::Declaration) -> Result<Global, BackendError> {
        let existing = self.global_kinds.get(&decl.name).copied();

        let global = match &decl.init {
            Some(ast::DeclInit::Size(size)) => Global {
                name: decl.name.clone(),
                kind: VarKind::Array,
                init: GlobalInit::Size(size_operand(size)),
            },
            Some(ast::DeclInit::Literal(v)) => {
                if existing == Some(VarKind::Array) || decl.array_marker {
                    // Broadcast into an array declared earlier.
                    if existing != Some(VarKind::Array) {
                        return Err(BackendError::Structural(format!(
                            "whole-array assignment to undeclared global `{}`",
                            decl.name
                        )));
                    }
                    Global {
                        name: decl.name.clone(),
                        kind: VarKind::Array,
                        init: GlobalInit::Fill(Operand::Const(*v)),
                    }
                } else {
                    Global {
                        name: decl.name.clone(),
                        kind: VarKind::Integer,
                        init: GlobalInit::Literal(*v),
                    }
                }
            }
            None => {
                if decl.array_marker {
                    // A declared-but-unsized array is an array of length 0.
                    Global {
                        name: decl.name.clone(),
                        kind: VarKind::Array,
                        init: GlobalInit::Size(Operand::Const(0)),
                    }
                } else {
                    Global {
                        name: decl.name.clone(),
                        kind: VarKind::Integer,
                        init: GlobalInit::Uninitialized,
                    }
                }
            }
        };

        if !matches!(global.init, GlobalInit::Fill(_)) {
            self.global_kinds.insert(global.name.clone(), global.kind);
        }
        Ok(global)
    }
}

fn size_operand(size: &ast::SizeExpr) -> Operand {
    match size {
        ast::SizeExpr::Literal(v) => Operand::Const(*v),
        ast::SizeExpr::Var(name) => Operand::Load(VarRef::scalar(name.clone())),
    }
}

/// Per-function lowering state.
struct FnLower<'a> {
    shared: &'a mut Shared,
    params: Vec<NamedParam>,
    locals: BTreeMap<String, VarKind>,
    body: Vec<Stmt>,
}

impl<'a> FnLower<'a> {
    fn new(shared: &'a mut Shared, f: &ast::Function) -> Result<Self, BackendError> {
        if f.name == "main" && !f.params.is_empty() {
            return Err(BackendError::Structural(
                "`main` takes no declared parameters".into(),
            ));
        }
        let params = f
            .params
            .iter()
            .map(|p| NamedParam {
                name: p.name.clone(),
                kind: p.kind,
            })
            .collect();
        Ok(FnLower {
            shared,
            params,
            locals: BTreeMap::new(),
            body: Vec::new(),
        })
    }

    fn lower(mut self, f: &ast::Function) -> Result<Method, BackendError> {
        for stmt in &f.body {
            self.lower_stmt(stmt)?;
        }
        self.body.push(Stmt::Return);

        let (ret, return_var) = match &f.ret {
            None => (ReturnKind::Void, None),
            Some(r) => {
                let kind = match r.kind {
                    VarKind::Integer => ReturnKind::Integer,
                    VarKind::Array => ReturnKind::Array,
                };
                (kind, Some(r.name.clone()))
            }
        };

        Ok(Method {
            name: f.name.clone(),
            params: self.params,
            ret,
            return_var,
            locals: self.locals,
            body: self.body,
        })
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt) -> Result<(), BackendError> {
        match stmt {
            ast::Stmt::Assign { lhs, rhs } => self.lower_assign(lhs, rhs),
            ast::Stmt::Call(call) => {
                let call = self.lower_call(call, None);
                self.body.push(Stmt::Call(call));
                Ok(())
            }
            ast::Stmt::If {
                test,
                then_body,
                else_body,
            } => self.lower_if(test, then_body, else_body.as_deref()),
            ast::Stmt::While { test, body } => self.lower_while(test, body),
        }
    }

    // ── Assignments ──────────────────────────────────────────────────────

    fn lower_assign(&mut self, lhs: &ast::Access, rhs: &ast::Rhs) -> Result<(), BackendError> {
        match rhs {
            ast::Rhs::ArraySize(size) => {
                // `x = [n]`: x becomes (or already is) an array.
                self.record_local(&lhs.name, VarKind::Array, true);
                self.body.push(Stmt::Allocate {
                    target: Target::NewArray(lhs.name.clone()),
                    value: size_operand(size),
                });
                Ok(())
            }
            ast::Rhs::Arith { op, lhs: a, rhs: b } => {
                let target = self.store_target(lhs)?;
                let lhs_op = self.term_operand(a);
                let rhs_op = self.term_operand(b);
                self.body.push(Stmt::StoreArith {
                    target,
                    op: *op,
                    lhs: lhs_op,
                    rhs: rhs_op,
                });
                Ok(())
            }
            ast::Rhs::Term(ast::Term::Call(call)) => {
                let hint = if lhs.index.is_some() {
                    VarKind::Integer
                } else {
                    lhs.kind
                };
                let call = self.lower_call(call, Some(hint));
                let target = self.store_target(lhs)?;
                self.body.push(Stmt::StoreCall { target, call });
                Ok(())
            }
            ast::Rhs::Term(term) => {
                if lhs.kind == VarKind::Array && lhs.index.is_none() && !lhs.size_access {
                    // Whole-array broadcast.
                    if self.known_kind(&lhs.name) != Some(VarKind::Array) {
                        return Err(BackendError::Structural(format!(
                            "whole-array store to undeclared `{}`",
                            lhs.name
                        )));
                    }
                    let value = self.term_operand(term);
                    self.body.push(Stmt::Allocate {
                        target: Target::Fill(lhs.name.clone()),
                        value,
                    });
                    return Ok(());
                }
                let value = self.term_operand(term);
                let target = self.store_target(lhs)?;
                self.body.push(Stmt::Allocate { target, value });
                Ok(())
            }
        }
    }

    /// Scalar or element target for a plain store; fills and allocations
    /// are classified by the caller.
    fn store_target(&mut self, lhs: &ast::Access) -> Result<Target, BackendError> {
        match &lhs.index {
            Some(index) => {
                if self.known_kind(&lhs.name) != Some(VarKind::Array) {
                    return Err(BackendError::Structural(format!(
                        "element store to non-array `{}`",
                        lhs.name
                    )));
                }
                Ok(Target::Element {
                    array: lhs.name.clone(),
                    index: self.index_operand(index),
                })
            }
            None => {
                if lhs.kind == VarKind::Array && !lhs.size_access {
                    // Array-reference assignment (for example a call result).
                    self.record_local(&lhs.name, VarKind::Array, false);
                } else {
                    self.record_local(&lhs.name, VarKind::Integer, false);
                }
                Ok(Target::Scalar(lhs.name.clone()))
            }
        }
    }

    /// Materializes the implicit local declaration the first time a bare
    /// name is stored to. `overwrite` reclassifies the name (array
    /// allocation over a previous scalar use).
    fn record_local(&mut self, name: &str, kind: VarKind, overwrite: bool) {
        if self.shared.global_kinds.contains_key(name) {
            return;
        }
        if self.params.iter().any(|p| p.name == name) {
            return;
        }
        if overwrite {
            self.locals.insert(name.to_string(), kind);
        } else {
            self.locals.entry(name.to_string()).or_insert(kind);
        }
    }

    fn known_kind(&self, name: &str) -> Option<VarKind> {
        self.locals
            .get(name)
            .copied()
            .or_else(|| self.params.iter().find(|p| p.name == name).map(|p| p.kind))
            .or_else(|| self.shared.global_kinds.get(name).copied())
    }

    // ── Operands ─────────────────────────────────────────────────────────

    fn index_operand(&mut self, index: &ast::Index) -> Operand {
        match index {
            ast::Index::Literal(v) => Operand::Const(*v),
            ast::Index::Var(name) => Operand::Load(VarRef::scalar(name.clone())),
        }
    }

    fn access_operand(&mut self, access: &ast::Access) -> Operand {
        let index = access
            .index
            .as_ref()
            .map(|i| Box::new(self.index_operand(i)));
        Operand::Load(VarRef {
            name: access.name.clone(),
            kind: access.kind,
            size_access: access.size_access,
            index,
        })
    }

    fn term_operand(&mut self, term: &ast::Term) -> Operand {
        match term {
            ast::Term::Literal(v) => Operand::Const(*v),
            ast::Term::Access(access) => self.access_operand(access),
            ast::Term::Call(call) => {
                let call = self.lower_call(call, Some(VarKind::Integer));
                Operand::Call(Box::new(call))
            }
        }
    }

    fn lower_call(&mut self, call: &ast::Call, result_hint: Option<VarKind>) -> CallExpr {
        let args = call
            .args
            .iter()
            .map(|arg| match arg {
                ast::CallArg::Literal(v) => CallArg::Literal(*v),
                ast::CallArg::Str(s) => CallArg::Str(s.clone()),
                ast::CallArg::Var(name) => CallArg::Var(name.clone()),
            })
            .collect();
        CallExpr {
            module: call.module.clone(),
            method: call.method.clone(),
            args,
            result_hint,
        }
    }

    // ── Control flow ─────────────────────────────────────────────────────

    fn lower_test(
        &mut self,
        test: &ast::Test,
        cond: Cond,
        target: Label,
    ) -> Result<(), BackendError> {
        let lhs = self.access_operand(&test.lhs);
        let rhs = match &test.rhs {
            ast::Rhs::Term(term) => self.term_operand(term),
            ast::Rhs::Arith { op, lhs: a, rhs: b } => {
                let a = self.term_operand(a);
                let b = self.term_operand(b);
                Operand::arith(*op, a, b)
            }
            ast::Rhs::ArraySize(_) => {
                return Err(BackendError::Structural(
                    "array-size expression in a condition".into(),
                ))
            }
        };
        self.body.push(Stmt::Comparison {
            cond,
            lhs,
            rhs,
            target,
        });
        Ok(())
    }

    fn lower_if(
        &mut self,
        test: &ast::Test,
        then_body: &[ast::Stmt],
        else_body: Option<&[ast::Stmt]>,
    ) -> Result<(), BackendError> {
        let number = self.shared.next_label_number();
        let if_end = Label::new(LabelKind::IfEnd, number);
        let if_false = Label::new(LabelKind::IfFalse, number);

        // The inverted test skips the true body.
        let skip_to = if else_body.is_some() { if_false } else { if_end };
        self.lower_test(test, test.cond.invert(), skip_to)?;

        for stmt in then_body {
            self.lower_stmt(stmt)?;
        }

        if let Some(else_stmts) = else_body {
            self.body.push(Stmt::Jump(if_end));
            self.body.push(Stmt::Label(if_false));
            for stmt in else_stmts {
                self.lower_stmt(stmt)?;
            }
        }

        self.body.push(Stmt::Label(if_end));
        Ok(())
    }

    fn lower_while(&mut self, test: &ast::Test, body: &[ast::Stmt]) -> Result<(), BackendError> {
        let number = self.shared.next_label_number();
        let init = Label::new(LabelKind::WhileInit, number);
        let end = Label::new(LabelKind::WhileEnd, number);

        // Entry test falls through into the body; the test repeats at the
        // bottom so the body needs no leading jump.
        self.lower_test(test, test.cond.invert(), end)?;
        self.body.push(Stmt::Label(init));

        for stmt in body {
            self.lower_stmt(stmt)?;
        }

        self.lower_test(test, test.cond, init)?;
        self.body.push(Stmt::Label(end));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_module(body: Vec<ast::Stmt>) -> ast::Module {
        ast::Module {
            name: "T".to_string(),
            items: vec![ast::Item::Function(ast::Function {
                name: "main".to_string(),
                params: vec![],
                ret: None,
                body,
            })],
        }
    }

    fn assign_lit(name: &str, v: i32) -> ast::Stmt {
        ast::Stmt::Assign {
            lhs: ast::Access::scalar(name),
            rhs: ast::Rhs::Term(ast::Term::Literal(v)),
        }
    }

    #[test]
    fn while_template_shape() {
        let module = build(&main_module(vec![ast::Stmt::While {
            test: ast::Test {
                cond: Cond::Lt,
                lhs: ast::Access::scalar("i"),
                rhs: ast::Rhs::Term(ast::Term::Literal(3)),
            },
            body: vec![assign_lit("x", 1)],
        }]))
        .unwrap();

        let init = Label::new(LabelKind::WhileInit, 1);
        let end = Label::new(LabelKind::WhileEnd, 1);
        let body = &module.methods[0].body;
        assert!(matches!(
            body[0],
            Stmt::Comparison { cond: Cond::Gte, target, .. } if target == end
        ));
        assert_eq!(body[1], Stmt::Label(init));
        assert!(matches!(
            body[3],
            Stmt::Comparison { cond: Cond::Lt, target, .. } if target == init
        ));
        assert_eq!(body[4], Stmt::Label(end));
        assert_eq!(body[5], Stmt::Return);
    }

    #[test]
    fn if_else_template_shape() {
        let module = build(&main_module(vec![ast::Stmt::If {
            test: ast::Test {
                cond: Cond::Eq,
                lhs: ast::Access::scalar("g"),
                rhs: ast::Rhs::Term(ast::Term::Literal(0)),
            },
            then_body: vec![assign_lit("x", 1)],
            else_body: Some(vec![assign_lit("x", 2)]),
        }]))
        .unwrap();

        let if_false = Label::new(LabelKind::IfFalse, 1);
        let if_end = Label::new(LabelKind::IfEnd, 1);
        let body = &module.methods[0].body;
        assert!(matches!(
            body[0],
            Stmt::Comparison { cond: Cond::Neq, target, .. } if target == if_false
        ));
        assert_eq!(body[2], Stmt::Jump(if_end));
        assert_eq!(body[3], Stmt::Label(if_false));
        assert_eq!(body[5], Stmt::Label(if_end));
    }

    #[test]
    fn assignments_are_classified_by_shape() {
        let module = build(&main_module(vec![
            ast::Stmt::Assign {
                lhs: ast::Access::array("a"),
                rhs: ast::Rhs::ArraySize(ast::SizeExpr::Literal(3)),
            },
            ast::Stmt::Assign {
                lhs: ast::Access::array("a"),
                rhs: ast::Rhs::Term(ast::Term::Literal(7)),
            },
            ast::Stmt::Assign {
                lhs: ast::Access::element("a", ast::Index::Literal(0)),
                rhs: ast::Rhs::Term(ast::Term::Literal(1)),
            },
            ast::Stmt::Assign {
                lhs: ast::Access::scalar("x"),
                rhs: ast::Rhs::Arith {
                    op: ArithOp::Add,
                    lhs: ast::Term::Literal(1),
                    rhs: ast::Term::Literal(2),
                },
            },
        ]))
        .unwrap();

        let body = &module.methods[0].body;
        assert!(matches!(
            body[0],
            Stmt::Allocate { target: Target::NewArray(_), .. }
        ));
        assert!(matches!(
            body[1],
            Stmt::Allocate { target: Target::Fill(_), .. }
        ));
        assert!(matches!(
            body[2],
            Stmt::Allocate { target: Target::Element { .. }, .. }
        ));
        assert!(matches!(body[3], Stmt::StoreArith { .. }));
    }

    #[test]
    fn locals_keep_their_first_recorded_kind() {
        let module = build(&main_module(vec![
            assign_lit("x", 1),
            ast::Stmt::Assign {
                lhs: ast::Access::array("a"),
                rhs: ast::Rhs::ArraySize(ast::SizeExpr::Var("x".to_string())),
            },
        ]))
        .unwrap();
        let locals = &module.methods[0].locals;
        assert_eq!(locals.get("x"), Some(&VarKind::Integer));
        assert_eq!(locals.get("a"), Some(&VarKind::Array));
    }
}
