//! Validated syntax tree accepted by the backend.
//!
//! This is the input contract: every variable reference is already
//! resolved to a kind, conditions are structurally well-formed, and the
//! usual front-end checks (undefined names, kind mismatches, argument
//! counts) have passed. The backend trusts these properties and treats
//! violations it can still observe as structural errors.

use super::ir::{ArithOp, Cond, VarKind};

/// Array subscript as the grammar allows it: a literal or a bare name.
#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Literal(i32),
    Var(String),
}

/// A resolved variable access.
#[derive(Debug, Clone, PartialEq)]
pub struct Access {
    pub name: String,
    pub kind: VarKind,
    pub size_access: bool,
    pub index: Option<Index>,
}

impl Access {
    pub fn scalar(name: impl Into<String>) -> Self {
        Access {
            name: name.into(),
            kind: VarKind::Integer,
            size_access: false,
            index: None,
        }
    }

    pub fn array(name: impl Into<String>) -> Self {
        Access {
            name: name.into(),
            kind: VarKind::Array,
            size_access: false,
            index: None,
        }
    }

    pub fn element(name: impl Into<String>, index: Index) -> Self {
        Access {
            name: name.into(),
            kind: VarKind::Array,
            size_access: false,
            index: Some(index),
        }
    }

    pub fn size_of(name: impl Into<String>) -> Self {
        Access {
            name: name.into(),
            kind: VarKind::Array,
            size_access: true,
            index: None,
        }
    }
}

/// Call argument: the grammar restricts these to literals, string
/// literals and bare names.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Literal(i32),
    Str(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Qualifying module, absent for same-module calls.
    pub module: Option<String>,
    pub method: String,
    pub args: Vec<CallArg>,
}

/// One term of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Literal(i32),
    Access(Access),
    Call(Call),
}

/// A size expression, `[n]` or `[x]`.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeExpr {
    Literal(i32),
    Var(String),
}

/// Right-hand side of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Rhs {
    Term(Term),
    Arith { op: ArithOp, lhs: Term, rhs: Term },
    ArraySize(SizeExpr),
}

/// A condition: access compared against an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub cond: Cond,
    pub lhs: Access,
    pub rhs: Rhs,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        lhs: Access,
        rhs: Rhs,
    },
    Call(Call),
    If {
        test: Test,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        test: Test,
        body: Vec<Stmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: VarKind,
}

/// The declared return variable of a function, when it has one.
#[derive(Debug, Clone, PartialEq)]
pub struct RetVar {
    pub name: String,
    pub kind: VarKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<RetVar>,
    pub body: Vec<Stmt>,
}

/// Module-level declaration. `array_marker` is the `name[]` form.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub array_marker: bool,
    pub init: Option<DeclInit>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclInit {
    Literal(i32),
    Size(SizeExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Declaration(Declaration),
    Function(Function),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub items: Vec<Item>,
}
