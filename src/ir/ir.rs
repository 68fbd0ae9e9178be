//! Tree-shaped IR for one module: a closed set of statement and operand
//! nodes, flat method bodies with explicit labels and jumps.

use std::collections::BTreeMap;
use std::fmt;

// ── Scalar building blocks ───────────────────────────────────────────────

/// Kind of a variable slot: a 32-bit integer or an int array reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Integer,
    Array,
}

/// What a method hands back to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Integer,
    Array,
}

/// Binary integer operators, matching the JVM's int instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Shr,
    Shl,
    Ushr,
    And,
    Or,
    Xor,
}

impl ArithOp {
    pub fn opcode(self) -> &'static str {
        match self {
            ArithOp::Add => "iadd",
            ArithOp::Sub => "isub",
            ArithOp::Mul => "imul",
            ArithOp::Div => "idiv",
            ArithOp::Shr => "ishr",
            ArithOp::Shl => "ishl",
            ArithOp::Ushr => "iushr",
            ArithOp::And => "iand",
            ArithOp::Or => "ior",
            ArithOp::Xor => "ixor",
        }
    }

    /// Folds two known operands with JVM int semantics (wrapping, shift
    /// counts masked to 5 bits). Division that would trap at runtime is
    /// never folded.
    pub fn fold(self, a: i32, b: i32) -> Option<i32> {
        Some(match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Div => a.checked_div(b)?,
            ArithOp::Shr => a.wrapping_shr(b as u32),
            ArithOp::Shl => a.wrapping_shl(b as u32),
            ArithOp::Ushr => ((a as u32).wrapping_shr(b as u32)) as i32,
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
        })
    }
}

/// Comparison conditions. `invert` flips a test so the branch skips the
/// body when the source-level condition is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Cond {
    pub fn invert(self) -> Cond {
        match self {
            Cond::Eq => Cond::Neq,
            Cond::Neq => Cond::Eq,
            Cond::Lt => Cond::Gte,
            Cond::Lte => Cond::Gt,
            Cond::Gt => Cond::Lte,
            Cond::Gte => Cond::Lt,
        }
    }

    /// Suffix used by the `if<cc>` / `if_icmp<cc>` instruction families.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Neq => "ne",
            Cond::Lt => "lt",
            Cond::Lte => "le",
            Cond::Gt => "gt",
            Cond::Gte => "ge",
        }
    }
}

// ── Labels ───────────────────────────────────────────────────────────────

/// The four label roles emitted by the builder's control templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelKind {
    IfFalse,
    IfEnd,
    WhileInit,
    WhileEnd,
}

/// A structured label: role plus the module-wide construct number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub kind: LabelKind,
    pub number: usize,
}

impl Label {
    pub fn new(kind: LabelKind, number: usize) -> Self {
        Label { kind, number }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stem = match self.kind {
            LabelKind::IfFalse => "if_false",
            LabelKind::IfEnd => "if_end",
            LabelKind::WhileInit => "while_init",
            LabelKind::WhileEnd => "while_end",
        };
        write!(f, "{}{}", stem, self.number)
    }
}

// ── Operands ─────────────────────────────────────────────────────────────

/// A resolved variable reference: plain scalar, whole-array reference,
/// `.size` access, or an indexed element.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub kind: VarKind,
    pub size_access: bool,
    pub index: Option<Box<Operand>>,
}

impl VarRef {
    pub fn scalar(name: impl Into<String>) -> Self {
        VarRef {
            name: name.into(),
            kind: VarKind::Integer,
            size_access: false,
            index: None,
        }
    }

    /// True for a plain integer-valued name (no index, no `.size`).
    pub fn is_plain_scalar(&self) -> bool {
        self.kind == VarKind::Integer && self.index.is_none() && !self.size_access
    }

    /// True for a bare array reference (no index, no `.size`).
    pub fn is_whole_array(&self) -> bool {
        self.kind == VarKind::Array && self.index.is_none() && !self.size_access
    }
}

/// Value-producing expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Const(i32),
    Load(VarRef),
    Arith {
        op: ArithOp,
        lhs: Box<Operand>,
        rhs: Box<Operand>,
    },
    Call(Box<CallExpr>),
}

impl Operand {
    pub fn arith(op: ArithOp, lhs: Operand, rhs: Operand) -> Self {
        Operand::Arith {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}

// ── Calls ────────────────────────────────────────────────────────────────

/// A call argument; the grammar only allows literals, string literals
/// and bare names here.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Literal(i32),
    Str(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    /// Target module; `None` means the module being compiled.
    pub module: Option<String>,
    pub method: String,
    pub args: Vec<CallArg>,
    /// Kind of the destination variable, when the call's value is stored.
    /// Cross-module return descriptors are derived from this.
    pub result_hint: Option<VarKind>,
}

// ── Statements ───────────────────────────────────────────────────────────

/// Where a stored value lands.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// `x = v` with scalar `x` (register or global field).
    Scalar(String),
    /// `x[i] = v`.
    Element { array: String, index: Operand },
    /// `x = v` with array `x`: broadcast `v` into every element.
    Fill(String),
    /// `x = [n]`: allocate a fresh int array of length `n`.
    NewArray(String),
}

/// Top-level statement nodes. One dataflow line each in liveness.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Assignment of an immediate value (constant, load, fill, allocation).
    Allocate { target: Target, value: Operand },
    /// Assignment of a two-operand arithmetic result.
    StoreArith {
        target: Target,
        op: ArithOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Assignment of a call result.
    StoreCall { target: Target, call: CallExpr },
    /// Bare statement call; a non-void result is popped.
    Call(CallExpr),
    /// Conditional branch to `target`.
    Comparison {
        cond: Cond,
        lhs: Operand,
        rhs: Operand,
        target: Label,
    },
    Jump(Label),
    Label(Label),
    /// Method exit; the value comes from the method's return variable.
    Return,
}

// ── Module structure ─────────────────────────────────────────────────────

/// How a global field is initialized.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalInit {
    /// Declared scalar without a value; the field defaults to 0.
    Uninitialized,
    /// Scalar with a compile-time value, emitted on the field line.
    Literal(i32),
    /// Array allocated in the static initializer with a runtime size.
    Size(Operand),
    /// Broadcast into an already-declared array in the static
    /// initializer. Emits no field line of its own.
    Fill(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub kind: VarKind,
    pub init: GlobalInit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedParam {
    pub name: String,
    pub kind: VarKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub params: Vec<NamedParam>,
    pub ret: ReturnKind,
    /// Name of the variable whose final value the method returns.
    pub return_var: Option<String>,
    /// Kinds of method-local names, recorded as the builder first sees
    /// them stored to.
    pub locals: BTreeMap<String, VarKind>,
    pub body: Vec<Stmt>,
}

impl Method {
    pub fn is_main(&self) -> bool {
        self.name == "main"
    }

    pub fn param_kind(&self, name: &str) -> Option<VarKind> {
        self.params.iter().find(|p| p.name == name).map(|p| p.kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub methods: Vec<Method>,
}

impl Module {
    /// The declaring entry for a global name. Fill entries re-mention an
    /// existing array and are skipped.
    pub fn global(&self, name: &str) -> Option<&Global> {
        self.globals
            .iter()
            .find(|g| g.name == name && !matches!(g.init, GlobalInit::Fill(_)))
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Compact textual dump, used for tracing and debugging.
    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.push(format!("module {}", self.name));
        for g in &self.globals {
            out.push(format!("  global {} {:?} = {:?}", g.name, g.kind, g.init));
        }
        for m in &self.methods {
            let params: Vec<String> = m
                .params
                .iter()
                .map(|p| format!("{} {:?}", p.name, p.kind))
                .collect();
            out.push(format!(
                "  method {}({}) -> {:?}",
                m.name,
                params.join(", "),
                m.ret
            ));
            for s in &m.body {
                match s {
                    Stmt::Label(l) => out.push(format!("  {l}:")),
                    other => out.push(format!("    {other:?}")),
                }
            }
        }
        out
    }
}
