//! Typed Jasmin instruction set.
//!
//! Codegen builds `Vec<Instr>` and renders text at the end; keeping the
//! instructions typed lets the stack-depth simulation read exact deltas
//! instead of re-parsing mnemonics.

use std::fmt;

use crate::ir::{ArithOp, Cond};

/// JVM-level kinds appearing in method descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JvmKind {
    Int,
    IntArray,
    Str,
    StrArray,
    Void,
}

impl JvmKind {
    pub fn descriptor(self) -> &'static str {
        match self {
            JvmKind::Int => "I",
            JvmKind::IntArray => "[I",
            JvmKind::Str => "Ljava/lang/String;",
            JvmKind::StrArray => "[Ljava/lang/String;",
            JvmKind::Void => "V",
        }
    }
}

/// A resolved `invokestatic` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub owner: String,
    pub method: String,
    pub args: Vec<JvmKind>,
    pub ret: JvmKind,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}(", self.owner, self.method)?;
        for arg in &self.args {
            write!(f, "{}", arg.descriptor())?;
        }
        write!(f, "){}", self.ret.descriptor())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// `iconst_m1` / `iconst_<n>`; only valid for -1..=5.
    Iconst(i32),
    Bipush(i32),
    Sipush(i32),
    Ldc(i32),
    LdcStr(String),
    AconstNull,
    Iload(usize),
    Istore(usize),
    Aload(usize),
    Astore(usize),
    Iinc { register: usize, delta: i32 },
    Getstatic { field: String, descriptor: &'static str },
    Putstatic { field: String, descriptor: &'static str },
    Newarray,
    Arraylength,
    Iaload,
    Iastore,
    Op(ArithOp),
    Dup,
    Swap,
    Pop,
    /// One-operand comparison against zero: `if<cc>`.
    If { cond: Cond, target: String },
    IfIcmp { cond: Cond, target: String },
    IfAcmp { cond: Cond, target: String },
    Goto(String),
    Label(String),
    Invoke(CallSite),
    Ireturn,
    Areturn,
    Return,
}

impl Instr {
    /// The tightest literal-load form for `value`.
    pub fn load_constant(value: i32) -> Instr {
        if (-1..=5).contains(&value) {
            Instr::Iconst(value)
        } else if (-128..=127).contains(&value) {
            Instr::Bipush(value)
        } else if (-32768..=32767).contains(&value) {
            Instr::Sipush(value)
        } else {
            Instr::Ldc(value)
        }
    }

    /// Net operand-stack effect. Branches count their pops; labels,
    /// jumps and returns are neutral for the running maximum.
    pub fn stack_delta(&self) -> i32 {
        match self {
            Instr::Iconst(_)
            | Instr::Bipush(_)
            | Instr::Sipush(_)
            | Instr::Ldc(_)
            | Instr::LdcStr(_)
            | Instr::AconstNull
            | Instr::Iload(_)
            | Instr::Aload(_)
            | Instr::Getstatic { .. }
            | Instr::Dup => 1,
            Instr::Istore(_)
            | Instr::Astore(_)
            | Instr::Putstatic { .. }
            | Instr::Pop
            | Instr::Iaload
            | Instr::Op(_)
            | Instr::If { .. } => -1,
            Instr::IfIcmp { .. } | Instr::IfAcmp { .. } => -2,
            Instr::Iastore => -3,
            Instr::Invoke(call) => {
                let ret = if call.ret == JvmKind::Void { 0 } else { 1 };
                ret - call.args.len() as i32
            }
            Instr::Newarray
            | Instr::Arraylength
            | Instr::Iinc { .. }
            | Instr::Swap
            | Instr::Goto(_)
            | Instr::Label(_)
            | Instr::Ireturn
            | Instr::Areturn
            | Instr::Return => 0,
        }
    }
}

/// Running maximum stack depth of a straight-line rendering; the
/// `.limit stack` value.
pub fn max_stack(instrs: &[Instr]) -> i32 {
    let mut depth = 0;
    let mut max = 0;
    for instr in instrs {
        depth += instr.stack_delta();
        if depth > max {
            max = depth;
        }
    }
    max
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Iconst(-1) => write!(f, "iconst_m1"),
            Instr::Iconst(v) => write!(f, "iconst_{v}"),
            Instr::Bipush(v) => write!(f, "bipush {v}"),
            Instr::Sipush(v) => write!(f, "sipush {v}"),
            Instr::Ldc(v) => write!(f, "ldc {v}"),
            Instr::LdcStr(s) => write!(f, "ldc \"{s}\""),
            Instr::AconstNull => write!(f, "aconst_null"),
            Instr::Iload(r) => slot_form(f, "iload", *r),
            Instr::Istore(r) => slot_form(f, "istore", *r),
            Instr::Aload(r) => slot_form(f, "aload", *r),
            Instr::Astore(r) => slot_form(f, "astore", *r),
            Instr::Iinc { register, delta } => write!(f, "iinc {register} {delta}"),
            Instr::Getstatic { field, descriptor } => {
                write!(f, "getstatic {field} {descriptor}")
            }
            Instr::Putstatic { field, descriptor } => {
                write!(f, "putstatic {field} {descriptor}")
            }
            Instr::Newarray => write!(f, "newarray int"),
            Instr::Arraylength => write!(f, "arraylength"),
            Instr::Iaload => write!(f, "iaload"),
            Instr::Iastore => write!(f, "iastore"),
            Instr::Op(op) => write!(f, "{}", op.opcode()),
            Instr::Dup => write!(f, "dup"),
            Instr::Swap => write!(f, "swap"),
            Instr::Pop => write!(f, "pop"),
            Instr::If { cond, target } => write!(f, "if{} {target}", cond.mnemonic()),
            Instr::IfIcmp { cond, target } => {
                write!(f, "if_icmp{} {target}", cond.mnemonic())
            }
            Instr::IfAcmp { cond, target } => {
                write!(f, "if_acmp{} {target}", cond.mnemonic())
            }
            Instr::Goto(target) => write!(f, "goto {target}"),
            Instr::Label(name) => write!(f, "{name}:"),
            Instr::Invoke(call) => write!(f, "invokestatic {call}"),
            Instr::Ireturn => write!(f, "ireturn"),
            Instr::Areturn => write!(f, "areturn"),
            Instr::Return => write!(f, "return"),
        }
    }
}

/// Registers 0-3 have dedicated one-byte forms.
fn slot_form(f: &mut fmt::Formatter<'_>, mnemonic: &str, register: usize) -> fmt::Result {
    if register < 4 {
        write!(f, "{mnemonic}_{register}")
    } else {
        write!(f, "{mnemonic} {register}")
    }
}
