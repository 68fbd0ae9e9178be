//! Instruction selection: allocated IR to Jasmin text.
//!
//! Layout of this module:
//! - `consts`  — the constant-propagation table
//! - `Ctx`     — per-method (or static-initializer) generation context
//! - `generate` — module walk: header, fields, methods, `<clinit>`
//!
//! Emission is built as typed [`Instr`] sequences and rendered at the
//! end, with `.limit stack` taken from the running stack simulation.

pub mod consts;

use tracing::debug;

use consts::{element_key, ConstTable};

use super::instruction::{max_stack, CallSite, Instr, JvmKind};
use super::regalloc::{Allocation, MethodAllocation};
use crate::ir::{
    ArithOp, CallArg, CallExpr, Cond, GlobalInit, LabelKind, Method, Module, Operand,
    ReturnKind, Stmt, Target, VarKind, VarRef,
};
use crate::BackendError;

/// Emits the full Jasmin text for `module` as ordered lines.
pub fn generate(
    module: &Module,
    allocation: &Allocation,
    optimize: bool,
) -> Result<Vec<String>, BackendError> {
    debug!(module = %module.name, methods = module.methods.len(), optimize, "emitting jasmin");

    let mut lines = vec![
        format!(".class public static {}", module.name),
        ".super java/lang/Object".to_string(),
    ];

    // Globals: field lines now, allocation/fill code collected for <clinit>.
    let mut clinit: Vec<Instr> = Vec::new();
    let mut static_ctx = Ctx::for_clinit(module, optimize);
    for global in &module.globals {
        match &global.init {
            GlobalInit::Uninitialized => {
                lines.push(format!(".field public static {} I = 0", global.name));
            }
            GlobalInit::Literal(value) => {
                lines.push(format!(".field public static {} I = {value}", global.name));
            }
            GlobalInit::Size(size) => {
                lines.push(format!(".field public static {} [I", global.name));
                static_ctx.gen_operand(size, &mut clinit)?;
                clinit.push(Instr::Newarray);
                clinit.push(Instr::Putstatic {
                    field: static_ctx.field(&global.name),
                    descriptor: "[I",
                });
            }
            GlobalInit::Fill(value) => {
                // Re-mentions an array declared above; no field line.
                let arrayref = vec![Instr::Getstatic {
                    field: static_ctx.field(&global.name),
                    descriptor: "[I",
                }];
                let mut value_code = Vec::new();
                static_ctx.gen_operand(value, &mut value_code)?;
                emit_fill(&arrayref, &value_code, &mut clinit);
            }
        }
    }

    for method in &module.methods {
        let method_alloc = allocation.method(&method.name).ok_or_else(|| {
            BackendError::InternalInvariant(format!(
                "no allocation result for method `{}`",
                method.name
            ))
        })?;
        lines.push(String::new());
        gen_method(module, method, method_alloc, optimize, &mut lines)?;
    }

    if !clinit.is_empty() {
        lines.push(String::new());
        lines.push(".method public static <clinit>()V".to_string());
        lines.push(format!(".limit stack {}", max_stack(&clinit)));
        for instr in &clinit {
            lines.push(instr.to_string());
        }
        lines.push("return".to_string());
        lines.push(".end method".to_string());
    }

    Ok(lines)
}

fn gen_method(
    module: &Module,
    method: &Method,
    alloc: &MethodAllocation,
    optimize: bool,
    lines: &mut Vec<String>,
) -> Result<(), BackendError> {
    let mut ctx = Ctx {
        module,
        method: Some(method),
        registers: Some(alloc),
        consts: ConstTable::new(optimize),
        optimize,
    };

    let mut body = Vec::new();
    for stmt in &method.body {
        ctx.gen_stmt(stmt, &mut body)?;
        ctx.join_point(stmt);
    }

    lines.push(format!(
        ".method public static {}{}",
        method.name,
        method_descriptor(method)
    ));
    lines.push(format!(".limit locals {}", alloc.register_count));
    lines.push(format!(".limit stack {}", max_stack(&body)));
    for instr in &body {
        lines.push(instr.to_string());
    }
    lines.push(".end method".to_string());
    Ok(())
}

fn method_descriptor(method: &Method) -> String {
    if method.is_main() {
        return "([Ljava/lang/String;)V".to_string();
    }
    let mut d = String::from("(");
    for param in &method.params {
        d.push_str(match param.kind {
            VarKind::Integer => "I",
            VarKind::Array => "[I",
        });
    }
    d.push(')');
    d.push_str(match method.ret {
        ReturnKind::Void => "V",
        ReturnKind::Integer => "I",
        ReturnKind::Array => "[I",
    });
    d
}

/// The exact reverse-indexed broadcast loop. Indexing runs from
/// `length - 1` down to 0, with the next index kept on the stack.
fn emit_fill(arrayref: &[Instr], value: &[Instr], out: &mut Vec<Instr>) {
    out.extend_from_slice(arrayref);
    out.push(Instr::Arraylength);
    out.push(Instr::Label("init".to_string()));
    out.push(Instr::Iconst(1));
    out.push(Instr::Op(ArithOp::Sub));
    out.push(Instr::Dup);
    out.push(Instr::Dup);
    out.push(Instr::If {
        cond: Cond::Lt,
        target: "end".to_string(),
    });
    out.extend_from_slice(arrayref);
    out.push(Instr::Swap);
    out.extend_from_slice(value);
    out.push(Instr::Iastore);
    out.push(Instr::Goto("init".to_string()));
    out.push(Instr::Label("end".to_string()));
}

/// Where a name lives at runtime.
enum Storage {
    Register(usize),
    Global(VarKind),
}

/// Generation context: one per method body, plus one with no method for
/// the static initializer.
struct Ctx<'a> {
    module: &'a Module,
    method: Option<&'a Method>,
    registers: Option<&'a MethodAllocation>,
    consts: ConstTable,
    optimize: bool,
}

impl<'a> Ctx<'a> {
    fn for_clinit(module: &'a Module, optimize: bool) -> Self {
        Ctx {
            module,
            method: None,
            registers: None,
            consts: ConstTable::new(optimize),
            optimize,
        }
    }

    // ── Name resolution ──────────────────────────────────────────────────

    fn register(&self, name: &str) -> Option<usize> {
        self.registers
            .and_then(|alloc| alloc.registers.get(name).copied())
    }

    fn storage(&self, name: &str) -> Result<Storage, BackendError> {
        if let Some(register) = self.register(name) {
            return Ok(Storage::Register(register));
        }
        if let Some(global) = self.module.global(name) {
            return Ok(Storage::Global(global.kind));
        }
        let scope = self.method.map_or("<clinit>", |m| m.name.as_str());
        Err(BackendError::InternalInvariant(format!(
            "no register or field for `{name}` in `{scope}`"
        )))
    }

    fn var_kind(&self, name: &str) -> VarKind {
        if let Some(method) = self.method {
            if let Some(kind) = method.param_kind(name) {
                return kind;
            }
            if let Some(kind) = method.locals.get(name) {
                return *kind;
            }
        }
        if let Some(global) = self.module.global(name) {
            return global.kind;
        }
        VarKind::Integer
    }

    fn field(&self, name: &str) -> String {
        format!("{}/{}", self.module.name, name)
    }

    // ── Statements ───────────────────────────────────────────────────────

    fn gen_stmt(&mut self, stmt: &Stmt, out: &mut Vec<Instr>) -> Result<(), BackendError> {
        match stmt {
            Stmt::Allocate { target, value } => self.gen_allocate(target, value, out),
            Stmt::StoreArith {
                target,
                op,
                lhs,
                rhs,
            } => self.gen_store_arith(target, *op, lhs, rhs, out),
            Stmt::StoreCall { target, call } => self.gen_store_call(target, call, out),
            Stmt::Call(call) => {
                let ret = self.gen_call(call, out)?;
                if ret != JvmKind::Void {
                    out.push(Instr::Pop);
                }
                Ok(())
            }
            Stmt::Comparison {
                cond,
                lhs,
                rhs,
                target,
            } => self.gen_comparison(*cond, lhs, rhs, &target.to_string(), out),
            Stmt::Jump(label) => {
                out.push(Instr::Goto(label.to_string()));
                Ok(())
            }
            Stmt::Label(label) => {
                out.push(Instr::Label(label.to_string()));
                Ok(())
            }
            Stmt::Return => self.gen_return(out),
        }
    }

    /// Constant-table bookkeeping tied to the control-flow labels. Runs
    /// after the statement's own code: a branch's test still reads the
    /// pre-branch state.
    fn join_point(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Comparison { target, .. }
                if matches!(target.kind, LabelKind::IfEnd | LabelKind::IfFalse) =>
            {
                self.consts.push_snapshot();
            }
            Stmt::Label(label) => match label.kind {
                LabelKind::WhileInit => {
                    self.consts.push_snapshot();
                    self.consts.enter_loop();
                }
                // The else branch starts from the merged state, not the
                // raw pre-branch snapshot. Deliberate: downstream suites
                // depend on this shape.
                LabelKind::IfFalse => {
                    self.consts.restore();
                    self.consts.push_snapshot();
                }
                LabelKind::IfEnd => self.consts.restore(),
                LabelKind::WhileEnd => {
                    self.consts.restore();
                    self.consts.exit_loop();
                }
            },
            _ => {}
        }
    }

    fn gen_return(&mut self, out: &mut Vec<Instr>) -> Result<(), BackendError> {
        let method = self.method.ok_or_else(|| {
            BackendError::InternalInvariant("return outside a method body".to_string())
        })?;
        match method.ret {
            ReturnKind::Void => {
                out.push(Instr::Return);
                Ok(())
            }
            ReturnKind::Integer => {
                let name = require_return_var(method)?;
                self.gen_load(&VarRef::scalar(name), out)?;
                out.push(Instr::Ireturn);
                Ok(())
            }
            ReturnKind::Array => {
                let name = require_return_var(method)?;
                self.gen_array_ref(&name, out)?;
                out.push(Instr::Areturn);
                Ok(())
            }
        }
    }

    // ── Stores ───────────────────────────────────────────────────────────

    fn gen_allocate(
        &mut self,
        target: &Target,
        value: &Operand,
        out: &mut Vec<Instr>,
    ) -> Result<(), BackendError> {
        match target {
            Target::Scalar(name) => {
                let known = self.gen_operand(value, out)?;
                match self.storage(name)? {
                    Storage::Register(r) => out.push(Instr::Istore(r)),
                    Storage::Global(_) => out.push(Instr::Putstatic {
                        field: self.field(name),
                        descriptor: "I",
                    }),
                }
                match known {
                    Some(v) => self.consts.set(name, v),
                    None => self.consts.clear_key(name),
                }
                Ok(())
            }
            Target::NewArray(name) => {
                self.gen_operand(value, out)?;
                out.push(Instr::Newarray);
                match self.storage(name)? {
                    Storage::Register(r) => out.push(Instr::Astore(r)),
                    Storage::Global(_) => out.push(Instr::Putstatic {
                        field: self.field(name),
                        descriptor: "[I",
                    }),
                }
                self.consts.invalidate_array(name);
                Ok(())
            }
            Target::Element { array, index } => {
                self.gen_array_ref(array, out)?;
                let index_known = self.gen_operand(index, out)?;
                let known = self.gen_operand(value, out)?;
                out.push(Instr::Iastore);
                self.note_element_store(array, index_known, known);
                Ok(())
            }
            Target::Fill(array) => {
                let mut arrayref = Vec::new();
                self.gen_array_ref(array, &mut arrayref)?;
                let mut value_code = Vec::new();
                self.gen_operand(value, &mut value_code)?;
                emit_fill(&arrayref, &value_code, out);
                self.consts.invalidate_array(array);
                Ok(())
            }
        }
    }

    fn gen_store_arith(
        &mut self,
        target: &Target,
        op: ArithOp,
        lhs: &Operand,
        rhs: &Operand,
        out: &mut Vec<Instr>,
    ) -> Result<(), BackendError> {
        if self.try_iinc(target, op, lhs, rhs, out) {
            return Ok(());
        }

        if self.optimize {
            if let (Some(a), Some(b)) = (self.const_value(lhs), self.const_value(rhs)) {
                if let Some(folded) = op.fold(a, b) {
                    return self.gen_allocate(target, &Operand::Const(folded), out);
                }
            }
        }

        match target {
            Target::Scalar(name) => {
                self.gen_operand(lhs, out)?;
                self.gen_operand(rhs, out)?;
                out.push(Instr::Op(op));
                match self.storage(name)? {
                    Storage::Register(r) => out.push(Instr::Istore(r)),
                    Storage::Global(_) => out.push(Instr::Putstatic {
                        field: self.field(name),
                        descriptor: "I",
                    }),
                }
                self.consts.clear_key(name);
                Ok(())
            }
            Target::Element { array, index } => {
                self.gen_array_ref(array, out)?;
                let index_known = self.gen_operand(index, out)?;
                self.gen_operand(lhs, out)?;
                self.gen_operand(rhs, out)?;
                out.push(Instr::Op(op));
                out.push(Instr::Iastore);
                self.note_element_store(array, index_known, None);
                Ok(())
            }
            Target::Fill(_) | Target::NewArray(_) => Err(BackendError::InternalInvariant(
                "arithmetic store into a fill or allocation target".to_string(),
            )),
        }
    }

    /// `x = x ± c` (or `c + x`) on a register collapses to `iinc`.
    /// `c - x` is not an increment and never qualifies.
    fn try_iinc(
        &mut self,
        target: &Target,
        op: ArithOp,
        lhs: &Operand,
        rhs: &Operand,
        out: &mut Vec<Instr>,
    ) -> bool {
        if !matches!(op, ArithOp::Add | ArithOp::Sub) {
            return false;
        }
        let name = match target {
            Target::Scalar(name) => name,
            _ => return false,
        };
        let constant = match (lhs, rhs) {
            (Operand::Load(var), Operand::Const(c))
                if var.is_plain_scalar() && var.name == *name =>
            {
                *c
            }
            (Operand::Const(c), Operand::Load(var))
                if var.is_plain_scalar() && var.name == *name && op == ArithOp::Add =>
            {
                *c
            }
            _ => return false,
        };
        if constant <= -32768 || constant >= 32768 {
            return false;
        }
        let register = match self.register(name) {
            Some(r) => r,
            // Globals take the load/op/store path.
            None => return false,
        };
        let delta = if op == ArithOp::Sub { -constant } else { constant };
        out.push(Instr::Iinc { register, delta });
        self.consts.bump(name, delta);
        true
    }

    fn gen_store_call(
        &mut self,
        target: &Target,
        call: &CallExpr,
        out: &mut Vec<Instr>,
    ) -> Result<(), BackendError> {
        match target {
            Target::Scalar(name) => {
                let ret = self.gen_call(call, out)?;
                match self.storage(name)? {
                    Storage::Register(r) => out.push(if ret == JvmKind::IntArray {
                        Instr::Astore(r)
                    } else {
                        Instr::Istore(r)
                    }),
                    Storage::Global(_) => out.push(Instr::Putstatic {
                        field: self.field(name),
                        descriptor: if ret == JvmKind::IntArray { "[I" } else { "I" },
                    }),
                }
                self.consts.clear_key(name);
                if ret == JvmKind::IntArray {
                    self.consts.invalidate_array(name);
                }
                Ok(())
            }
            Target::Element { array, index } => {
                self.gen_array_ref(array, out)?;
                let index_known = self.gen_operand(index, out)?;
                self.gen_call(call, out)?;
                out.push(Instr::Iastore);
                self.note_element_store(array, index_known, None);
                Ok(())
            }
            Target::Fill(_) | Target::NewArray(_) => Err(BackendError::InternalInvariant(
                "call store into a fill or allocation target".to_string(),
            )),
        }
    }

    fn note_element_store(&mut self, array: &str, index: Option<i32>, value: Option<i32>) {
        match index {
            Some(i) => {
                let key = element_key(array, i);
                match value {
                    Some(v) => self.consts.set(&key, v),
                    None => self.consts.clear_key(&key),
                }
            }
            // Unknown index: any slot may have changed.
            None => self.consts.invalidate_array(array),
        }
    }

    // ── Branches ─────────────────────────────────────────────────────────

    fn gen_comparison(
        &mut self,
        cond: Cond,
        lhs: &Operand,
        rhs: &Operand,
        target: &str,
        out: &mut Vec<Instr>,
    ) -> Result<(), BackendError> {
        // Literal zero on the right uses the one-operand forms.
        if matches!(rhs, Operand::Const(0)) {
            self.gen_operand(lhs, out)?;
            out.push(Instr::If {
                cond,
                target: target.to_string(),
            });
            return Ok(());
        }

        if let (Operand::Load(a), Operand::Load(b)) = (lhs, rhs) {
            if a.is_whole_array() && b.is_whole_array() {
                if !matches!(cond, Cond::Eq | Cond::Neq) {
                    return Err(BackendError::Structural(
                        "ordered comparison of array references".to_string(),
                    ));
                }
                self.gen_array_ref(&a.name, out)?;
                self.gen_array_ref(&b.name, out)?;
                out.push(Instr::IfAcmp {
                    cond,
                    target: target.to_string(),
                });
                return Ok(());
            }
        }

        self.gen_operand(lhs, out)?;
        self.gen_operand(rhs, out)?;
        out.push(Instr::IfIcmp {
            cond,
            target: target.to_string(),
        });
        Ok(())
    }

    // ── Operands ─────────────────────────────────────────────────────────

    /// Emits code leaving the operand's value on the stack. Returns the
    /// value when it is statically known (literal, propagated load, or
    /// folded arithmetic).
    fn gen_operand(
        &mut self,
        operand: &Operand,
        out: &mut Vec<Instr>,
    ) -> Result<Option<i32>, BackendError> {
        match operand {
            Operand::Const(v) => {
                out.push(Instr::load_constant(*v));
                Ok(Some(*v))
            }
            Operand::Load(var) => self.gen_load(var, out),
            Operand::Arith { op, lhs, rhs } => {
                if self.optimize {
                    if let (Some(a), Some(b)) = (self.const_value(lhs), self.const_value(rhs))
                    {
                        if let Some(folded) = op.fold(a, b) {
                            out.push(Instr::load_constant(folded));
                            return Ok(Some(folded));
                        }
                    }
                }
                self.gen_operand(lhs, out)?;
                self.gen_operand(rhs, out)?;
                out.push(Instr::Op(*op));
                Ok(None)
            }
            Operand::Call(call) => {
                self.gen_call(call, out)?;
                Ok(None)
            }
        }
    }

    /// Statically known value of an operand, if any. Only consulted when
    /// optimization is on; table reads gate themselves on loop depth.
    fn const_value(&self, operand: &Operand) -> Option<i32> {
        match operand {
            Operand::Const(v) => Some(*v),
            Operand::Load(var) => self.const_for_load(var),
            Operand::Arith { op, lhs, rhs } => {
                if !self.optimize {
                    return None;
                }
                op.fold(self.const_value(lhs)?, self.const_value(rhs)?)
            }
            Operand::Call(_) => None,
        }
    }

    fn const_for_load(&self, var: &VarRef) -> Option<i32> {
        if var.size_access {
            return None;
        }
        match &var.index {
            None if var.kind == VarKind::Integer => self.consts.lookup(&var.name),
            Some(index) => match index.as_ref() {
                Operand::Const(i) => self.consts.lookup(&element_key(&var.name, *i)),
                _ => None,
            },
            _ => None,
        }
    }

    fn gen_load(
        &mut self,
        var: &VarRef,
        out: &mut Vec<Instr>,
    ) -> Result<Option<i32>, BackendError> {
        if let Some(value) = self.const_for_load(var) {
            out.push(Instr::load_constant(value));
            return Ok(Some(value));
        }

        if var.size_access {
            self.gen_array_ref(&var.name, out)?;
            out.push(Instr::Arraylength);
            return Ok(None);
        }

        match &var.index {
            Some(index) => {
                self.gen_array_ref(&var.name, out)?;
                self.gen_operand(index, out)?;
                out.push(Instr::Iaload);
                Ok(None)
            }
            None => {
                match var.kind {
                    VarKind::Integer => match self.storage(&var.name)? {
                        Storage::Register(r) => out.push(Instr::Iload(r)),
                        Storage::Global(_) => out.push(Instr::Getstatic {
                            field: self.field(&var.name),
                            descriptor: "I",
                        }),
                    },
                    VarKind::Array => self.gen_array_ref(&var.name, out)?,
                }
                Ok(None)
            }
        }
    }

    /// Pushes an array reference: `aload` for registers, `getstatic`
    /// for globals.
    fn gen_array_ref(&mut self, name: &str, out: &mut Vec<Instr>) -> Result<(), BackendError> {
        match self.storage(name)? {
            Storage::Register(r) => out.push(Instr::Aload(r)),
            Storage::Global(_) => out.push(Instr::Getstatic {
                field: self.field(name),
                descriptor: "[I",
            }),
        }
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────────

    fn gen_call(
        &mut self,
        call: &CallExpr,
        out: &mut Vec<Instr>,
    ) -> Result<JvmKind, BackendError> {
        let mut args = Vec::new();
        if call.method == "main" {
            // The entry point's argument vector is never user-visible.
            out.push(Instr::AconstNull);
            args.push(JvmKind::StrArray);
        } else {
            for arg in &call.args {
                match arg {
                    CallArg::Literal(v) => {
                        out.push(Instr::load_constant(*v));
                        args.push(JvmKind::Int);
                    }
                    CallArg::Str(s) => {
                        out.push(Instr::LdcStr(s.clone()));
                        args.push(JvmKind::Str);
                    }
                    CallArg::Var(name) => match self.var_kind(name) {
                        VarKind::Integer => {
                            self.gen_load(&VarRef::scalar(name.clone()), out)?;
                            args.push(JvmKind::Int);
                        }
                        VarKind::Array => {
                            self.gen_array_ref(name, out)?;
                            args.push(JvmKind::IntArray);
                        }
                    },
                }
            }
        }

        let owner = call
            .module
            .clone()
            .unwrap_or_else(|| self.module.name.clone());
        let ret = if owner == self.module.name {
            let callee = self.module.method(&call.method).ok_or_else(|| {
                BackendError::Structural(format!("call to unknown method `{}`", call.method))
            })?;
            match callee.ret {
                ReturnKind::Void => JvmKind::Void,
                ReturnKind::Integer => JvmKind::Int,
                ReturnKind::Array => JvmKind::IntArray,
            }
        } else {
            // Cross-module: the destination's kind decides the return
            // descriptor; bare statement calls stay void.
            match call.result_hint {
                None => JvmKind::Void,
                Some(VarKind::Integer) => JvmKind::Int,
                Some(VarKind::Array) => JvmKind::IntArray,
            }
        };

        out.push(Instr::Invoke(CallSite {
            owner,
            method: call.method.clone(),
            args,
            ret,
        }));
        Ok(ret)
    }
}

fn require_return_var(method: &Method) -> Result<String, BackendError> {
    method.return_var.clone().ok_or_else(|| {
        BackendError::InternalInvariant(format!(
            "method `{}` returns a value but has no return variable",
            method.name
        ))
    })
}
