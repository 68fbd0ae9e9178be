//! JVM backend for the YAL module language.
//!
//! The crate takes a validated syntax tree for one module and produces
//! Jasmin assembly text in four stages:
//!
//! - `ir::build` — lower the tree into a flat, label-based IR
//! - `backend::liveness` — per-method dataflow and interference graphs
//! - `backend::regalloc` — graph-coloring register allocation
//! - `backend::codegen` — instruction selection and text emission
//!
//! Each stage is exposed on its own so callers can inspect intermediate
//! results; [`compile_module`] runs the whole pipeline.

pub mod backend;
pub mod ir;

use std::collections::BTreeMap;

use thiserror::Error;

use backend::liveness::InterferenceGraph;
use backend::regalloc::Allocation;

/// Any way the backend can fail.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The input tree violates the contract the front end is supposed to
    /// guarantee (unknown callee, duplicate method, parameters on `main`, ...).
    #[error("structural error: {0}")]
    Structural(String),

    /// The interference graph of `method` cannot be colored with the given
    /// register budget. `min_budget` is the smallest budget that works.
    #[error(
        "cannot allocate registers for method `{method}` with budget {budget}; \
         minimum feasible budget is {min_budget}"
    )]
    Allocation {
        method: String,
        budget: usize,
        min_budget: usize,
    },

    /// A state the pipeline is supposed to make unreachable.
    #[error("internal invariant violation: {0}")]
    InternalInvariant(String),
}

/// Knobs mirroring the historical driver flags.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Register budget per method. The JVM caps local slots at 255.
    pub register_budget: usize,
    /// Enables constant propagation and folding.
    pub optimize: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            register_budget: 255,
            optimize: false,
        }
    }
}

/// Lowers a validated syntax tree into the backend IR.
pub fn build_ir(module: &ir::ast::Module) -> Result<ir::Module, BackendError> {
    ir::build(module)
}

/// Runs per-method liveness analysis, producing one interference graph
/// per method (keyed by method name).
pub fn analyze_liveness(
    module: &ir::Module,
) -> Result<BTreeMap<String, InterferenceGraph>, BackendError> {
    backend::liveness::analyze_module(module)
}

/// Colors every method's interference graph under `register_budget`.
pub fn allocate_registers(
    graphs: &BTreeMap<String, InterferenceGraph>,
    register_budget: usize,
) -> Result<Allocation, BackendError> {
    backend::regalloc::allocate(graphs, register_budget)
}

/// Emits Jasmin text lines for an allocated module.
pub fn select_instructions(
    module: &ir::Module,
    allocation: &Allocation,
    optimize: bool,
) -> Result<Vec<String>, BackendError> {
    backend::codegen::generate(module, allocation, optimize)
}

/// Full pipeline: validated tree in, Jasmin text out.
pub fn compile_module(
    module: &ir::ast::Module,
    options: &Options,
) -> Result<String, BackendError> {
    let ir = build_ir(module)?;
    let graphs = analyze_liveness(&ir)?;
    let allocation = allocate_registers(&graphs, options.register_budget)?;
    let lines = select_instructions(&ir, &allocation, options.optimize)?;
    Ok(lines.join("\n"))
}
