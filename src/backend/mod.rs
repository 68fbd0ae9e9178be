//! Backend: liveness analysis, register allocation and code generation.
//!
//! - `instruction` — typed Jasmin instruction set and stack accounting
//! - `liveness`    — dataflow lines, fixpoint, interference graphs
//! - `regalloc`    — graph coloring with mandatory parameter registers
//! - `codegen`     — instruction selection and text emission

pub mod codegen;
pub mod instruction;
pub mod liveness;
pub mod regalloc;

pub use instruction::{max_stack, Instr};
pub use liveness::InterferenceGraph;
pub use regalloc::{Allocation, MethodAllocation};
