//! Per-method liveness analysis and interference graphs.
//!
//! Each top-level statement becomes one dataflow line, preceded by a
//! synthetic line defining the method parameters. The classic backward
//! fixpoint (`OUT = ∪ IN(succ)`, `IN = USE ∪ (OUT − DEF)`) runs until
//! stable, and interference edges are drawn between every pair of names
//! in each IN set and each `OUT ∪ DEF` set. Parameters carry a mandatory
//! register equal to their declaration position.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::ir::{CallArg, CallExpr, Label, Method, Module, Operand, Stmt, Target};
use crate::BackendError;

/// Register 0 of `main` belongs to the JVM argument vector even though
/// the language never exposes it.
pub const MAIN_ARGS: &str = "$main_args";

// ── Interference graph ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphNode {
    pub neighbors: BTreeSet<String>,
    /// Mandatory register for parameters (their 0-based position).
    pub required: Option<usize>,
}

/// Undirected, irreflexive interference graph over local names.
/// Node order is deterministic (name order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterferenceGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl InterferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, name: &str) {
        self.nodes.entry(name.to_string()).or_default();
    }

    /// Adds a symmetric edge; self-edges are ignored.
    pub fn add_edge(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.add_node(a);
        self.add_node(b);
        if let Some(node) = self.nodes.get_mut(a) {
            node.neighbors.insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.neighbors.insert(a.to_string());
        }
    }

    pub fn set_required(&mut self, name: &str, register: usize) {
        self.add_node(name);
        if let Some(node) = self.nodes.get_mut(name) {
            node.required = Some(register);
        }
    }

    pub fn remove_node(&mut self, name: &str) {
        if self.nodes.remove(name).is_some() {
            for node in self.nodes.values_mut() {
                node.neighbors.remove(name);
            }
        }
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn degree(&self, name: &str) -> usize {
        self.nodes.get(name).map_or(0, |n| n.neighbors.len())
    }

    pub fn interferes(&self, a: &str, b: &str) -> bool {
        self.nodes
            .get(a)
            .map_or(false, |n| n.neighbors.contains(b))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Largest mandatory register present in the graph.
    pub fn max_required(&self) -> Option<usize> {
        self.nodes.values().filter_map(|n| n.required).max()
    }
}

// ── Dataflow lines ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Line {
    def: HashSet<String>,
    uses: HashSet<String>,
    live_in: HashSet<String>,
    live_out: HashSet<String>,
    successors: Vec<usize>,
}

/// Analyzes every method of `module`, keyed by method name.
pub fn analyze_module(
    module: &Module,
) -> Result<BTreeMap<String, InterferenceGraph>, BackendError> {
    let globals: BTreeSet<&str> = module.globals.iter().map(|g| g.name.as_str()).collect();
    let mut graphs = BTreeMap::new();
    for method in &module.methods {
        let graph = analyze_method(method, &globals)?;
        graphs.insert(method.name.clone(), graph);
    }
    Ok(graphs)
}

/// Runs the liveness fixpoint for one method and extracts interference.
pub fn analyze_method(
    method: &Method,
    globals: &BTreeSet<&str>,
) -> Result<InterferenceGraph, BackendError> {
    let mut lines = build_lines(method, globals)?;
    let iterations = solve(&mut lines);
    debug!(
        method = %method.name,
        lines = lines.len(),
        iterations,
        "liveness fixpoint reached"
    );

    let mut graph = InterferenceGraph::new();
    for line in &lines {
        for name in line.def.iter().chain(&line.uses) {
            graph.add_node(name);
        }
        pairwise_edges(&mut graph, line.live_in.iter());
        pairwise_edges(&mut graph, line.live_out.iter().chain(&line.def));
    }

    if method.is_main() {
        graph.set_required(MAIN_ARGS, 0);
    }
    for (position, param) in method.params.iter().enumerate() {
        graph.set_required(&param.name, position);
    }

    Ok(graph)
}

fn pairwise_edges<'a>(graph: &mut InterferenceGraph, names: impl Iterator<Item = &'a String>) {
    let names: Vec<&String> = names.collect();
    for (i, a) in names.iter().enumerate() {
        for b in &names[i + 1..] {
            graph.add_edge(a, b);
        }
    }
}

fn build_lines(method: &Method, globals: &BTreeSet<&str>) -> Result<Vec<Line>, BackendError> {
    let is_local = |name: &str| !globals.contains(name);

    // Synthetic first line: parameters are defined on entry.
    let mut entry = Line::default();
    for param in &method.params {
        entry.def.insert(param.name.clone());
    }
    if method.is_main() {
        entry.def.insert(MAIN_ARGS.to_string());
    }

    let mut lines = vec![entry];
    let mut label_lines = BTreeMap::new();
    let mut jumps: Vec<(usize, Label, bool)> = Vec::new();

    for stmt in &method.body {
        let mut line = Line::default();
        let index = lines.len();
        match stmt {
            Stmt::Allocate { target, value } => {
                target_flow(target, &mut line, &is_local);
                operand_uses(value, &mut line.uses, &is_local);
            }
            Stmt::StoreArith {
                target, lhs, rhs, ..
            } => {
                target_flow(target, &mut line, &is_local);
                operand_uses(lhs, &mut line.uses, &is_local);
                operand_uses(rhs, &mut line.uses, &is_local);
            }
            Stmt::StoreCall { target, call } => {
                target_flow(target, &mut line, &is_local);
                call_uses(call, &mut line.uses, &is_local);
            }
            Stmt::Call(call) => {
                call_uses(call, &mut line.uses, &is_local);
            }
            Stmt::Comparison {
                lhs, rhs, target, ..
            } => {
                operand_uses(lhs, &mut line.uses, &is_local);
                operand_uses(rhs, &mut line.uses, &is_local);
                jumps.push((index, *target, true));
            }
            Stmt::Jump(label) => {
                jumps.push((index, *label, false));
            }
            Stmt::Label(label) => {
                label_lines.insert(*label, index);
            }
            Stmt::Return => {
                if let Some(name) = &method.return_var {
                    if is_local(name) {
                        line.uses.insert(name.clone());
                    }
                }
            }
        }
        lines.push(line);
    }

    // Successor wiring: fallthrough for everything but unconditional
    // jumps, plus resolved jump targets. The final line (the terminal
    // return) has none.
    let last = lines.len() - 1;
    for i in 0..last {
        lines[i].successors.push(i + 1);
    }
    for (index, label, conditional) in jumps {
        let target = *label_lines.get(&label).ok_or_else(|| {
            BackendError::InternalInvariant(format!(
                "jump to missing label `{label}` in method `{}`",
                method.name
            ))
        })?;
        if conditional {
            lines[index].successors.push(target);
        } else if index < last {
            lines[index].successors = vec![target];
        }
    }

    Ok(lines)
}

/// DEF and (for fills) USE contributed by a store target.
fn target_flow(target: &Target, line: &mut Line, is_local: &impl Fn(&str) -> bool) {
    match target {
        Target::Scalar(name) | Target::NewArray(name) => {
            if is_local(name) {
                line.def.insert(name.clone());
            }
        }
        Target::Element { array, index } => {
            if is_local(array) {
                line.def.insert(array.clone());
            }
            operand_uses(index, &mut line.uses, is_local);
        }
        Target::Fill(name) => {
            // A fill reads the reference it writes through.
            if is_local(name) {
                line.def.insert(name.clone());
                line.uses.insert(name.clone());
            }
        }
    }
}

fn operand_uses(
    operand: &Operand,
    uses: &mut HashSet<String>,
    is_local: &impl Fn(&str) -> bool,
) {
    match operand {
        Operand::Const(_) => {}
        Operand::Load(var) => {
            if is_local(&var.name) {
                uses.insert(var.name.clone());
            }
            if let Some(index) = &var.index {
                operand_uses(index, uses, is_local);
            }
        }
        Operand::Arith { lhs, rhs, .. } => {
            operand_uses(lhs, uses, is_local);
            operand_uses(rhs, uses, is_local);
        }
        Operand::Call(call) => call_uses(call, uses, is_local),
    }
}

fn call_uses(call: &CallExpr, uses: &mut HashSet<String>, is_local: &impl Fn(&str) -> bool) {
    for arg in &call.args {
        if let CallArg::Var(name) = arg {
            if is_local(name) {
                uses.insert(name.clone());
            }
        }
    }
}

/// Backward fixpoint; returns the number of sweeps until stable.
fn solve(lines: &mut [Line]) -> usize {
    let mut iterations = 0;
    loop {
        iterations += 1;
        let mut changed = false;
        for i in (0..lines.len()).rev() {
            let mut out = HashSet::new();
            for &succ in &lines[i].successors {
                out.extend(lines[succ].live_in.iter().cloned());
            }
            let mut live_in: HashSet<String> = lines[i].uses.clone();
            live_in.extend(out.difference(&lines[i].def).cloned());

            if out != lines[i].live_out || live_in != lines[i].live_in {
                lines[i].live_out = out;
                lines[i].live_in = live_in;
                changed = true;
            }
        }
        if !changed {
            return iterations;
        }
    }
}
