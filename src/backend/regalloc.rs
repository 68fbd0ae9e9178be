//! Graph-coloring register allocation.
//!
//! Classic simplify/select with one twist: parameter nodes carry a
//! mandatory register (their declaration position) and are never
//! simplified away early. A coloring attempt fails once more nodes than
//! mandatory slots survive simplification; the pinned survivors are then
//! removed last, from the highest slot down, so that selection pops them
//! first and can hand each one exactly its slot. Scans run in name order
//! over an ordered node map, so the result is deterministic for a given
//! graph and budget.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::liveness::InterferenceGraph;
use crate::BackendError;

/// Final register assignment for one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodAllocation {
    pub registers: BTreeMap<String, usize>,
    /// Count of distinct registers in use; the `.limit locals` value.
    pub register_count: usize,
}

/// Immutable allocation result for a whole module, keyed by method name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allocation {
    pub methods: BTreeMap<String, MethodAllocation>,
}

impl Allocation {
    pub fn method(&self, name: &str) -> Option<&MethodAllocation> {
        self.methods.get(name)
    }
}

/// Colors every graph under `budget` registers. On the first method
/// that does not fit, reports the minimum budget that would.
pub fn allocate(
    graphs: &BTreeMap<String, InterferenceGraph>,
    budget: usize,
) -> Result<Allocation, BackendError> {
    let mut allocation = Allocation::default();
    for (method, graph) in graphs {
        match color(graph, budget)? {
            Some(registers) => {
                let register_count =
                    registers.values().copied().collect::<BTreeSet<_>>().len();
                debug!(method = %method, register_count, "registers allocated");
                allocation.methods.insert(
                    method.clone(),
                    MethodAllocation {
                        registers,
                        register_count,
                    },
                );
            }
            None => {
                let min_budget = min_feasible_budget(graph, budget)?;
                return Err(BackendError::Allocation {
                    method: method.clone(),
                    budget,
                    min_budget,
                });
            }
        }
    }
    Ok(allocation)
}

/// Attempts to color one graph with `k` registers. `Ok(None)` means the
/// heuristic found no coloring at this budget.
pub fn color(
    graph: &InterferenceGraph,
    k: usize,
) -> Result<Option<BTreeMap<String, usize>>, BackendError> {
    // Parameters cannot fit at all if their slots exceed the budget.
    if let Some(max) = graph.max_required() {
        if max >= k {
            return Ok(None);
        }
    }

    let mut work = graph.clone();
    let mut stack: Vec<String> = Vec::new();

    // Phase 1: simplify. Unconstrained nodes with degree below the
    // budget can always be colored later, so peel them off first.
    loop {
        let pick = work
            .names()
            .find(|name| {
                work.degree(name) < k
                    && work.node(name).map_or(false, |n| n.required.is_none())
            })
            .cloned();
        match pick {
            Some(name) => {
                work.remove_node(&name);
                stack.push(name);
            }
            None => break,
        }
    }

    // Only mandatory-register nodes may survive simplification: every
    // other survivor still has degree >= k. With more survivors than
    // mandatory slots, some node would have to steal a pinned slot
    // during selection, so the attempt fails here instead.
    let slots = graph.max_required().map_or(0, |m| m + 1);
    if work.len() > slots {
        return Ok(None);
    }

    // Phase 2: remove the pinned survivors from the highest slot down.
    // They end up on top of the stack, so selection pops them before
    // anything that interferes with them and hands each its exact slot.
    while !work.is_empty() {
        let pick = work.max_required().and_then(|slot| {
            work.names()
                .find(|name| work.node(name).and_then(|n| n.required) == Some(slot))
                .cloned()
        });
        match pick {
            Some(name) => {
                work.remove_node(&name);
                stack.push(name);
            }
            None => return Ok(None),
        }
    }

    // Phase 3: select. Pop and take the lowest register not used by an
    // already-colored neighbor.
    let mut assigned: BTreeMap<String, usize> = BTreeMap::new();
    while let Some(name) = stack.pop() {
        let node = graph.node(&name).ok_or_else(|| {
            BackendError::InternalInvariant(format!("colored unknown node `{name}`"))
        })?;
        let taken: BTreeSet<usize> = node
            .neighbors
            .iter()
            .filter_map(|n| assigned.get(n).copied())
            .collect();
        let register = match node.required {
            Some(required) => {
                if taken.contains(&required) {
                    // Phase 2 ordering is supposed to make this unreachable.
                    return Err(BackendError::InternalInvariant(format!(
                        "mandatory register {required} of `{name}` already taken"
                    )));
                }
                required
            }
            None => match (0..k).find(|r| !taken.contains(r)) {
                Some(r) => r,
                None => {
                    return Err(BackendError::InternalInvariant(format!(
                        "no free register for `{name}` despite simplification"
                    )))
                }
            },
        };
        assigned.insert(name, register);
    }

    Ok(Some(assigned))
}

/// Probes budgets above the failing one until coloring succeeds.
/// A budget of `node count` always succeeds, so this terminates.
fn min_feasible_budget(
    graph: &InterferenceGraph,
    failed_budget: usize,
) -> Result<usize, BackendError> {
    let ceiling = graph.len().max(graph.max_required().map_or(0, |m| m + 1));
    let mut k = failed_budget + 1;
    while k < ceiling {
        if color(graph, k)?.is_some() {
            debug!(failed_budget, min_budget = k, "budget probe finished");
            return Ok(k);
        }
        k += 1;
    }
    debug!(failed_budget, min_budget = ceiling, "budget probe finished");
    Ok(ceiling)
}
