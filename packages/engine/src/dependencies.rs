//! Dependency scheduling between actions
//!
//! An action depends on another when its expression mentions `$name` with
//! an all-lowercase name that is another action's output. Upper-case names
//! (`$BSN`, `$DREMPEL`) are parameters or definitions by convention and
//! never create edges. For `$a.b` only the root segment `a` counts.
//!
//! Requesting one output evaluates only its dependency closure, in
//! topological order (Kahn's algorithm). Full evaluation keeps the declared
//! order but still rejects cyclic specifications.

use crate::error::{EngineError, Result};
use crate::expression::Action;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Lower-case `$name` roots mentioned by an action.
pub fn analyze_dependencies(action: &Action) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    action.expr.visit_references(&mut |name| {
        let root = name.split('.').next().unwrap_or(name);
        if !root.is_empty() && root == root.to_lowercase() {
            deps.insert(root.to_string());
        }
    });
    deps
}

/// Actions to evaluate for `requested_output`, in execution order.
///
/// `None` (or an empty name) selects every action in declared order.
pub fn get_required_actions<'a>(
    requested_output: Option<&str>,
    actions: &'a [Action],
) -> Result<Vec<&'a Action>> {
    let graph = dependency_graph(actions);

    let requested = match requested_output {
        Some(name) if !name.is_empty() => name,
        _ => {
            topological_sort(&graph)?;
            return Ok(actions.iter().collect());
        }
    };

    let mut closure = BTreeSet::new();
    let mut worklist = vec![requested.to_string()];
    while let Some(output) = worklist.pop() {
        if !closure.insert(output.clone()) {
            continue;
        }
        if let Some(deps) = graph.get(&output) {
            worklist.extend(deps.iter().filter(|d| !closure.contains(*d)).cloned());
        }
    }

    let restricted: BTreeMap<String, BTreeSet<String>> = graph
        .into_iter()
        .filter(|(output, _)| closure.contains(output))
        .map(|(output, deps)| {
            let deps = deps.into_iter().filter(|d| closure.contains(d)).collect();
            (output, deps)
        })
        .collect();

    let order = topological_sort(&restricted)?;
    tracing::debug!(requested = %requested, actions = order.len(), "Computed required actions");

    let by_output: BTreeMap<&str, &Action> =
        actions.iter().map(|a| (a.output.as_str(), a)).collect();
    Ok(order
        .iter()
        .filter_map(|output| by_output.get(output.as_str()).copied())
        .collect())
}

/// Edges between action outputs only; references to anything that is not
/// an action output resolve elsewhere.
fn dependency_graph(actions: &[Action]) -> BTreeMap<String, BTreeSet<String>> {
    let outputs: BTreeSet<&str> = actions.iter().map(|a| a.output.as_str()).collect();
    actions
        .iter()
        .map(|action| {
            let deps = analyze_dependencies(action)
                .into_iter()
                .filter(|d| outputs.contains(d.as_str()))
                .collect();
            (action.output.clone(), deps)
        })
        .collect()
}

/// Kahn's algorithm over `node -> dependencies`. Ties are broken by name.
fn topological_sort(graph: &BTreeMap<String, BTreeSet<String>>) -> Result<Vec<String>> {
    let mut remaining: BTreeMap<&str, usize> = graph
        .iter()
        .map(|(node, deps)| (node.as_str(), deps.len()))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (node, deps) in graph {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(node.as_str());
        }
    }

    let mut ready: VecDeque<&str> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(node, _)| *node)
        .collect();
    let mut order = Vec::with_capacity(graph.len());

    while let Some(node) = ready.pop_front() {
        order.push(node.to_string());
        for &dependent in dependents.get(node).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if order.len() < graph.len() {
        let cyclic: Vec<&str> = remaining
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(node, _)| *node)
            .collect();
        return Err(EngineError::CircularDependency(cyclic.join(", ")));
    }
    Ok(order)
}
