//! Prerequisite resolution: turn a requested stage list into an ordered plan.
//!
//! 1. Every requested name must be known.
//! 2. Prerequisites are expanded level by level into an insertion-ordered set.
//! 3. Names are emitted once all their prerequisites have been emitted.
//! 4. A fixed table of rewrite rules adjusts the result, and the
//!    satisfaction invariant is checked again.
//!
//! Resolution is pure: the same request and map always yield the same order.

mod prerequisites;
pub mod rules;


use indexmap::IndexSet;

use crate::error::PipelineError;

pub use prerequisites::PrerequisiteMap;
pub use rules::{RewriteRule, REWRITE_RULES};

/// Normalize a stage name as written by a caller.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Extend `requested` with its transitive prerequisites and order the result
/// so every stage follows everything it depends on.
pub fn resolve<S: AsRef<str>>(
    requested: &[S],
    map: &PrerequisiteMap,
) -> Result<Vec<String>, PipelineError> {
    let requested: Vec<String> = requested
        .iter()
        .map(|s| normalize(s.as_ref()))
        .filter(|s| !s.is_empty())
        .collect();

    for name in &requested {
        if !map.contains(name) {
            return Err(PipelineError::UnknownStage(name.clone()));
        }
    }

    let closure = expand(&requested, map)?;
    let ordered = order(closure, map, &requested)?;
    let rewritten = rules::apply_all(ordered, &requested);
    check_satisfied(&rewritten, map)?;
    Ok(rewritten)
}

/// Level-wise breadth-first closure over prerequisites.
///
/// In an acyclic map no dependency chain is longer than the map itself, so
/// needing more than `map.len()` levels means the map has a cycle.
fn expand(requested: &[String], map: &PrerequisiteMap) -> Result<IndexSet<String>, PipelineError> {
    let mut working: IndexSet<String> = requested.iter().cloned().collect();
    let mut frontier: IndexSet<String> = working.clone();
    let mut levels = 0usize;

    while !frontier.is_empty() {
        levels += 1;
        if levels > map.len() + 1 {
            let stuck: Vec<&str> = frontier.iter().map(|s| s.as_str()).collect();
            return Err(PipelineError::CyclicDependency(format!(
                "prerequisite expansion did not terminate; cycle through: {}",
                stuck.join(", ")
            )));
        }

        let mut next = IndexSet::new();
        for name in &frontier {
            let prereqs = map
                .prerequisites_of(name)
                .ok_or_else(|| PipelineError::UnknownStage(name.clone()))?;
            for prereq in prereqs {
                let prereq = normalize(prereq);
                working.insert(prereq.clone());
                next.insert(prereq);
            }
        }
        frontier = next;
    }

    Ok(working)
}

/// Repeatedly emit every name whose prerequisites are already emitted.
fn order(
    mut pending: IndexSet<String>,
    map: &PrerequisiteMap,
    requested: &[String],
) -> Result<Vec<String>, PipelineError> {
    let mut ordered: Vec<String> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let mut progressed = false;
        let mut remaining = IndexSet::with_capacity(pending.len());

        for candidate in pending {
            let ready = map
                .prerequisites_of(&candidate)
                .unwrap_or_default()
                .iter()
                .all(|p| ordered.iter().any(|o| *o == normalize(p)));
            if ready {
                ordered.push(candidate);
                progressed = true;
            } else {
                remaining.insert(candidate);
            }
        }

        if !progressed {
            let stuck: Vec<&str> = remaining.iter().map(|s| s.as_str()).collect();
            return Err(PipelineError::UnsatisfiableDependency(format!(
                "requested [{}]; cannot order [{}]",
                requested.join(","),
                stuck.join(",")
            )));
        }
        pending = remaining;
    }

    Ok(ordered)
}

/// Every prerequisite of every stage must appear earlier, either itself or
/// through the stage a rewrite rule substituted for it.
fn check_satisfied(order: &[String], map: &PrerequisiteMap) -> Result<(), PipelineError> {
    for (index, name) in order.iter().enumerate() {
        let earlier = &order[..index];
        for prereq in map.prerequisites_of(name).unwrap_or_default() {
            let prereq = normalize(prereq);
            let present = earlier.contains(&prereq)
                || REWRITE_RULES
                    .iter()
                    .filter_map(|rule| rule.substitute_for(&prereq))
                    .any(|sub| earlier.iter().any(|e| e == sub));
            if !present {
                return Err(PipelineError::UnsatisfiableDependency(format!(
                    "\"{name}\" needs \"{prereq}\" earlier in [{}]",
                    order.join(",")
                )));
            }
        }
    }
    Ok(())
}
