use crate::pipeline::{registry::StageRegistry, validate::ManifestError};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Eq, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

/// Reject cycles in the stream graph (stream -> stage -> stream).
///
/// Stream outputs fire synchronously, so a cycle would cascade without bound.
pub(crate) fn check_acyclic(stages: &StageRegistry) -> Result<(), ManifestError> {
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for stage in stages.iter() {
        let targets = edges.entry(stage.input.as_str()).or_default();
        for edge in &stage.outputs {
            if edge.target_kind.is_stream() {
                targets.push(edge.target.as_str());
            }
        }
    }

    let mut marks = BTreeMap::new();
    let mut path = Vec::new();
    for node in edges.keys() {
        visit(node, &edges, &mut marks, &mut path)?;
    }

    Ok(())
}

fn visit<'a>(
    node: &'a str,
    edges: &BTreeMap<&'a str, Vec<&'a str>>,
    marks: &mut BTreeMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
) -> Result<(), ManifestError> {
    match marks.get(node) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Err(ManifestError::Cycle(cycle.join(" -> ")));
        }
        None => {}
    }

    marks.insert(node, Mark::Visiting);
    path.push(node);

    for next in edges.get(node).into_iter().flatten() {
        visit(next, edges, marks, path)?;
    }

    path.pop();
    marks.insert(node, Mark::Done);

    Ok(())
}
