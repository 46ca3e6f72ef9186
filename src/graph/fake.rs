//! An in-process stand-in for a real graph backend, used by integration
//! tests so the Revision Writer's best-effort mirroring logic (§4.3) can be
//! exercised without a live deployment. It doesn't parse Cypher; it
//! recognizes the fixed, tagged query shapes `GraphClient` emits and applies
//! them to a small in-memory node/edge table — enough to validate this
//! crate's own business logic (label caching, dangling-edge skipping,
//! idempotent close/create), not to validate a graph database.

use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{GraphExecutor, GraphRow, GraphValue};
use crate::model::GRAPH_OPEN_SENTINEL;

#[derive(Debug, Clone)]
struct FakeNode {
    label: String,
    branch_id: i64,
    global_id: String,
    name: String,
    valid_from_rev: i64,
    valid_to_rev: i64,
}

#[derive(Debug, Clone)]
struct FakeEdge {
    label: String,
    branch_id: i64,
    from_gid: String,
    to_gid: String,
    valid_from_rev: i64,
    valid_to_rev: i64,
}

#[derive(Default)]
pub struct FakeGraphExecutor {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    nodes: Vec<FakeNode>,
    edges: Vec<FakeEdge>,
    labels: std::collections::HashSet<String>,
}

impl FakeGraphExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().expect("fake graph state poisoned").nodes.len()
    }

    pub fn open_node_count(&self) -> usize {
        self.state
            .lock()
            .expect("fake graph state poisoned")
            .nodes
            .iter()
            .filter(|n| n.valid_to_rev == GRAPH_OPEN_SENTINEL)
            .count()
    }

    pub fn open_edge_count(&self) -> usize {
        self.state
            .lock()
            .expect("fake graph state poisoned")
            .edges
            .iter()
            .filter(|e| e.valid_to_rev == GRAPH_OPEN_SENTINEL)
            .count()
    }
}

/// Extracts the value between `marker` and the next `'`.
fn extract_quoted(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

/// Extracts the integer that follows `marker`, stopping at the first
/// character that isn't part of a (possibly negative) integer literal.
fn extract_int(text: &str, marker: &str) -> Option<i64> {
    let start = text.find(marker)? + marker.len();
    let rest = text[start..].trim_start();
    let mut end = 0;
    let bytes = rest.as_bytes();
    if end < bytes.len() && bytes[end] == b'-' {
        end += 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    rest[..end].parse().ok()
}

/// Extracts the label token immediately following `marker` (stops at the
/// first non-identifier character, e.g. `{` or whitespace).
fn extract_label(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric()))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(rest[..end].to_string())
    }
}

fn row(fields: &[(&str, GraphValue)]) -> GraphRow {
    fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[async_trait]
impl GraphExecutor for FakeGraphExecutor {
    async fn run(&self, query: &str) -> std::result::Result<Vec<GraphRow>, String> {
        let mut state = self.state.lock().expect("fake graph state poisoned");

        if let Some(rest) = query.strip_prefix("/*Q:ENSURE_LABEL*/") {
            let label = extract_quoted(rest, "name: '").ok_or("malformed ENSURE_LABEL query")?;
            state.labels.insert(label);
            return Ok(vec![row(&[])]);
        }

        if let Some(rest) = query.strip_prefix("/*Q:CREATE_NODE*/") {
            let label = extract_label(rest, "CREATE (n:").ok_or("malformed CREATE_NODE query")?;
            let branch_id = extract_int(rest, "branch_id: ").ok_or("malformed CREATE_NODE query")?;
            let global_id = extract_quoted(rest, "global_id: '").ok_or("malformed CREATE_NODE query")?;
            let name = extract_quoted(rest, "name: '").unwrap_or_default();
            let valid_from_rev = extract_int(rest, "valid_from_rev: ").ok_or("malformed CREATE_NODE query")?;
            state.nodes.push(FakeNode {
                label,
                branch_id,
                global_id,
                name,
                valid_from_rev,
                valid_to_rev: GRAPH_OPEN_SENTINEL,
            });
            return Ok(vec![row(&[])]);
        }

        if let Some(rest) = query.strip_prefix("/*Q:CLOSE_NODE*/") {
            let branch_id = extract_int(rest, "n.branch_id = ").ok_or("malformed CLOSE_NODE query")?;
            let global_id = extract_quoted(rest, "n.global_id = '").ok_or("malformed CLOSE_NODE query")?;
            let closing_rev = extract_int(rest, "SET n.valid_to_rev = ").ok_or("malformed CLOSE_NODE query")?;
            let mut matched = Vec::new();
            for n in state.nodes.iter_mut() {
                if n.branch_id == branch_id && n.global_id == global_id && n.valid_to_rev == GRAPH_OPEN_SENTINEL {
                    n.valid_to_rev = closing_rev;
                    matched.push(());
                }
            }
            return Ok(matched.into_iter().map(|_| row(&[])).collect());
        }

        if let Some(rest) = query.strip_prefix("/*Q:CLOSE_EDGES*/") {
            let branch_id = extract_int(rest, "e.branch_id = ").ok_or("malformed CLOSE_EDGES query")?;
            let global_id = extract_quoted(rest, "a.global_id = '").ok_or("malformed CLOSE_EDGES query")?;
            let closing_rev = extract_int(rest, "SET e.valid_to_rev = ").ok_or("malformed CLOSE_EDGES query")?;
            let mut closed = 0;
            for e in state.edges.iter_mut() {
                if e.branch_id == branch_id
                    && e.valid_to_rev == GRAPH_OPEN_SENTINEL
                    && (e.from_gid == global_id || e.to_gid == global_id)
                {
                    e.valid_to_rev = closing_rev;
                    closed += 1;
                }
            }
            return Ok((0..closed).map(|_| row(&[])).collect());
        }

        if let Some(rest) = query.strip_prefix("/*Q:CREATE_EDGE*/") {
            let branch_id = extract_int(rest, "MATCH (a {branch_id: ").ok_or("malformed CREATE_EDGE query")?;
            let from_gid = extract_quoted(rest, "global_id: '").ok_or("malformed CREATE_EDGE query")?;
            let to_rest = &rest[rest.find("global_id: '").unwrap() + "global_id: '".len() + from_gid.len()..];
            let to_gid = extract_quoted(to_rest, "global_id: '").ok_or("malformed CREATE_EDGE query")?;
            let label = extract_label(rest, "CREATE (a)-[r:").ok_or("malformed CREATE_EDGE query")?;
            let valid_from_rev = extract_int(rest, "valid_from_rev: ").ok_or("malformed CREATE_EDGE query")?;

            let from_open = state
                .nodes
                .iter()
                .any(|n| n.branch_id == branch_id && n.global_id == from_gid && n.valid_to_rev == GRAPH_OPEN_SENTINEL);
            let to_open = state
                .nodes
                .iter()
                .any(|n| n.branch_id == branch_id && n.global_id == to_gid && n.valid_to_rev == GRAPH_OPEN_SENTINEL);
            if !from_open || !to_open {
                return Ok(vec![]);
            }
            state.edges.push(FakeEdge {
                label,
                branch_id,
                from_gid,
                to_gid,
                valid_from_rev,
                valid_to_rev: GRAPH_OPEN_SENTINEL,
            });
            return Ok(vec![row(&[])]);
        }

        if let Some(rest) = query.strip_prefix("/*Q:RELATIONS_OF_OUT*/") {
            return Ok(self.relations_of_rows(&state, rest, true));
        }
        if let Some(rest) = query.strip_prefix("/*Q:RELATIONS_OF_IN*/") {
            return Ok(self.relations_of_rows(&state, rest, false));
        }

        if let Some(rest) = query.strip_prefix("/*Q:SPATIAL_ROOTS*/") {
            let branch_id = extract_int(rest, "n.branch_id = ").ok_or("malformed SPATIAL_ROOTS query")?;
            let rev = extract_int(rest, "n.valid_from_rev <= ").ok_or("malformed SPATIAL_ROOTS query")?;
            let rows = state
                .nodes
                .iter()
                .filter(|n| n.label == "IfcProject" && n.branch_id == branch_id && node_visible(n, rev))
                .map(|n| {
                    row(&[
                        ("global_id", GraphValue::Str(n.global_id.clone())),
                        ("ifc_class", GraphValue::Str(n.label.clone())),
                        ("name", GraphValue::Str(n.name.clone())),
                    ])
                })
                .collect();
            return Ok(rows);
        }

        if let Some(rest) = query.strip_prefix("/*Q:SPATIAL_CHILDREN*/") {
            return Ok(self.edge_traversal_rows(&state, rest, "IfcRelAggregates"));
        }
        if let Some(rest) = query.strip_prefix("/*Q:CONTAINED_ELEMENTS*/") {
            return Ok(self.edge_traversal_rows(&state, rest, "IfcRelContainedInSpatialStructure"));
        }

        Err(format!("FakeGraphExecutor cannot interpret query: {query}"))
    }
}

fn node_visible(n: &FakeNode, rev: i64) -> bool {
    n.valid_from_rev <= rev && (n.valid_to_rev == GRAPH_OPEN_SENTINEL || n.valid_to_rev > rev)
}

fn edge_visible(e: &FakeEdge, rev: i64) -> bool {
    e.valid_from_rev <= rev && (e.valid_to_rev == GRAPH_OPEN_SENTINEL || e.valid_to_rev > rev)
}

impl FakeGraphExecutor {
    fn relations_of_rows(&self, state: &FakeState, query: &str, outgoing: bool) -> Vec<GraphRow> {
        let global_id = match extract_quoted(query, "global_id: '") {
            Some(g) => g,
            None => return vec![],
        };
        let branch_id = match extract_int(query, "n.branch_id = ") {
            Some(b) => b,
            None => return vec![],
        };
        let rev = match extract_int(query, "n.valid_from_rev <= ") {
            Some(r) => r,
            None => return vec![],
        };

        let mut out = Vec::new();
        for e in &state.edges {
            if e.branch_id != branch_id || !edge_visible(e, rev) {
                continue;
            }
            let (anchor, other) = if outgoing {
                (&e.from_gid, &e.to_gid)
            } else {
                (&e.to_gid, &e.from_gid)
            };
            if anchor != &global_id {
                continue;
            }
            if let Some(other_node) = state
                .nodes
                .iter()
                .find(|n| n.branch_id == branch_id && &n.global_id == other && node_visible(n, rev))
            {
                out.push(row(&[
                    ("other_global_id", GraphValue::Str(other_node.global_id.clone())),
                    ("other_ifc_class", GraphValue::Str(other_node.label.clone())),
                    ("relationship_type", GraphValue::Str(e.label.clone())),
                ]));
            }
        }
        out
    }

    fn edge_traversal_rows(&self, state: &FakeState, query: &str, expected_label: &str) -> Vec<GraphRow> {
        let global_id = match extract_quoted(query, "global_id: '") {
            Some(g) => g,
            None => return vec![],
        };
        let branch_id = match extract_int(query, "n.branch_id = ") {
            Some(b) => b,
            None => return vec![],
        };
        let rev = match extract_int(query, "n.valid_from_rev <= ") {
            Some(r) => r,
            None => return vec![],
        };

        let mut out = Vec::new();
        for e in &state.edges {
            if e.label != expected_label || e.branch_id != branch_id || !edge_visible(e, rev) {
                continue;
            }
            if e.from_gid != global_id {
                continue;
            }
            if let Some(child) = state
                .nodes
                .iter()
                .find(|n| n.branch_id == branch_id && n.global_id == e.to_gid && node_visible(n, rev))
            {
                out.push(row(&[
                    ("global_id", GraphValue::Str(child.global_id.clone())),
                    ("ifc_class", GraphValue::Str(child.label.clone())),
                    ("name", GraphValue::Str(child.name.clone())),
                ]));
            }
        }
        out
    }
}
