//! Graph Client (§4.4): builds parameter-safe graph query text and executes
//! it through a generic `GraphExecutor`, so this crate isn't bound to any
//! one graph database's driver. Every query is tagged with a leading
//! `/*Q:OPERATION*/` marker — harmless to a real Cypher-speaking backend,
//! and the dispatch key the in-process `FakeGraphExecutor` (and, in a real
//! deployment, a query-metrics layer) uses instead of re-parsing Cypher.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{BimAtlasError, Result};
use crate::model::{BranchId, GlobalId, RevisionId, GRAPH_OPEN_SENTINEL, validate_label};

#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl GraphValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GraphValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            GraphValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub type GraphRow = Vec<(String, GraphValue)>;

pub fn row_get<'a>(row: &'a GraphRow, key: &str) -> Option<&'a GraphValue> {
    row.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "out",
            Direction::Incoming => "in",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelationEntry {
    pub other_global_id: GlobalId,
    pub other_ifc_class: String,
    pub relationship_type: String,
    pub direction: Direction,
}

#[derive(Debug, Clone)]
pub struct SpatialNode {
    pub global_id: GlobalId,
    pub ifc_class: String,
    pub name: Option<String>,
}

/// Contract any graph backend must satisfy: run query text, return rows.
/// Real implementations speak to an external store over e.g. Bolt; the
/// query text itself is already fully parameter-escaped by `GraphClient`.
#[async_trait]
pub trait GraphExecutor: Send + Sync {
    async fn run(&self, query: &str) -> std::result::Result<Vec<GraphRow>, String>;
}

/// Escapes a string value for embedding in graph query text (§4.4:
/// "backslash and quote escaping").
pub fn escape_cypher_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn revision_filter(alias: &str, branch_id: BranchId, rev: RevisionId) -> String {
    format!(
        "{alias}.branch_id = {branch_id} AND {alias}.valid_from_rev <= {rev} AND ({alias}.valid_to_rev = {sentinel} OR {alias}.valid_to_rev > {rev})",
        sentinel = GRAPH_OPEN_SENTINEL
    )
}

pub struct GraphClient<E: GraphExecutor> {
    executor: E,
    label_cache: Mutex<HashSet<String>>,
}

impl<E: GraphExecutor> GraphClient<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            label_cache: Mutex::new(HashSet::new()),
        }
    }

    async fn run(&self, query: &str) -> Result<Vec<GraphRow>> {
        self.executor
            .run(query)
            .await
            .map_err(|e| BimAtlasError::Store(format!("graph backend failed: {e}")))
    }

    /// Creates the label if it hasn't been seen by this process yet (§4.4:
    /// "Unknown labels are created lazily; a process-local cache suppresses
    /// repeated label-creation round-trips").
    async fn ensure_label(&self, label: &str) -> Result<()> {
        validate_label(label)?;
        {
            let cache = self.label_cache.lock().expect("label cache poisoned");
            if cache.contains(label) {
                return Ok(());
            }
        }
        let query = format!(
            "/*Q:ENSURE_LABEL*/ MERGE (:__Label {{name: '{}'}})",
            escape_cypher_string(label)
        );
        self.run(&query).await?;
        self.label_cache.lock().expect("label cache poisoned").insert(label.to_string());
        Ok(())
    }

    // ── Writes ──

    pub async fn create_node(
        &self,
        label: &str,
        branch_id: BranchId,
        global_id: &GlobalId,
        name: Option<&str>,
        valid_from_rev: RevisionId,
    ) -> Result<()> {
        self.ensure_label(label).await?;
        let name_lit = format!("'{}'", escape_cypher_string(name.unwrap_or("")));
        let query = format!(
            "/*Q:CREATE_NODE*/ CREATE (n:{label} {{branch_id: {branch_id}, global_id: '{gid}', name: {name_lit}, valid_from_rev: {vf}, valid_to_rev: {sentinel}}}) RETURN n",
            label = label,
            branch_id = branch_id,
            gid = escape_cypher_string(global_id.as_str()),
            name_lit = name_lit,
            vf = valid_from_rev,
            sentinel = GRAPH_OPEN_SENTINEL,
        );
        let rows = self.run(&query).await?;
        if rows.is_empty() {
            return Err(BimAtlasError::Store(format!(
                "graph node creation for {global_id} did not materialize"
            )));
        }
        Ok(())
    }

    /// Closes the open node for `global_id` on `branch_id`, idempotently:
    /// returns `false` (not an error) if no open node was found, which is
    /// the expected self-healing outcome when a prior ingestion already
    /// closed it (§4.3, §9).
    pub async fn close_node(&self, branch_id: BranchId, global_id: &GlobalId, closing_rev: RevisionId) -> Result<bool> {
        let query = format!(
            "/*Q:CLOSE_NODE*/ MATCH (n) WHERE n.branch_id = {branch_id} AND n.global_id = '{gid}' AND n.valid_to_rev = {sentinel} SET n.valid_to_rev = {closing_rev} RETURN n",
            branch_id = branch_id,
            gid = escape_cypher_string(global_id.as_str()),
            sentinel = GRAPH_OPEN_SENTINEL,
            closing_rev = closing_rev,
        );
        Ok(!self.run(&query).await?.is_empty())
    }

    /// Closes every open edge incident to the node for `global_id`,
    /// idempotently. Returns the number of edges closed.
    pub async fn close_edges_for_node(&self, branch_id: BranchId, global_id: &GlobalId, closing_rev: RevisionId) -> Result<usize> {
        let query = format!(
            "/*Q:CLOSE_EDGES*/ MATCH (a)-[e]-(b) WHERE e.branch_id = {branch_id} AND e.valid_to_rev = {sentinel} AND (a.global_id = '{gid}' OR b.global_id = '{gid}') SET e.valid_to_rev = {closing_rev} RETURN e",
            branch_id = branch_id,
            gid = escape_cypher_string(global_id.as_str()),
            sentinel = GRAPH_OPEN_SENTINEL,
            closing_rev = closing_rev,
        );
        Ok(self.run(&query).await?.len())
    }

    /// Creates an edge between the two currently-open nodes for `from`/`to`.
    /// Returns `false` without error when either endpoint is missing — a
    /// dangling reference to be surfaced in diagnostics by the caller, not
    /// a failure (§4.3c).
    pub async fn create_edge(
        &self,
        label: &str,
        branch_id: BranchId,
        from_gid: &GlobalId,
        to_gid: &GlobalId,
        valid_from_rev: RevisionId,
    ) -> Result<bool> {
        self.ensure_label(label).await?;
        let query = format!(
            "/*Q:CREATE_EDGE*/ MATCH (a {{branch_id: {branch_id}, global_id: '{from}', valid_to_rev: {sentinel}}}), (b {{branch_id: {branch_id}, global_id: '{to}', valid_to_rev: {sentinel}}}) CREATE (a)-[r:{label} {{branch_id: {branch_id}, valid_from_rev: {vf}, valid_to_rev: {sentinel}}}]->(b) RETURN r",
            branch_id = branch_id,
            from = escape_cypher_string(from_gid.as_str()),
            to = escape_cypher_string(to_gid.as_str()),
            label = label,
            vf = valid_from_rev,
            sentinel = GRAPH_OPEN_SENTINEL,
        );
        Ok(!self.run(&query).await?.is_empty())
    }

    // ── Reads ──

    pub async fn relations_of(&self, global_id: &GlobalId, rev: RevisionId, branch_id: BranchId) -> Result<Vec<RelationEntry>> {
        let mut entries = Vec::new();

        let out_query = format!(
            "/*Q:RELATIONS_OF_OUT*/ MATCH (n {{global_id: '{gid}'}})-[e]->(o) WHERE {nf} AND {ef} AND {of} RETURN o.global_id AS other_global_id, o.__label AS other_ifc_class, e.__label AS relationship_type",
            gid = escape_cypher_string(global_id.as_str()),
            nf = revision_filter("n", branch_id, rev),
            ef = revision_filter("e", branch_id, rev),
            of = revision_filter("o", branch_id, rev),
        );
        for row in self.run(&out_query).await? {
            entries.push(row_to_relation_entry(&row, Direction::Outgoing)?);
        }

        let in_query = format!(
            "/*Q:RELATIONS_OF_IN*/ MATCH (n {{global_id: '{gid}'}})<-[e]-(o) WHERE {nf} AND {ef} AND {of} RETURN o.global_id AS other_global_id, o.__label AS other_ifc_class, e.__label AS relationship_type",
            gid = escape_cypher_string(global_id.as_str()),
            nf = revision_filter("n", branch_id, rev),
            ef = revision_filter("e", branch_id, rev),
            of = revision_filter("o", branch_id, rev),
        );
        for row in self.run(&in_query).await? {
            entries.push(row_to_relation_entry(&row, Direction::Incoming)?);
        }

        Ok(entries)
    }

    pub async fn spatial_roots(&self, rev: RevisionId, branch_id: BranchId) -> Result<Vec<SpatialNode>> {
        let query = format!(
            "/*Q:SPATIAL_ROOTS*/ MATCH (n:IfcProject) WHERE {nf} RETURN n.global_id AS global_id, n.__label AS ifc_class, n.name AS name",
            nf = revision_filter("n", branch_id, rev),
        );
        self.run(&query).await?.iter().map(row_to_spatial_node).collect()
    }

    pub async fn spatial_children(&self, global_id: &GlobalId, rev: RevisionId, branch_id: BranchId) -> Result<Vec<SpatialNode>> {
        let query = format!(
            "/*Q:SPATIAL_CHILDREN*/ MATCH (n {{global_id: '{gid}'}})-[e:IfcRelAggregates]->(c) WHERE {nf} AND {ef} AND {cf} RETURN c.global_id AS global_id, c.__label AS ifc_class, c.name AS name",
            gid = escape_cypher_string(global_id.as_str()),
            nf = revision_filter("n", branch_id, rev),
            ef = revision_filter("e", branch_id, rev),
            cf = revision_filter("c", branch_id, rev),
        );
        self.run(&query).await?.iter().map(row_to_spatial_node).collect()
    }

    pub async fn contained_elements(&self, spatial_global_id: &GlobalId, rev: RevisionId, branch_id: BranchId) -> Result<Vec<SpatialNode>> {
        let query = format!(
            "/*Q:CONTAINED_ELEMENTS*/ MATCH (n {{global_id: '{gid}'}})-[e:IfcRelContainedInSpatialStructure]->(c) WHERE {nf} AND {ef} AND {cf} RETURN c.global_id AS global_id, c.__label AS ifc_class, c.name AS name",
            gid = escape_cypher_string(spatial_global_id.as_str()),
            nf = revision_filter("n", branch_id, rev),
            ef = revision_filter("e", branch_id, rev),
            cf = revision_filter("c", branch_id, rev),
        );
        self.run(&query).await?.iter().map(row_to_spatial_node).collect()
    }
}

fn row_to_relation_entry(row: &GraphRow, direction: Direction) -> Result<RelationEntry> {
    let other_global_id = row_get(row, "other_global_id")
        .and_then(GraphValue::as_str)
        .ok_or_else(|| BimAtlasError::Store("graph row missing other_global_id".to_string()))?;
    let other_ifc_class = row_get(row, "other_ifc_class")
        .and_then(GraphValue::as_str)
        .ok_or_else(|| BimAtlasError::Store("graph row missing other_ifc_class".to_string()))?
        .to_string();
    let relationship_type = row_get(row, "relationship_type")
        .and_then(GraphValue::as_str)
        .ok_or_else(|| BimAtlasError::Store("graph row missing relationship_type".to_string()))?
        .to_string();
    Ok(RelationEntry {
        other_global_id: GlobalId::new(other_global_id)?,
        other_ifc_class,
        relationship_type,
        direction,
    })
}

fn row_to_spatial_node(row: &GraphRow) -> Result<SpatialNode> {
    let global_id = row_get(row, "global_id")
        .and_then(GraphValue::as_str)
        .ok_or_else(|| BimAtlasError::Store("graph row missing global_id".to_string()))?;
    let ifc_class = row_get(row, "ifc_class")
        .and_then(GraphValue::as_str)
        .ok_or_else(|| BimAtlasError::Store("graph row missing ifc_class".to_string()))?
        .to_string();
    let name = row_get(row, "name").and_then(GraphValue::as_str).map(str::to_string);
    Ok(SpatialNode {
        global_id: GlobalId::new(global_id)?,
        ifc_class,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_backslash_and_quote() {
        assert_eq!(escape_cypher_string(r"a'b\c"), r"a\'b\\c");
    }

    #[test]
    fn revision_filter_uses_sentinel() {
        let f = revision_filter("n", 1, 5);
        assert!(f.contains("n.branch_id = 1"));
        assert!(f.contains("n.valid_to_rev = -1"));
        assert!(f.contains("n.valid_to_rev > 5"));
    }
}
