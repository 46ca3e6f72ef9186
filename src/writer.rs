//! Revision Writer (§4.3): the only component allowed to mutate storage.
//! Writes the relational delta inside one transaction — the point of
//! truth — then mirrors into the graph best-effort, diagnosing rather than
//! failing when the mirror falls behind.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::diff::{self, DiffCounts};
use crate::error::Result;
use crate::extractor::{self, Diagnostics, Severity, TessellationEngine};
use crate::graph::{GraphClient, GraphExecutor};
use crate::lock::BranchLocks;
use crate::model::{BranchId, GlobalId, ProductRecord, RevisionId};
use crate::store::relational::{self, RelationalStore};

#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub revision_id: RevisionId,
    pub counts: DiffCounts,
    pub edges_created: usize,
    pub diagnostics: Diagnostics,
}

pub struct RevisionWriter<E: GraphExecutor> {
    store: RelationalStore,
    graph: Arc<GraphClient<E>>,
    locks: BranchLocks,
    tessellator: Box<dyn TessellationEngine>,
}

impl<E: GraphExecutor> RevisionWriter<E> {
    pub fn new(store: RelationalStore, graph: Arc<GraphClient<E>>, tessellator: Box<dyn TessellationEngine>) -> Self {
        Self {
            store,
            graph,
            locks: BranchLocks::new(),
            tessellator,
        }
    }

    pub fn store(&self) -> &RelationalStore {
        &self.store
    }

    /// Runs the §4.3 algorithm end to end. Ingestions on distinct branches
    /// run concurrently; ingestions on the same branch serialize on the
    /// per-branch advisory lock.
    #[instrument(skip(self), fields(branch_id, revision_id))]
    pub async fn ingest(&self, ifc_path: &Path, branch_id: BranchId, label: Option<&str>) -> Result<IngestionResult> {
        let _guard = self.locks.acquire(branch_id).await;

        let source_filename = ifc_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| ifc_path.to_string_lossy().to_string());

        let extraction = extractor::extract(ifc_path, self.tessellator.as_ref())?;
        let mut diagnostics = extraction.diagnostics;

        let records_by_gid: HashMap<GlobalId, &ProductRecord> =
            extraction.products.iter().map(|r| (r.global_id.clone(), r)).collect();

        let mut new_snapshot = HashMap::with_capacity(extraction.products.len());
        for rec in &extraction.products {
            let hash = extractor::content_hash(
                &rec.ifc_class,
                rec.name.as_deref(),
                rec.description.as_deref(),
                rec.object_type.as_deref(),
                rec.tag.as_deref(),
                rec.contained_in.as_ref(),
                &rec.mesh,
            );
            new_snapshot.insert(rec.global_id.clone(), hash);
        }

        let mut tx = self.store.begin().await?;
        let revision_id = relational::insert_revision_tx(&mut tx, branch_id, label, &source_filename).await?;

        let open_rows = relational::open_rows_tx(&mut tx, branch_id).await?;
        let open_hashes: HashMap<GlobalId, String> =
            open_rows.into_iter().map(|(gid, (_, hash))| (gid, hash)).collect();

        let diff_result = diff::diff(&open_hashes, &new_snapshot);

        for gid in diff_result.modified.iter().chain(diff_result.deleted.iter()) {
            relational::close_open_row_tx(&mut tx, branch_id, gid, revision_id).await?;
        }

        for gid in diff_result.added.iter().chain(diff_result.modified.iter()) {
            let record = records_by_gid
                .get(gid)
                .expect("added/modified global_id always has an extracted record");
            let hash = new_snapshot
                .get(gid)
                .expect("added/modified global_id always has a freshly computed hash");
            relational::insert_product_tx(&mut tx, branch_id, record, hash, revision_id).await?;
        }

        tx.commit().await?;
        info!(revision_id, added = diff_result.added.len(), modified = diff_result.modified.len(), deleted = diff_result.deleted.len(), "relational delta committed");

        let changed: HashSet<&GlobalId> = diff_result
            .added
            .iter()
            .chain(diff_result.modified.iter())
            .collect();

        for gid in diff_result.modified.iter().chain(diff_result.deleted.iter()) {
            if let Err(e) = self.graph.close_node(branch_id, gid, revision_id).await {
                warn!(%gid, error = %e, "graph node close failed, will self-heal on next ingestion");
                diagnostics.record(Severity::Warning, "GRAPH_CLOSE_NODE_FAILED", e.message(), Some(gid.clone()));
            }
            if let Err(e) = self.graph.close_edges_for_node(branch_id, gid, revision_id).await {
                warn!(%gid, error = %e, "graph edge close failed, will self-heal on next ingestion");
                diagnostics.record(Severity::Warning, "GRAPH_CLOSE_EDGES_FAILED", e.message(), Some(gid.clone()));
            }
        }

        for gid in diff_result.added.iter().chain(diff_result.modified.iter()) {
            let record = records_by_gid
                .get(gid)
                .expect("added/modified global_id always has an extracted record");
            if let Err(e) = self
                .graph
                .create_node(record.ifc_class.as_str(), branch_id, gid, record.name.as_deref(), revision_id)
                .await
            {
                warn!(%gid, error = %e, "graph node creation failed, will self-heal on next ingestion");
                diagnostics.record(Severity::Warning, "GRAPH_CREATE_NODE_FAILED", e.message(), Some(gid.clone()));
            }
        }

        let mut edges_created = 0usize;
        for rel in &extraction.relationships {
            if !changed.contains(&rel.from_global_id) && !changed.contains(&rel.to_global_id) {
                continue;
            }
            match self
                .graph
                .create_edge(
                    rel.relationship_type.as_str(),
                    branch_id,
                    &rel.from_global_id,
                    &rel.to_global_id,
                    revision_id,
                )
                .await
            {
                Ok(true) => edges_created += 1,
                Ok(false) => diagnostics.record(
                    Severity::Warning,
                    "DANGLING_RELATIONSHIP",
                    format!(
                        "edge {} -> {} ({}) skipped: endpoint not present in the graph",
                        rel.from_global_id,
                        rel.to_global_id,
                        rel.relationship_type.as_str()
                    ),
                    Some(rel.from_global_id.clone()),
                ),
                Err(e) => {
                    warn!(from = %rel.from_global_id, to = %rel.to_global_id, error = %e, "graph edge creation failed");
                    diagnostics.record(Severity::Warning, "GRAPH_CREATE_EDGE_FAILED", e.message(), Some(rel.from_global_id.clone()));
                }
            }
        }

        Ok(IngestionResult {
            revision_id,
            counts: diff_result.counts(),
            edges_created,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::NullTessellator;
    use crate::graph::FakeGraphExecutor;

    // Exercises only the pieces that don't require a live Postgres: lock
    // acquisition and the writer's own bookkeeping around it. The
    // transactional ingest path is covered by `tests/ingestion.rs` against
    // a live database.
    #[tokio::test]
    async fn writer_holds_the_branch_lock_for_the_duration_of_ingest() {
        let locks = BranchLocks::new();
        let _guard = locks.acquire(1).await;
        // A second acquire on the same branch would block; dropping the
        // first guard releases it. This indirectly documents the
        // serialization contract `RevisionWriter::ingest` relies on.
        drop(_guard);
        let _guard2 = locks.acquire(1).await;
    }

    #[allow(dead_code)]
    fn assert_writer_is_generic_over_executor(_w: &RevisionWriter<FakeGraphExecutor>) {}

    #[allow(dead_code)]
    fn assert_null_tessellator_is_usable() {
        let _t: Box<dyn TessellationEngine> = Box::new(NullTessellator);
    }
}
