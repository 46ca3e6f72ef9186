//! Query Layer (§4.5): resolves point/range/tree/diff queries scoped by
//! `(branch, revision)`, joining the relational source of truth with the
//! graph's topological view. `revision` defaults to the branch's latest.

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use tracing::instrument;

use crate::error::{BimAtlasError, Result};
use crate::graph::{GraphClient, GraphExecutor, RelationEntry};
use crate::model::{BranchId, GlobalId, IfcClass, Product, Revision, RevisionId};
use crate::store::relational::{self, RelationalStore};
use crate::stream;

/// Predicates for `QueryLayer::products` (§4.5). All supplied predicates
/// must hold — an empty `Filters` matches every visible product.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub ifc_classes: Option<Vec<IfcClass>>,
    pub contained_in: Option<GlobalId>,
    pub text_match: Option<String>,
}

impl Filters {
    fn matches(&self, product: &Product) -> bool {
        if let Some(classes) = &self.ifc_classes {
            let expanded: Vec<IfcClass> = classes.iter().flat_map(IfcClass::descendants).collect();
            if !expanded.contains(&product.ifc_class) {
                return false;
            }
        }
        if let Some(container) = &self.contained_in {
            if product.contained_in.as_ref() != Some(container) {
                return false;
            }
        }
        if let Some(needle) = &self.text_match {
            let needle = needle.to_lowercase();
            let haystack = [&product.name, &product.object_type, &product.tag, &product.description]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&needle));
            if !haystack {
                return false;
            }
        }
        true
    }
}

/// A product enriched with the graph relations visible at the same
/// `(branch, revision)` (§4.5: "enriched with ... graph relations").
#[derive(Debug, Clone)]
pub struct EnrichedProduct {
    pub product: Product,
    pub relations: Vec<RelationEntry>,
}

#[derive(Debug, Clone)]
pub struct SpatialTreeNode {
    pub global_id: GlobalId,
    pub ifc_class: String,
    pub name: Option<String>,
    pub contained_elements: Vec<SpatialTreeNode>,
    pub spatial_children: Vec<SpatialTreeNode>,
}

#[derive(Debug, Clone, Default)]
pub struct RevisionDiff {
    pub added: Vec<GlobalId>,
    pub modified: Vec<GlobalId>,
    pub deleted: Vec<GlobalId>,
    pub unchanged: Vec<GlobalId>,
}

pub struct QueryLayer<E: GraphExecutor> {
    store: RelationalStore,
    graph: Arc<GraphClient<E>>,
}

impl<E: GraphExecutor> QueryLayer<E> {
    pub fn new(store: RelationalStore, graph: Arc<GraphClient<E>>) -> Self {
        Self { store, graph }
    }

    async fn resolve_revision(&self, branch_id: BranchId, revision: Option<RevisionId>) -> Result<RevisionId> {
        self.store.resolve_revision(branch_id, revision).await
    }

    #[instrument(skip(self))]
    pub async fn product(&self, global_id: &GlobalId, revision: Option<RevisionId>, branch_id: BranchId) -> Result<EnrichedProduct> {
        let rev = self.resolve_revision(branch_id, revision).await?;
        let product = relational::product_at(self.store.pool(), branch_id, global_id, rev).await?;
        let relations = self.graph.relations_of(global_id, rev, branch_id).await?;
        Ok(EnrichedProduct { product, relations })
    }

    #[instrument(skip(self, filters))]
    pub async fn products(&self, revision: Option<RevisionId>, branch_id: BranchId, filters: &Filters) -> Result<Vec<Product>> {
        let rev = self.resolve_revision(branch_id, revision).await?;
        let all = relational::products_visible_at(self.store.pool(), branch_id, rev).await?;
        Ok(all.into_iter().filter(|p| filters.matches(p)).collect())
    }

    #[instrument(skip(self))]
    pub async fn revisions(&self, branch_id: BranchId) -> Result<Vec<Revision>> {
        self.store.list_revisions(branch_id).await
    }

    /// Resolves `filters` and hands the matching products to the Streaming
    /// Layer. The returned stream owns its data and does not borrow `self`.
    #[instrument(skip(self, filters))]
    pub async fn stream_products(
        &self,
        revision: Option<RevisionId>,
        branch_id: BranchId,
        filters: &Filters,
        include_mesh: bool,
    ) -> Result<impl Stream<Item = String>> {
        let products = self.products(revision, branch_id, filters).await?;
        Ok(stream::stream_products(products, include_mesh))
    }

    /// Root-down recursive tree of spatial containers with their directly
    /// contained elements (§4.5). Graph-only: a product's spatial ancestry
    /// is a topological property the relational store does not index.
    #[instrument(skip(self))]
    pub async fn spatial_tree(&self, revision: Option<RevisionId>, branch_id: BranchId) -> Result<Vec<SpatialTreeNode>> {
        let rev = self.resolve_revision(branch_id, revision).await?;
        let roots = self.graph.spatial_roots(rev, branch_id).await?;
        let mut nodes = Vec::with_capacity(roots.len());
        for root in roots {
            nodes.push(self.build_spatial_subtree(&root.global_id, root.ifc_class, root.name, rev, branch_id).await?);
        }
        Ok(nodes)
    }

    fn build_spatial_subtree<'a>(
        &'a self,
        global_id: &'a GlobalId,
        ifc_class: String,
        name: Option<String>,
        rev: RevisionId,
        branch_id: BranchId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<SpatialTreeNode>> + 'a>> {
        Box::pin(async move {
            let spatial_children = self.graph.spatial_children(global_id, rev, branch_id).await?;
            let contained_elements = self.graph.contained_elements(global_id, rev, branch_id).await?;

            let mut child_nodes = Vec::with_capacity(spatial_children.len());
            for child in spatial_children {
                child_nodes.push(
                    self.build_spatial_subtree(&child.global_id, child.ifc_class, child.name, rev, branch_id)
                        .await?,
                );
            }

            let contained_nodes = contained_elements
                .into_iter()
                .map(|e| SpatialTreeNode {
                    global_id: e.global_id,
                    ifc_class: e.ifc_class,
                    name: e.name,
                    contained_elements: Vec::new(),
                    spatial_children: Vec::new(),
                })
                .collect();

            Ok(SpatialTreeNode {
                global_id: global_id.clone(),
                ifc_class,
                name,
                contained_elements: contained_nodes,
                spatial_children: child_nodes,
            })
        })
    }

    /// Symmetric SCD2 diff between two revisions of the same branch
    /// (§4.5): added/deleted by visibility, modified by surrogate-id
    /// change, else unchanged.
    #[instrument(skip(self))]
    pub async fn revision_diff(&self, from_rev: RevisionId, to_rev: RevisionId, branch_id: BranchId) -> Result<RevisionDiff> {
        if from_rev == to_rev {
            return Err(BimAtlasError::validation("revision_diff requires two distinct revisions"));
        }
        let rows = relational::products_overlapping(self.store.pool(), branch_id, from_rev, to_rev).await?;

        let mut by_gid: HashMap<GlobalId, Vec<&crate::model::Product>> = HashMap::new();
        for row in &rows {
            by_gid.entry(row.global_id.clone()).or_default().push(row);
        }

        let mut diff = RevisionDiff::default();
        for (gid, versions) in &by_gid {
            let from_row = versions.iter().find(|p| p.visible_at(from_rev));
            let to_row = versions.iter().find(|p| p.visible_at(to_rev));
            match (from_row, to_row) {
                (None, Some(_)) => diff.added.push(gid.clone()),
                (Some(_), None) => diff.deleted.push(gid.clone()),
                (Some(a), Some(b)) => {
                    if a.surrogate_id == b.surrogate_id {
                        diff.unchanged.push(gid.clone());
                    } else {
                        diff.modified.push(gid.clone());
                    }
                }
                (None, None) => {}
            }
        }

        diff.added.sort();
        diff.modified.sort();
        diff.deleted.sort();
        diff.unchanged.sort();
        Ok(diff)
    }
}
