//! Project/Branch Catalog (§4.7): CRUD surface for projects and branches.
//! A thin, named façade over the relational primitives in `store::relational`
//! — kept separate so the catalog's contract (naming uniqueness, atomic
//! project+branch creation, "branches always start empty") reads as its own
//! component rather than being buried in storage plumbing.

use crate::error::Result;
use crate::model::{Branch, BranchId, Project, ProjectId};
use crate::store::relational::RelationalStore;

pub struct Catalog {
    store: RelationalStore,
}

impl Catalog {
    pub fn new(store: RelationalStore) -> Self {
        Self { store }
    }

    /// Creates a project and its `main` branch in one transaction.
    pub async fn create_project(&self, name: &str, description: Option<&str>) -> Result<(Project, Branch)> {
        self.store.create_project(name, description).await
    }

    /// Fails with `DuplicateName` on `(project_id, name)` conflict. The new
    /// branch starts with no revisions, no products, no graph nodes —
    /// nothing is copied from any existing branch.
    pub async fn create_branch(&self, project_id: ProjectId, name: &str) -> Result<Branch> {
        self.store.create_branch(project_id, name).await
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.store.get_project(id).await
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<Branch> {
        self.store.get_branch(id).await
    }

    pub async fn get_branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Branch> {
        self.store.get_branch_by_name(project_id, name).await
    }

    pub async fn list_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        self.store.list_branches(project_id).await
    }

    /// Cascades to every branch, revision, and product row beneath the
    /// project (enforced by the `ON DELETE CASCADE` foreign keys in the
    /// relational schema). Graph-side cleanup is not attempted here — see
    /// the open question on graph purge strategy.
    pub async fn delete_project(&self, id: ProjectId) -> Result<()> {
        self.store.delete_project(id).await
    }
}
