//! Relational storage schema and primitives (§6 "Persisted state layout").
//! This is the authoritative backend (§4.3 step 6) — every invariant in §8
//! that can be enforced relationally is enforced here, via `UNIQUE`
//! constraints and explicit pre-update assertions rather than trust.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;

use crate::error::{BimAtlasError, Result};
use crate::model::{
    Branch, BranchId, GlobalId, IfcClass, Product, ProductRecord, Project, ProjectId, Revision,
    RevisionId,
};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    id BIGSERIAL PRIMARY KEY,
    project_id BIGINT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, name)
);

CREATE TABLE IF NOT EXISTS revisions (
    id BIGSERIAL PRIMARY KEY,
    branch_id BIGINT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    label TEXT,
    source_filename TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS ifc_products (
    id BIGSERIAL PRIMARY KEY,
    branch_id BIGINT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    global_id TEXT NOT NULL,
    ifc_class TEXT NOT NULL,
    name TEXT,
    description TEXT,
    object_type TEXT,
    tag TEXT,
    contained_in TEXT,
    vertices BYTEA NOT NULL,
    normals BYTEA NOT NULL,
    faces BYTEA NOT NULL,
    matrix BYTEA NOT NULL,
    content_hash TEXT NOT NULL,
    valid_from_rev BIGINT NOT NULL,
    valid_to_rev BIGINT,
    UNIQUE (branch_id, global_id, valid_from_rev)
);

CREATE INDEX IF NOT EXISTS ifc_products_open_idx ON ifc_products (branch_id, global_id) WHERE valid_to_rev IS NULL;
CREATE INDEX IF NOT EXISTS ifc_products_class_idx ON ifc_products (branch_id, ifc_class, valid_to_rev);
CREATE INDEX IF NOT EXISTS ifc_products_container_idx ON ifc_products (branch_id, contained_in);
CREATE INDEX IF NOT EXISTS ifc_products_window_idx ON ifc_products (branch_id, valid_from_rev, valid_to_rev);
"#;

#[derive(Clone)]
pub struct RelationalStore {
    pool: PgPool,
}

impl RelationalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| BimAtlasError::Store(format!("failed to connect: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| BimAtlasError::Store(format!("schema init failed: {e}")))?;
        Ok(())
    }

    // ── Catalog (§4.7) ──

    /// Creates a project and its `main` branch atomically.
    pub async fn create_project(&self, name: &str, description: Option<&str>) -> Result<(Project, Branch)> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let project_row = sqlx::query("INSERT INTO projects (name, description, created_at) VALUES ($1, $2, $3) RETURNING id")
            .bind(name)
            .bind(description)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
        let project_id: ProjectId = project_row.get("id");

        let branch = insert_branch_tx(&mut tx, project_id, "main", now).await?;
        tx.commit().await?;

        Ok((
            Project {
                id: project_id,
                name: name.to_string(),
                description: description.map(str::to_string),
                created_at: now,
            },
            branch,
        ))
    }

    pub async fn create_branch(&self, project_id: ProjectId, name: &str) -> Result<Branch> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let branch = insert_branch_tx(&mut tx, project_id, name, now).await?;
        tx.commit().await?;
        Ok(branch)
    }

    pub async fn get_project(&self, id: ProjectId) -> Result<Project> {
        let row = sqlx::query("SELECT id, name, description, created_at FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BimAtlasError::not_found(format!("project {id}")))?;
        Ok(Project {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        })
    }

    pub async fn get_branch(&self, id: BranchId) -> Result<Branch> {
        let row = sqlx::query("SELECT id, project_id, name, created_at FROM branches WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BimAtlasError::not_found(format!("branch {id}")))?;
        Ok(row_to_branch(row))
    }

    pub async fn get_branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Branch> {
        let row = sqlx::query("SELECT id, project_id, name, created_at FROM branches WHERE project_id = $1 AND name = $2")
            .bind(project_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BimAtlasError::not_found(format!("branch {name:?} in project {project_id}")))?;
        Ok(row_to_branch(row))
    }

    pub async fn list_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        let rows = sqlx::query("SELECT id, project_id, name, created_at FROM branches WHERE project_id = $1 ORDER BY id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_branch).collect())
    }

    pub async fn delete_project(&self, id: ProjectId) -> Result<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1").bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(BimAtlasError::not_found(format!("project {id}")));
        }
        Ok(())
    }

    // ── Revisions ──

    pub async fn list_revisions(&self, branch_id: BranchId) -> Result<Vec<Revision>> {
        let rows = sqlx::query(
            "SELECT id, branch_id, label, source_filename, created_at FROM revisions WHERE branch_id = $1 ORDER BY id",
        )
        .bind(branch_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Revision {
                id: row.get("id"),
                branch_id: row.get("branch_id"),
                label: row.get("label"),
                source_filename: row.get("source_filename"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    pub async fn latest_revision(&self, branch_id: BranchId) -> Result<Option<RevisionId>> {
        let row = sqlx::query("SELECT MAX(id) as max_id FROM revisions WHERE branch_id = $1")
            .bind(branch_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i64>, _>("max_id"))
    }

    pub async fn resolve_revision(&self, branch_id: BranchId, revision: Option<RevisionId>) -> Result<RevisionId> {
        match revision {
            Some(r) => Ok(r),
            None => self
                .latest_revision(branch_id)
                .await?
                .ok_or_else(|| BimAtlasError::not_found(format!("branch {branch_id} has no revisions"))),
        }
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}

async fn insert_branch_tx(
    tx: &mut Transaction<'_, Postgres>,
    project_id: ProjectId,
    name: &str,
    now: chrono::DateTime<Utc>,
) -> Result<Branch> {
    let row = sqlx::query("INSERT INTO branches (project_id, name, created_at) VALUES ($1, $2, $3) RETURNING id")
        .bind(project_id)
        .bind(name)
        .bind(now)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BimAtlasError::duplicate_name(format!("branch {name:?} already exists in project {project_id}"))
            } else {
                BimAtlasError::from(e)
            }
        })?;
    Ok(Branch {
        id: row.get("id"),
        project_id,
        name: name.to_string(),
        created_at: now,
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn row_to_branch(row: sqlx::postgres::PgRow) -> Branch {
    Branch {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn row_to_product(row: sqlx::postgres::PgRow) -> Product {
    let ifc_class_str: String = row.get("ifc_class");
    let contained_in: Option<String> = row.get("contained_in");
    Product {
        surrogate_id: row.get("id"),
        branch_id: row.get("branch_id"),
        global_id: GlobalId::new(row.get::<String, _>("global_id")).expect("stored global_id is always valid"),
        ifc_class: IfcClass::from_str(&ifc_class_str),
        name: row.get("name"),
        description: row.get("description"),
        object_type: row.get("object_type"),
        tag: row.get("tag"),
        contained_in: contained_in.map(|s| GlobalId::new(s).expect("stored contained_in is always valid")),
        vertices: row.get("vertices"),
        normals: row.get("normals"),
        faces: row.get("faces"),
        matrix: row.get("matrix"),
        content_hash: row.get("content_hash"),
        valid_from_rev: row.get("valid_from_rev"),
        valid_to_rev: row.get("valid_to_rev"),
    }
}

// ── Ingestion-time primitives (§4.3), operating on an open transaction ──

pub async fn insert_revision_tx(
    tx: &mut Transaction<'_, Postgres>,
    branch_id: BranchId,
    label: Option<&str>,
    source_filename: &str,
) -> Result<RevisionId> {
    let row = sqlx::query(
        "INSERT INTO revisions (branch_id, label, source_filename, created_at) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(branch_id)
    .bind(label)
    .bind(source_filename)
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

/// Currently-open `(global_id -> (surrogate_id, content_hash))` rows for a
/// branch. The Diff Engine only ever sees this set (§4.2).
pub async fn open_rows_tx(
    tx: &mut Transaction<'_, Postgres>,
    branch_id: BranchId,
) -> Result<HashMap<GlobalId, (i64, String)>> {
    let rows = sqlx::query(
        "SELECT id, global_id, content_hash FROM ifc_products WHERE branch_id = $1 AND valid_to_rev IS NULL",
    )
    .bind(branch_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        let gid = GlobalId::new(row.get::<String, _>("global_id")).expect("stored global_id is always valid");
        map.insert(gid, (row.get::<i64, _>("id"), row.get::<String, _>("content_hash")));
    }
    Ok(map)
}

/// Closes the open row for `global_id` on `branch_id`, asserting the
/// open-window invariant held beforehand (§4.3 step 4, §8).
pub async fn close_open_row_tx(
    tx: &mut Transaction<'_, Postgres>,
    branch_id: BranchId,
    global_id: &GlobalId,
    closing_rev: RevisionId,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE ifc_products SET valid_to_rev = $1 WHERE branch_id = $2 AND global_id = $3 AND valid_to_rev IS NULL",
    )
    .bind(closing_rev)
    .bind(branch_id)
    .bind(global_id.as_str())
    .execute(&mut **tx)
    .await?;

    match result.rows_affected() {
        1 => Ok(()),
        0 => Err(BimAtlasError::Store(format!(
            "open-window invariant violated: no open row for {global_id} on branch {branch_id}"
        ))),
        n => Err(BimAtlasError::Store(format!(
            "open-window invariant violated: {n} open rows for {global_id} on branch {branch_id}"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_product_tx(
    tx: &mut Transaction<'_, Postgres>,
    branch_id: BranchId,
    record: &ProductRecord,
    content_hash: &str,
    valid_from_rev: RevisionId,
) -> Result<i64> {
    let row = sqlx::query(
        r#"INSERT INTO ifc_products
            (branch_id, global_id, ifc_class, name, description, object_type, tag, contained_in,
             vertices, normals, faces, matrix, content_hash, valid_from_rev, valid_to_rev)
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,NULL)
           RETURNING id"#,
    )
    .bind(branch_id)
    .bind(record.global_id.as_str())
    .bind(record.ifc_class.as_str())
    .bind(&record.name)
    .bind(&record.description)
    .bind(&record.object_type)
    .bind(&record.tag)
    .bind(record.contained_in.as_ref().map(GlobalId::as_str))
    .bind(record.mesh.vertices_bytes())
    .bind(record.mesh.normals_bytes())
    .bind(record.mesh.faces_bytes())
    .bind(record.mesh.matrix_bytes())
    .bind(content_hash)
    .bind(valid_from_rev)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

// ── Query-layer read primitives (§4.5) ──

pub async fn product_at(
    pool: &PgPool,
    branch_id: BranchId,
    global_id: &GlobalId,
    rev: RevisionId,
) -> Result<Product> {
    let row = sqlx::query(
        "SELECT * FROM ifc_products WHERE branch_id = $1 AND global_id = $2 AND valid_from_rev <= $3 AND (valid_to_rev IS NULL OR valid_to_rev > $3)",
    )
    .bind(branch_id)
    .bind(global_id.as_str())
    .bind(rev)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| BimAtlasError::not_found(format!("product {global_id} at revision {rev}")))?;
    Ok(row_to_product(row))
}

pub async fn products_visible_at(pool: &PgPool, branch_id: BranchId, rev: RevisionId) -> Result<Vec<Product>> {
    let rows = sqlx::query(
        "SELECT * FROM ifc_products WHERE branch_id = $1 AND valid_from_rev <= $2 AND (valid_to_rev IS NULL OR valid_to_rev > $2) ORDER BY global_id",
    )
    .bind(branch_id)
    .bind(rev)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_product).collect())
}

/// All rows (any window) for a branch whose validity window overlaps
/// `[min(from,to), max(from,to)]` — the input to `revision_diff` (§4.5).
pub async fn products_overlapping(
    pool: &PgPool,
    branch_id: BranchId,
    from_rev: RevisionId,
    to_rev: RevisionId,
) -> Result<Vec<Product>> {
    let lo = from_rev.min(to_rev);
    let hi = from_rev.max(to_rev);
    let rows = sqlx::query(
        "SELECT * FROM ifc_products WHERE branch_id = $1 AND valid_from_rev <= $2 AND (valid_to_rev IS NULL OR valid_to_rev > $3) ORDER BY global_id",
    )
    .bind(branch_id)
    .bind(hi)
    .bind(lo)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_product).collect())
}
