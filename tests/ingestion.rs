//! End-to-end scenarios against a live Postgres, one fresh database per
//! test via `#[sqlx::test]`. The graph side is a `FakeGraphExecutor` —
//! sufficient to exercise the Revision Writer's mirroring contract without
//! an external graph deployment.

use std::io::Write as _;
use std::sync::Arc;

use sqlx::PgPool;
use tempfile::NamedTempFile;

use bimatlas_core::extractor::NullTessellator;
use bimatlas_core::graph::{FakeGraphExecutor, GraphClient};
use bimatlas_core::model::GlobalId;
use bimatlas_core::query::{Filters, QueryLayer};
use bimatlas_core::store::RelationalStore;
use bimatlas_core::writer::RevisionWriter;
use bimatlas_core::ErrorKind;

const WALL_GID: &str = "2O2Fr$t4X7Zf8NOew3FL9r";
const STOREY_GID: &str = "1XS$$$$$$$$$$$$$$$$$$$";
const PROJECT_GID: &str = "0o2Fr$t4X7Zf8NOew3FLA1";
const BEAM_GID: &str = "3ABC$$$$$$$$$$$$$$$$$$";

fn write_fixture(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().expect("create temp fixture");
    f.write_all(contents.as_bytes()).expect("write fixture");
    f
}

fn wall_and_storey(wall_name: &str) -> String {
    format!(
        "#1=IFCBUILDINGSTOREY('{STOREY_GID}',$,'Level 1',$,$,$,$,$,$);\n\
         #2=IFCWALL('{WALL_GID}',$,'{wall_name}',$,$,$,$,'TAG-1');\n\
         #3=IFCRELCONTAINEDINSPATIALSTRUCTURE('r1',$,$,$,(#2),#1);\n"
    )
}

fn storey_only() -> String {
    format!("#1=IFCBUILDINGSTOREY('{STOREY_GID}',$,'Level 1',$,$,$,$,$,$);\n")
}

fn beam_only() -> String {
    format!("#1=IFCBEAM('{BEAM_GID}',$,'Beam A',$,$,$,$,'TAG-B');\n")
}

fn setup(pool: PgPool) -> (RevisionWriter<FakeGraphExecutor>, QueryLayer<FakeGraphExecutor>, RelationalStore) {
    let store = RelationalStore::new(pool);
    let graph = Arc::new(GraphClient::new(FakeGraphExecutor::new()));
    let writer = RevisionWriter::new(store.clone(), graph.clone(), Box::new(NullTessellator));
    let query = QueryLayer::new(store.clone(), graph);
    (writer, query, store)
}

#[sqlx::test]
async fn empty_branch_time_travel(pool: PgPool) {
    let (_, query, store) = setup(pool);
    store.init_schema().await.unwrap();

    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let gid = GlobalId::new(WALL_GID).unwrap();
    let err = query.product(&gid, None, branch.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert!(query.revisions(branch.id).await.unwrap().is_empty());
}

#[sqlx::test]
async fn single_ingestion_creates_two_products_and_one_edge(pool: PgPool) {
    let (writer, _query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let fixture = write_fixture(&wall_and_storey("Wall A"));
    let result = writer.ingest(fixture.path(), branch.id, None).await.unwrap();

    assert_eq!(result.counts.added, 2);
    assert_eq!(result.counts.modified, 0);
    assert_eq!(result.counts.deleted, 0);
    assert_eq!(result.counts.unchanged, 0);
    assert_eq!(result.edges_created, 1);
}

#[sqlx::test]
async fn modifying_an_element_closes_and_reopens_its_row(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let first = write_fixture(&wall_and_storey("Wall A"));
    writer.ingest(first.path(), branch.id, None).await.unwrap();

    let second = write_fixture(&wall_and_storey("Wall A'"));
    let result = writer.ingest(second.path(), branch.id, None).await.unwrap();

    assert_eq!(result.counts.added, 0);
    assert_eq!(result.counts.modified, 1);
    assert_eq!(result.counts.deleted, 0);
    assert_eq!(result.counts.unchanged, 1);

    let gid = GlobalId::new(WALL_GID).unwrap();
    let at_rev1 = query.product(&gid, Some(1), branch.id).await.unwrap();
    assert_eq!(at_rev1.product.name.as_deref(), Some("Wall A"));
    let at_rev2 = query.product(&gid, Some(2), branch.id).await.unwrap();
    assert_eq!(at_rev2.product.name.as_deref(), Some("Wall A'"));
}

#[sqlx::test]
async fn deleting_an_element_closes_its_row_without_a_successor(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let first = write_fixture(&wall_and_storey("Wall A"));
    writer.ingest(first.path(), branch.id, None).await.unwrap();
    let renamed = write_fixture(&wall_and_storey("Wall A'"));
    writer.ingest(renamed.path(), branch.id, None).await.unwrap();

    let without_wall = write_fixture(&storey_only());
    let result = writer.ingest(without_wall.path(), branch.id, None).await.unwrap();

    assert_eq!(result.counts.added, 0);
    assert_eq!(result.counts.modified, 0);
    assert_eq!(result.counts.deleted, 1);
    assert_eq!(result.counts.unchanged, 1);

    let gid = GlobalId::new(WALL_GID).unwrap();
    assert_eq!(query.product(&gid, Some(3), branch.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    let at_rev2 = query.product(&gid, Some(2), branch.id).await.unwrap();
    assert_eq!(at_rev2.product.name.as_deref(), Some("Wall A'"));
}

#[sqlx::test]
async fn branches_are_isolated(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (project, main_branch) = store.create_project("P", None).await.unwrap();
    let structural_branch = store.create_branch(project.id, "structural").await.unwrap();

    let wall_fixture = write_fixture(&wall_and_storey("Wall A"));
    writer.ingest(wall_fixture.path(), main_branch.id, None).await.unwrap();

    let beam_fixture = write_fixture(&beam_only());
    writer.ingest(beam_fixture.path(), structural_branch.id, None).await.unwrap();

    let main_products = query.products(None, main_branch.id, &Filters::default()).await.unwrap();
    assert!(main_products.iter().any(|p| p.global_id.as_str() == WALL_GID));
    assert!(!main_products.iter().any(|p| p.global_id.as_str() == BEAM_GID));

    let structural_products = query.products(None, structural_branch.id, &Filters::default()).await.unwrap();
    assert!(structural_products.iter().any(|p| p.global_id.as_str() == BEAM_GID));
    assert!(!structural_products.iter().any(|p| p.global_id.as_str() == WALL_GID));
}

#[sqlx::test]
async fn spatial_tree_follows_graph_mirrored_containment(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let fixture = write_fixture(&format!(
        "#1=IFCPROJECT('{PROJECT_GID}',$,'Project',$,$,$,$,$,$);\n\
         #2=IFCBUILDINGSTOREY('{STOREY_GID}',$,'Level 1',$,$,$,$,$,$);\n\
         #3=IFCWALL('{WALL_GID}',$,'Wall A',$,$,$,$,'TAG-1');\n\
         #4=IFCRELAGGREGATES('r1',$,$,$,#1,(#2));\n\
         #5=IFCRELCONTAINEDINSPATIALSTRUCTURE('r2',$,$,$,(#3),#2);\n"
    ));
    writer.ingest(fixture.path(), branch.id, None).await.unwrap();

    let tree = query.spatial_tree(None, branch.id).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].global_id.as_str(), PROJECT_GID);
    assert_eq!(tree[0].spatial_children.len(), 1);
    let storey = &tree[0].spatial_children[0];
    assert_eq!(storey.global_id.as_str(), STOREY_GID);
    assert_eq!(storey.contained_elements.len(), 1);
    assert_eq!(storey.contained_elements[0].global_id.as_str(), WALL_GID);
}

#[sqlx::test]
async fn streaming_filters_to_matching_ifc_class(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let first = write_fixture(&wall_and_storey("Wall A"));
    writer.ingest(first.path(), branch.id, None).await.unwrap();
    let renamed = write_fixture(&wall_and_storey("Wall A'"));
    writer.ingest(renamed.path(), branch.id, None).await.unwrap();

    use bimatlas_core::model::IfcClass;
    use futures::StreamExt;

    let filters = Filters {
        ifc_classes: Some(vec![IfcClass::IfcWall]),
        contained_in: None,
        text_match: None,
    };
    let frames: Vec<String> = query
        .stream_products(Some(2), branch.id, &filters, true)
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(frames.len(), 3);
    assert!(frames[0].contains("\"total\":1"));
    assert!(frames[1].contains("Wall A'"));
    assert!(frames[2].contains("\"type\":\"end\""));
}

#[sqlx::test]
async fn revision_diff_is_symmetric_and_empty_for_identical_revisions(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let first = write_fixture(&wall_and_storey("Wall A"));
    writer.ingest(first.path(), branch.id, None).await.unwrap();
    let renamed = write_fixture(&wall_and_storey("Wall A'"));
    writer.ingest(renamed.path(), branch.id, None).await.unwrap();
    let without_wall = write_fixture(&storey_only());
    writer.ingest(without_wall.path(), branch.id, None).await.unwrap();

    // rev1 -> rev2: wall modified (renamed), storey unchanged.
    let forward = query.revision_diff(1, 2, branch.id).await.unwrap();
    assert_eq!(forward.modified, vec![GlobalId::new(WALL_GID).unwrap()]);
    assert!(forward.added.is_empty());
    assert!(forward.deleted.is_empty());

    // Diff symmetry: added/deleted swap, modified/unchanged hold across direction.
    let backward = query.revision_diff(2, 1, branch.id).await.unwrap();
    assert_eq!(forward.added, backward.deleted);
    assert_eq!(forward.deleted, backward.added);
    assert_eq!(forward.modified, backward.modified);
    assert_eq!(forward.unchanged, backward.unchanged);

    // rev2 -> rev3: wall deleted.
    let deletion = query.revision_diff(2, 3, branch.id).await.unwrap();
    assert_eq!(deletion.deleted, vec![GlobalId::new(WALL_GID).unwrap()]);

    // Re-ingesting an identical file creates rev4 with no visible change, so
    // the diff across it is empty for every bucket.
    let unchanged_again = write_fixture(&storey_only());
    writer.ingest(unchanged_again.path(), branch.id, None).await.unwrap();
    let no_op = query.revision_diff(3, 4, branch.id).await.unwrap();
    assert!(no_op.added.is_empty());
    assert!(no_op.modified.is_empty());
    assert!(no_op.deleted.is_empty());
    assert_eq!(no_op.unchanged.len(), 1);
}

#[sqlx::test]
async fn reingesting_an_identical_file_is_idempotent_but_writes_a_new_revision(pool: PgPool) {
    let (writer, query, store) = setup(pool);
    store.init_schema().await.unwrap();
    let (_project, branch) = store.create_project("P", None).await.unwrap();

    let fixture_text = wall_and_storey("Wall A");
    let first = write_fixture(&fixture_text);
    let first_result = writer.ingest(first.path(), branch.id, None).await.unwrap();
    assert_eq!(first_result.counts.added, 2);

    let second = write_fixture(&fixture_text);
    let second_result = writer.ingest(second.path(), branch.id, None).await.unwrap();

    assert_eq!(second_result.counts.added, 0);
    assert_eq!(second_result.counts.modified, 0);
    assert_eq!(second_result.counts.deleted, 0);
    assert_eq!(second_result.counts.unchanged, 2);

    let revisions = query.revisions(branch.id).await.unwrap();
    assert_eq!(revisions.len(), 2);
}
