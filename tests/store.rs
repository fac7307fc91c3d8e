mod common;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;
use tempfile::TempDir;

use kira_expression_ingest::dense::DenseIngestor;
use kira_expression_ingest::error::{GatewayError, IngestError};
use kira_expression_ingest::gateway::{GENES_COLLECTION, PersistenceGateway};
use kira_expression_ingest::ingest::{ExpressionIngestor, IngestContext};
use kira_expression_ingest::retry::RetryPolicy;
use kira_expression_ingest::store::JsonStore;

use common::{STUDY_FILE_ID, options, write_fixture};

fn temp_store(dir: &TempDir) -> JsonStore {
    let root = Utf8PathBuf::from_path_buf(dir.path().join("store")).unwrap();
    let store = JsonStore::new_with_root(root);
    store.ensure_root().unwrap();
    store
}

#[test]
fn insert_then_find_with_projection() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    store
        .insert_many(
            &[
                json!({"_id": "a", "name": "G1", "tags": ["x", "y"]}),
                json!({"_id": "b", "name": "G2", "tags": ["z"]}),
            ],
            GENES_COLLECTION,
        )
        .unwrap();

    let found = store
        .find(GENES_COLLECTION, &json!({"tags": "y"}), &json!({"name": 1, "_id": 0}))
        .unwrap();
    assert_eq!(found, vec![json!({"name": "G1"})]);
    assert!(store.collection_path(GENES_COLLECTION).as_std_path().exists());
}

#[test]
fn documents_without_id_reported_after_partial_write() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let err = store
        .insert_many(
            &[json!({"_id": "a"}), json!({"name": "orphan"}), json!({"_id": "b"})],
            GENES_COLLECTION,
        )
        .unwrap_err();
    assert_matches!(err, GatewayError::BulkWrite { written: 2, failed: 1, .. });
    let all = store.find(GENES_COLLECTION, &json!({}), &json!({})).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn missing_collection_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    assert!(store.find("data_arrays", &json!({}), &json!({})).unwrap().is_empty());
}

#[test]
fn dense_ingest_into_json_store() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let path = write_fixture(&dir, "dense.csv", "GENE,c1,c2\nCD3E,1.5,0\nCD4,0,2\n");
    let ctx = IngestContext::new(&store, RetryPolicy::immediate(2));
    DenseIngestor::open(&path, options())
        .unwrap()
        .execute_ingest(&ctx)
        .unwrap();

    let genes = store
        .find(
            GENES_COLLECTION,
            &json!({"$and": [{"study_file_id": STUDY_FILE_ID}, {"searchable_name": "cd4"}]}),
            &json!({"name": 1}),
        )
        .unwrap();
    assert_eq!(genes.len(), 1);
    assert_eq!(genes[0]["name"], "CD4");
    assert!(genes[0].get("_id").is_some());
    assert!(genes[0].get("study_id").is_none());
}

#[test]
fn retried_insert_does_not_duplicate_written_documents() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let ctx = IngestContext::new(&store, RetryPolicy::immediate(5));
    let err = ctx
        .insert(&[json!({"_id": "a"}), json!({"name": "orphan"})], GENES_COLLECTION)
        .unwrap_err();
    assert_matches!(
        err,
        IngestError::Persistence {
            attempts: 5,
            source: GatewayError::BulkWrite { written: 1, failed: 1, .. },
            ..
        }
    );
    let all = store.find(GENES_COLLECTION, &json!({}), &json!({})).unwrap();
    assert_eq!(all, vec![json!({"_id": "a"})]);
}

#[test]
fn reinsert_keeps_one_copy_per_id() {
    let dir = TempDir::new().unwrap();
    let documents = [json!({"_id": "a", "name": "G1"}), json!({"_id": "b", "name": "G2"})];
    temp_store(&dir).insert_many(&documents, GENES_COLLECTION).unwrap();

    let reopened = temp_store(&dir);
    reopened
        .insert_many(
            &[documents[1].clone(), json!({"_id": "c", "name": "G3"}), json!({"_id": "c"})],
            GENES_COLLECTION,
        )
        .unwrap();
    let names: Vec<_> = reopened
        .find(GENES_COLLECTION, &json!({}), &json!({"name": 1, "_id": 0}))
        .unwrap();
    assert_eq!(
        names,
        vec![json!({"name": "G1"}), json!({"name": "G2"}), json!({"name": "G3"})]
    );
}
