use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde_json::Value;

use crate::error::GatewayError;
use crate::query;

pub const GENES_COLLECTION: &str = "genes";
pub const DATA_ARRAYS_COLLECTION: &str = "data_arrays";
pub const STUDY_FILES_COLLECTION: &str = "study_files";

// `insert_many` is non-ordered: a rejected document does not stop the
// others from being written.
pub trait PersistenceGateway: Send + Sync {
    fn insert_many(&self, documents: &[Value], collection: &str) -> Result<(), GatewayError>;
    fn find(
        &self,
        collection: &str,
        query: &Value,
        projection: &Value,
    ) -> Result<Vec<Value>, GatewayError>;
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    collections: Mutex<BTreeMap<String, Vec<Value>>>,
    scripted_failures: Mutex<VecDeque<GatewayError>>,
    insert_calls: Mutex<usize>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(self, collection: &str, documents: Vec<Value>) -> Self {
        if let Ok(mut collections) = self.collections.lock() {
            collections
                .entry(collection.to_string())
                .or_default()
                .extend(documents);
        }
        self
    }

    pub fn fail_next(&self, error: GatewayError) {
        if let Ok(mut failures) = self.scripted_failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .map(|collections| collections.get(collection).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.lock().map(|calls| *calls).unwrap_or(0)
    }
}

impl PersistenceGateway for MemoryGateway {
    fn insert_many(&self, documents: &[Value], collection: &str) -> Result<(), GatewayError> {
        {
            let mut calls = self
                .insert_calls
                .lock()
                .map_err(|_| GatewayError::Other("gateway lock poisoned".to_string()))?;
            *calls += 1;
        }
        let scripted = self
            .scripted_failures
            .lock()
            .map_err(|_| GatewayError::Other("gateway lock poisoned".to_string()))?
            .pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| GatewayError::Other("gateway lock poisoned".to_string()))?;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend(documents.iter().cloned());
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        query: &Value,
        projection: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let collections = self
            .collections
            .lock()
            .map_err(|_| GatewayError::Other("gateway lock poisoned".to_string()))?;
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|document| query::matches(document, query))
                    .map(|document| query::project(document, projection))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn scripted_failure_consumed_once() {
        let gateway = MemoryGateway::new();
        gateway.fail_next(GatewayError::Reconnect("down".to_string()));
        let docs = vec![json!({"_id": "a"})];
        assert!(gateway.insert_many(&docs, GENES_COLLECTION).is_err());
        gateway.insert_many(&docs, GENES_COLLECTION).unwrap();
        assert_eq!(gateway.documents(GENES_COLLECTION), docs);
        assert_eq!(gateway.insert_calls(), 2);
    }

    #[test]
    fn find_filters_and_projects() {
        let gateway = MemoryGateway::new().with_documents(
            STUDY_FILES_COLLECTION,
            vec![
                json!({"_id": "f1", "study_id": "s1"}),
                json!({"_id": "f2", "study_id": "s2"}),
            ],
        );
        let found = gateway
            .find(
                STUDY_FILES_COLLECTION,
                &json!({"study_id": "s1"}),
                &json!({"_id": 1}),
            )
            .unwrap();
        assert_eq!(found, vec![json!({"_id": "f1"})]);
    }
}
