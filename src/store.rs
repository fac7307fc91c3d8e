use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde_json::Value;

use crate::error::{GatewayError, IngestError};
use crate::gateway::PersistenceGateway;
use crate::query;

// Ids already on disk are indexed per collection, so a retried insert only
// appends the documents that are not stored yet.
#[derive(Debug)]
pub struct JsonStore {
    root: Utf8PathBuf,
    ids: Mutex<HashMap<String, HashSet<String>>>,
}

impl JsonStore {
    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self {
            root,
            ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_root() -> Result<Utf8PathBuf, IngestError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.data_dir().join("kira-expression-ingest")).ok()
            })
            .ok_or_else(|| IngestError::Filesystem("unable to resolve data directory".to_string()))
    }

    pub fn collection_path(&self, collection: &str) -> Utf8PathBuf {
        self.root
            .join("collections")
            .join(format!("{collection}.jsonl"))
    }

    pub fn ensure_root(&self) -> Result<(), IngestError> {
        fs::create_dir_all(self.root.join("collections").as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))
    }

    fn read_documents(
        &self,
        path: &Utf8Path,
        collection: &str,
    ) -> Result<Vec<Value>, GatewayError> {
        if !path.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(path.as_std_path()).map_err(classify_io)?;
        let mut documents = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(classify_io)?;
            if line.trim().is_empty() {
                continue;
            }
            let document: Value = serde_json::from_str(&line)
                .map_err(|err| GatewayError::Other(format!("corrupt {collection} entry: {err}")))?;
            documents.push(document);
        }
        Ok(documents)
    }

    fn stored_ids(
        &self,
        path: &Utf8Path,
        collection: &str,
    ) -> Result<HashSet<String>, GatewayError> {
        Ok(self
            .read_documents(path, collection)?
            .iter()
            .filter_map(|document| document.get("_id").map(Value::to_string))
            .collect())
    }
}

impl PersistenceGateway for JsonStore {
    fn insert_many(&self, documents: &[Value], collection: &str) -> Result<(), GatewayError> {
        let path = self.collection_path(collection);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(classify_io)?;
        }

        let mut index = self
            .ids
            .lock()
            .map_err(|_| GatewayError::Other("store id index is poisoned".to_string()))?;
        let known = match index.entry(collection.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.stored_ids(&path, collection)?),
        };

        let mut buffer = Vec::new();
        let mut fresh = HashSet::new();
        let mut written = 0usize;
        let mut rejected = Vec::new();
        for (idx, document) in documents.iter().enumerate() {
            let Some(id) = document.get("_id").map(Value::to_string) else {
                rejected.push(idx);
                continue;
            };
            written += 1;
            if known.contains(&id) || !fresh.insert(id) {
                continue;
            }
            serde_json::to_writer(&mut buffer, document)
                .map_err(|err| GatewayError::Other(err.to_string()))?;
            buffer.push(b'\n');
        }

        if !buffer.is_empty() {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path.as_std_path())
                .map_err(classify_io)?;
            let original_len = file.metadata().map_err(classify_io)?.len();
            if let Err(err) = file.write_all(&buffer).and_then(|()| file.flush()) {
                file.set_len(original_len).map_err(classify_io)?;
                return Err(classify_io(err));
            }
            known.extend(fresh);
        }

        if !rejected.is_empty() {
            return Err(GatewayError::BulkWrite {
                written,
                failed: rejected.len(),
                message: format!("documents without _id at positions {rejected:?}"),
            });
        }
        Ok(())
    }

    fn find(
        &self,
        collection: &str,
        query: &Value,
        projection: &Value,
    ) -> Result<Vec<Value>, GatewayError> {
        let path = self.collection_path(collection);
        Ok(self
            .read_documents(&path, collection)?
            .iter()
            .filter(|document| query::matches(document, query))
            .map(|document| query::project(document, projection))
            .collect())
    }
}

fn classify_io(err: io::Error) -> GatewayError {
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => GatewayError::Reconnect(err.to_string()),
        _ => GatewayError::Other(err.to_string()),
    }
}
