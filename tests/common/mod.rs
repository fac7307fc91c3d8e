#![allow(dead_code)]

use std::fs;

use serde_json::Value;
use tempfile::TempDir;

use kira_expression_ingest::ingest::IngestOptions;

pub const STUDY_ID: &str = "5dd5ae25421aa910a723a337";
pub const STUDY_FILE_ID: &str = "5d276a50421aa9117c982845";
pub const OTHER_FILE_ID: &str = "5d276a50421aa9117c982846";

pub fn options() -> IngestOptions {
    IngestOptions::new(STUDY_ID.parse().unwrap(), STUDY_FILE_ID.parse().unwrap())
}

pub fn write_fixture(dir: &TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

pub fn named<'a>(documents: &'a [Value], name: &str) -> &'a Value {
    documents
        .iter()
        .find(|document| document["name"] == name)
        .unwrap_or_else(|| panic!("no document named {name}"))
}
