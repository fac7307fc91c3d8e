use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let is_valid = matches!(normalized.len(), 24 | 32)
            && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(IngestError::InvalidId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrayType {
    Cells,
    Annotations,
    Expression,
    Coordinates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinearDataType {
    Study,
    Gene,
    CellMetadatum,
    ClusterGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatrixKind {
    Dense,
    Mtx,
}

impl fmt::Display for MatrixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixKind::Dense => write!(f, "dense"),
            MatrixKind::Mtx => write!(f, "mtx"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GeneOrdering {
    #[default]
    Strict,
    AllowGaps,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileScope {
    pub study_id: DocumentId,
    pub study_file_id: DocumentId,
    pub cluster_name: String,
}

impl FileScope {
    pub fn new(study_id: DocumentId, study_file_id: DocumentId, file: &Utf8Path) -> Self {
        let cluster_name = file
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| file.to_string());
        Self {
            study_id,
            study_file_id,
            cluster_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_object_id() {
        let id: DocumentId = "5D276A50421AA9117C982845".parse().unwrap();
        assert_eq!(id.as_str(), "5d276a50421aa9117c982845");
    }

    #[test]
    fn parse_invalid_id() {
        let err = "not-an-id".parse::<DocumentId>().unwrap_err();
        assert_matches!(err, IngestError::InvalidId(_));
    }

    #[test]
    fn generated_ids_roundtrip_through_parse() {
        let id = DocumentId::generate();
        let parsed: DocumentId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn scope_uses_file_name() {
        let scope = FileScope::new(
            "5dd5ae25421aa910a723a337".parse().unwrap(),
            "5d276a50421aa9117c982845".parse().unwrap(),
            Utf8Path::new("/data/run1/matrix.mtx.gz"),
        );
        assert_eq!(scope.cluster_name, "matrix.mtx.gz");
    }
}
