use serde::Serialize;

use crate::domain::{ArrayType, DocumentId, FileScope, LinearDataType};
use crate::error::IngestError;

pub const DEFAULT_MAX_ARRAY_VALUES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneRecord {
    #[serde(rename = "_id")]
    pub unique_id: DocumentId,
    pub name: String,
    pub searchable_name: String,
    pub study_id: DocumentId,
    pub study_file_id: DocumentId,
    #[serde(rename = "gene_id")]
    pub external_gene_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ArrayValues {
    Text(Vec<String>),
    Numeric(Vec<f64>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Text(values) => values.len(),
            ArrayValues::Numeric(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_chunks(self, size: usize) -> Vec<ArrayValues> {
        if self.len() <= size {
            return vec![self];
        }
        match self {
            ArrayValues::Text(values) => values
                .chunks(size)
                .map(|chunk| ArrayValues::Text(chunk.to_vec()))
                .collect(),
            ArrayValues::Numeric(values) => values
                .chunks(size)
                .map(|chunk| ArrayValues::Numeric(chunk.to_vec()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataArrayRecord {
    #[serde(rename = "_id")]
    pub unique_id: DocumentId,
    pub name: String,
    pub cluster_name: String,
    pub array_type: ArrayType,
    pub array_index: usize,
    pub values: ArrayValues,
    pub linear_data_type: LinearDataType,
    pub linear_data_id: DocumentId,
    pub study_id: DocumentId,
    pub study_file_id: DocumentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsample_annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subsample_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    cells: Vec<String>,
    scores: Vec<f64>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cell: impl Into<String>, score: f64) {
        self.cells.push(cell.into());
        self.scores.push(score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<f64>) {
        (self.cells, self.scores)
    }
}

pub fn round_score(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub fn sparse_score(value: f64) -> Option<f64> {
    if value.is_nan() {
        return None;
    }
    let rounded = round_score(value);
    (rounded != 0.0).then_some(rounded)
}

// Blank, NaN, and zero values yield `None`. Values that are not finite once
// rounded cannot be stored and are rejected.
pub fn parse_score(gene: &str, raw: &str) -> Result<Option<f64>, IngestError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let invalid = || IngestError::InvalidScore {
        gene: gene.to_string(),
        value: raw.to_string(),
    };
    let value: f64 = raw.parse().map_err(|_| invalid())?;
    if !value.is_nan() && !round_score(value).is_finite() {
        return Err(invalid());
    }
    Ok(sparse_score(value))
}

#[derive(Debug, Clone)]
pub struct ModelBuilder {
    scope: FileScope,
    max_array_values: usize,
}

impl ModelBuilder {
    pub fn new(scope: FileScope, max_array_values: usize) -> Self {
        Self {
            scope,
            max_array_values: max_array_values.max(1),
        }
    }

    pub fn scope(&self) -> &FileScope {
        &self.scope
    }

    pub fn gene(&self, name: &str, external_id: Option<&str>) -> GeneRecord {
        GeneRecord {
            unique_id: DocumentId::generate(),
            name: name.to_string(),
            searchable_name: name.to_lowercase(),
            study_id: self.scope.study_id.clone(),
            study_file_id: self.scope.study_file_id.clone(),
            external_gene_id: external_id.map(str::to_string),
        }
    }

    pub fn study_cells(&self, cells: &[String]) -> Vec<DataArrayRecord> {
        self.data_arrays(
            format!("{} Cells", self.scope.cluster_name),
            ArrayType::Cells,
            ArrayValues::Text(cells.to_vec()),
            LinearDataType::Study,
            &self.scope.study_id,
        )
    }

    pub fn gene_arrays(
        &self,
        gene: &GeneRecord,
        observations: Observations,
    ) -> Vec<DataArrayRecord> {
        if observations.is_empty() {
            return Vec::new();
        }
        let (cells, scores) = observations.into_parts();
        let mut arrays = self.data_arrays(
            format!("{} Cells", gene.name),
            ArrayType::Cells,
            ArrayValues::Text(cells),
            LinearDataType::Gene,
            &gene.unique_id,
        );
        arrays.extend(self.data_arrays(
            format!("{} Expression", gene.name),
            ArrayType::Expression,
            ArrayValues::Numeric(scores),
            LinearDataType::Gene,
            &gene.unique_id,
        ));
        arrays
    }

    fn data_arrays(
        &self,
        name: String,
        array_type: ArrayType,
        values: ArrayValues,
        linear_data_type: LinearDataType,
        linear_data_id: &DocumentId,
    ) -> Vec<DataArrayRecord> {
        values
            .into_chunks(self.max_array_values)
            .into_iter()
            .enumerate()
            .map(|(array_index, values)| DataArrayRecord {
                unique_id: DocumentId::generate(),
                name: name.clone(),
                cluster_name: self.scope.cluster_name.clone(),
                array_type,
                array_index,
                values,
                linear_data_type,
                linear_data_id: linear_data_id.clone(),
                study_id: self.scope.study_id.clone(),
                study_file_id: self.scope.study_file_id.clone(),
                subsample_annotation: None,
                subsample_threshold: None,
            })
            .collect()
    }
}
