use std::collections::{BTreeSet, HashSet};

use serde_json::{Value, json};
use tracing::debug;

use crate::domain::{DocumentId, FileScope};
use crate::error::IngestError;
use crate::gateway::{DATA_ARRAYS_COLLECTION, STUDY_FILES_COLLECTION};
use crate::ingest::IngestContext;
use crate::mtx::MatrixDimensions;

pub const GENE_KEYWORD: &str = "GENE";
pub const ALL_CELLS_ARRAY: &str = "All Cells";
const CONFLICT_EXAMPLES: usize = 3;

#[derive(Debug, Default)]
pub struct Findings {
    errors: Vec<IngestError>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: Result<(), IngestError>) {
        if let Err(err) = outcome {
            self.errors.push(err);
        }
    }

    // A single failure keeps its own variant; several are joined into one
    // validation error. Store failures are not findings and win outright.
    pub fn into_result(mut self) -> Result<(), IngestError> {
        if let Some(position) = self.errors.iter().position(|err| !err.is_preflight()) {
            return Err(self.errors.swap_remove(position));
        }
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => {
                let message = self
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(IngestError::Validation(message))
            }
        }
    }
}

pub fn check_unique_header(header: &[String]) -> Result<(), IngestError> {
    let unique: HashSet<&str> = header.iter().map(String::as_str).collect();
    if unique.len() != header.len() {
        return Err(IngestError::Format("Duplicate header values are not allowed".to_string()));
    }
    Ok(())
}

pub fn is_r_formatted(header: &[String], first_row: &[String]) -> bool {
    header.first().map(String::as_str) != Some(GENE_KEYWORD)
        && first_row.len() == header.len() + 1
}

pub fn check_gene_keyword(header: &[String], first_row: &[String]) -> Result<(), IngestError> {
    if header.first().map(String::as_str) == Some(GENE_KEYWORD)
        || is_r_formatted(header, first_row)
    {
        return Ok(());
    }
    Err(IngestError::Format("Required 'GENE' header is not present".to_string()))
}

pub fn check_header_values(header: &[String]) -> Result<(), IngestError> {
    if header.iter().any(|value| value.trim().is_empty()) {
        return Err(IngestError::Format("Header values cannot be blank".to_string()));
    }
    if let Some(value) = header.iter().find(|value| value.eq_ignore_ascii_case("nan")) {
        return Err(IngestError::Format(format!(
            "{value} is not allowed as a header value"
        )));
    }
    Ok(())
}

pub fn check_first_row_length(header: &[String], first_row: &[String]) -> Result<(), IngestError> {
    if header.first().map(String::as_str) != Some(GENE_KEYWORD) || first_row.len() == header.len()
    {
        return Ok(());
    }
    Err(IngestError::Format(format!(
        "First data row has {} values, expected {} to match the header",
        first_row.len(),
        header.len()
    )))
}

pub fn check_bundle(
    barcodes: &[String],
    genes: &[String],
    dimensions: &MatrixDimensions,
) -> Result<(), IngestError> {
    if barcodes.len() == dimensions.barcode_count && genes.len() == dimensions.gene_count {
        return Ok(());
    }
    Err(IngestError::DimensionMismatch(format!(
        "Expected {} cells and {} genes. Got {} cells and {} genes.",
        dimensions.barcode_count,
        dimensions.gene_count,
        barcodes.len(),
        genes.len()
    )))
}

pub fn check_duplicates(values: &[String], kind: &str) -> Result<(), IngestError> {
    let unique: HashSet<&str> = values.iter().map(String::as_str).collect();
    let duplicates = values.len() - unique.len();
    if duplicates == 0 {
        return Ok(());
    }
    Err(IngestError::Format(format!(
        "Duplicate values are not allowed. There are {duplicates} duplicates in the {kind} file"
    )))
}

pub fn raw_count_file_ids(
    ctx: &IngestContext<'_>,
    study_id: &DocumentId,
) -> Result<Vec<Value>, IngestError> {
    let query = json!({
        "$and": [
            { "study_id": study_id },
            { "file_type": "Expression Matrix" },
            { "expression_file_info.is_raw_counts": true }
        ]
    });
    let documents = ctx.find(STUDY_FILES_COLLECTION, &query, &json!({ "_id": 1 }))?;
    Ok(documents
        .into_iter()
        .filter_map(|mut document| document.get_mut("_id").map(Value::take))
        .collect())
}

pub fn raw_count_filters(ids: Vec<Value>, current: &DocumentId) -> Option<Vec<Value>> {
    let filters: Vec<Value> = ids
        .into_iter()
        .filter(|id| id.as_str() != Some(current.as_str()))
        .map(|id| json!({ "study_file_id": id }))
        .collect();
    if filters.is_empty() {
        None
    } else {
        Some(filters)
    }
}

pub fn check_unique_cells(
    ctx: &IngestContext<'_>,
    cells: &[String],
    scope: &FileScope,
) -> Result<(), IngestError> {
    let ids = raw_count_file_ids(ctx, &scope.study_id)?;
    let mut conditions = vec![
        json!({ "linear_data_type": "Study" }),
        json!({ "array_type": "cells" }),
        json!({ "study_id": scope.study_id }),
    ];
    if let Some(filters) = raw_count_filters(ids, &scope.study_file_id) {
        conditions.push(json!({ "$or": filters }));
    }
    let query = json!({
        "$and": conditions,
        "$nor": [{ "name": ALL_CELLS_ARRAY }]
    });
    let arrays = ctx.find(
        DATA_ARRAYS_COLLECTION,
        &query,
        &json!({ "values": 1, "_id": 0 }),
    )?;

    let existing: HashSet<&str> = arrays
        .iter()
        .filter_map(|array| array.get("values").and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .collect();
    debug!(existing = existing.len(), incoming = cells.len(), "checking cell names");

    let overlap: BTreeSet<&str> = cells
        .iter()
        .map(String::as_str)
        .filter(|cell| existing.contains(cell))
        .collect();
    if overlap.is_empty() {
        return Ok(());
    }
    let examples = overlap
        .iter()
        .take(CONFLICT_EXAMPLES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    Err(IngestError::UniquenessConflict(format!(
        "Expression file contains {} cells that also exist in another expression file. Duplicates include {examples}",
        overlap.len()
    )))
}
