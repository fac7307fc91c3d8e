use std::iter::{Chain, Once};

use tracing::info;

use crate::batch::{Batch, BatchAccumulator};
use crate::domain::{FileScope, MatrixKind};
use crate::error::IngestError;
use crate::ingest::{ExpressionIngestor, IngestContext, IngestOptions};
use crate::model::{ModelBuilder, Observations, parse_score};
use crate::source::{InputFile, RowReader};
use crate::validate::{self, Findings};

type Rows = Chain<Once<Result<Vec<String>, IngestError>>, RowReader>;

pub struct DenseIngestor {
    input: InputFile,
    scope: FileScope,
    options: IngestOptions,
    header: Vec<String>,
    first_row: Vec<String>,
    rows: RowReader,
}

impl DenseIngestor {
    pub fn open(location: &str, options: IngestOptions) -> Result<Self, IngestError> {
        Self::from_input(InputFile::resolve(location)?, options)
    }

    pub fn from_input(input: InputFile, options: IngestOptions) -> Result<Self, IngestError> {
        let mut rows = RowReader::open(input.path())?;
        let header = rows
            .next()
            .transpose()?
            .ok_or_else(|| IngestError::Format(format!("{} is empty", input.path())))?;
        let first_row = rows.next().transpose()?.ok_or_else(|| {
            IngestError::Format(format!("{} has a header but no gene rows", input.path()))
        })?;
        let scope = FileScope::new(
            options.study_id.clone(),
            options.study_file_id.clone(),
            input.path(),
        );
        info!(file = %input.path(), columns = header.len(), "opened dense matrix");
        Ok(Self {
            input,
            scope,
            options,
            header,
            first_row,
            rows,
        })
    }

    pub fn is_r_formatted(&self) -> bool {
        validate::is_r_formatted(&self.header, &self.first_row)
    }

    pub fn cells(&self) -> Vec<String> {
        if self.is_r_formatted() {
            self.header.clone()
        } else {
            self.header.iter().skip(1).cloned().collect()
        }
    }
}

impl ExpressionIngestor for DenseIngestor {
    type Batches = DenseBatches;

    fn kind(&self) -> MatrixKind {
        MatrixKind::Dense
    }

    fn scope(&self) -> &FileScope {
        &self.scope
    }

    fn validate(&self, ctx: &IngestContext<'_>) -> Result<(), IngestError> {
        let mut findings = Findings::new();
        findings.record(validate::check_unique_header(&self.header));
        findings.record(validate::check_gene_keyword(&self.header, &self.first_row));
        findings.record(validate::check_header_values(&self.header));
        findings.record(validate::check_first_row_length(
            &self.header,
            &self.first_row,
        ));
        findings.record(validate::check_unique_cells(ctx, &self.cells(), &self.scope));
        findings.into_result()
    }

    fn stream(self) -> DenseBatches {
        let cells = self.cells();
        let builder = ModelBuilder::new(self.scope, self.options.max_array_values);
        let mut accumulator = BatchAccumulator::new(builder, self.options.batch_size);
        accumulator.push_study_cells(&cells);
        DenseBatches {
            _input: self.input,
            rows: std::iter::once(Ok(self.first_row)).chain(self.rows),
            cells,
            accumulator,
            line: 1,
            done: false,
        }
    }
}

pub struct DenseBatches {
    _input: InputFile,
    rows: Rows,
    cells: Vec<String>,
    accumulator: BatchAccumulator,
    line: usize,
    done: bool,
}

impl DenseBatches {
    fn process_row(&mut self, row: Vec<String>) -> Result<Option<Batch>, IngestError> {
        self.line += 1;
        let mut tokens = row.into_iter();
        let gene = tokens.next().unwrap_or_default();
        if gene.is_empty() {
            return Err(IngestError::Format(format!(
                "Row {} has a blank gene name",
                self.line
            )));
        }
        self.accumulator.ensure_new_gene(&gene)?;

        let values: Vec<String> = tokens.collect();
        if values.len() != self.cells.len() {
            return Err(IngestError::Format(format!(
                "Gene {gene} has {} values but the header lists {} cells",
                values.len(),
                self.cells.len()
            )));
        }

        let mut observations = Observations::new();
        for (cell, raw) in self.cells.iter().zip(&values) {
            if let Some(score) = parse_score(&gene, raw)? {
                observations.push(cell.as_str(), score);
            }
        }
        self.accumulator.add_gene(&gene, None, observations, false)
    }
}

impl Iterator for DenseBatches {
    type Item = Result<Batch, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let outcome = match self.rows.next() {
                None => {
                    self.done = true;
                    return self.accumulator.flush().map(Ok);
                }
                Some(row) => row.and_then(|row| self.process_row(row)),
            };
            match outcome {
                Ok(Some(batch)) => return Some(Ok(batch)),
                Ok(None) => continue,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
