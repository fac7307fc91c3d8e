use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::mem;
use std::str::FromStr;

use camino::Utf8Path;
use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{Batch, BatchAccumulator};
use crate::domain::{FileScope, GeneOrdering, MatrixKind};
use crate::error::IngestError;
use crate::ingest::{ExpressionIngestor, IngestContext, IngestOptions};
use crate::model::{ModelBuilder, Observations, parse_score};
use crate::source::{self, InputFile};
use crate::validate::{self, Findings};

const BANNER: &str = "%%MatrixMarket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatrixDimensions {
    pub gene_count: usize,
    pub barcode_count: usize,
    pub nonzero_count: usize,
}

impl FromStr for MatrixDimensions {
    type Err = IngestError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let invalid = || IngestError::Format(format!("Invalid MTX dimensions line '{line}'"));
        let fields: Vec<usize> = line
            .split_whitespace()
            .map(|field| field.parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<_, _>>()?;
        match fields.as_slice() {
            [gene_count, barcode_count, nonzero_count] => Ok(Self {
                gene_count: *gene_count,
                barcode_count: *barcode_count,
                nonzero_count: *nonzero_count,
            }),
            _ => Err(invalid()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneEntry {
    pub name: String,
    pub external_id: Option<String>,
}

impl GeneEntry {
    pub fn parse(line: &str) -> Self {
        let fields: Vec<&str> = line.split('\t').map(source::clean_token).collect();
        match fields.as_slice() {
            [id, name, ..] if !name.is_empty() => Self {
                name: name.to_string(),
                external_id: Some(id.to_string()),
            },
            [id, ..] => Self {
                name: id.to_string(),
                external_id: None,
            },
            [] => Self {
                name: String::new(),
                external_id: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MtxBundle<'a> {
    pub matrix: &'a str,
    pub genes: &'a str,
    pub barcodes: &'a str,
}

struct MatrixLines {
    lines: io::Lines<Box<dyn BufRead>>,
    line: usize,
}

impl MatrixLines {
    fn new(reader: Box<dyn BufRead>) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    fn next_data_line(&mut self) -> Result<Option<(usize, String)>, IngestError> {
        for line in self.lines.by_ref() {
            let line = line.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            self.line += 1;
            let line = if self.line == 1 {
                source::strip_bom(&line).to_string()
            } else {
                line
            };
            let trimmed = line.trim();
            if self.line == 1 && trimmed.starts_with(BANNER) {
                check_banner(trimmed)?;
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with('%') {
                continue;
            }
            return Ok(Some((self.line, trimmed.to_string())));
        }
        Ok(None)
    }
}

fn check_banner(banner: &str) -> Result<(), IngestError> {
    if banner.to_ascii_lowercase().contains("coordinate") {
        return Ok(());
    }
    Err(IngestError::Format(format!(
        "Only coordinate MTX files are supported, found '{banner}'"
    )))
}

// Interior blank lines are entries; only trailing blank lines are dropped.
pub fn read_listing(path: &Utf8Path) -> Result<Vec<String>, IngestError> {
    let reader = source::open_reader(path)?;
    let mut values: Vec<String> = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|err| IngestError::Filesystem(format!("read {path}: {err}")))?;
        let line = if values.is_empty() {
            source::strip_bom(&line).to_string()
        } else {
            line
        };
        values.push(line.trim().trim_matches('"').to_string());
    }
    while values.last().is_some_and(|value| value.is_empty()) {
        values.pop();
    }
    Ok(values)
}

pub struct MtxIngestor {
    matrix: InputFile,
    scope: FileScope,
    options: IngestOptions,
    dimensions: MatrixDimensions,
    gene_lines: Vec<String>,
    barcodes: Vec<String>,
    lines: MatrixLines,
}

impl MtxIngestor {
    pub fn open(bundle: MtxBundle<'_>, options: IngestOptions) -> Result<Self, IngestError> {
        let matrix = InputFile::resolve(bundle.matrix)?;
        let genes = InputFile::resolve(bundle.genes)?;
        let barcodes = InputFile::resolve(bundle.barcodes)?;
        Self::from_inputs(matrix, &genes, &barcodes, options)
    }

    pub fn from_inputs(
        matrix: InputFile,
        genes: &InputFile,
        barcodes: &InputFile,
        options: IngestOptions,
    ) -> Result<Self, IngestError> {
        let mut lines = MatrixLines::new(matrix.open()?);
        let dimensions = match lines.next_data_line()? {
            Some((_, line)) => line.parse::<MatrixDimensions>()?,
            None => {
                return Err(IngestError::Format(format!(
                    "{} has no dimensions line",
                    matrix.path()
                )));
            }
        };
        let gene_lines = read_listing(genes.path())?;
        let barcodes = read_listing(barcodes.path())?;
        let scope = FileScope::new(
            options.study_id.clone(),
            options.study_file_id.clone(),
            matrix.path(),
        );
        info!(
            file = %matrix.path(),
            genes = dimensions.gene_count,
            barcodes = dimensions.barcode_count,
            nonzero = dimensions.nonzero_count,
            "opened mtx bundle"
        );
        Ok(Self {
            matrix,
            scope,
            options,
            dimensions,
            gene_lines,
            barcodes,
            lines,
        })
    }

}

impl ExpressionIngestor for MtxIngestor {
    type Batches = MtxBatches;

    fn kind(&self) -> MatrixKind {
        MatrixKind::Mtx
    }

    fn scope(&self) -> &FileScope {
        &self.scope
    }

    fn validate(&self, ctx: &IngestContext<'_>) -> Result<(), IngestError> {
        let mut findings = Findings::new();
        findings.record(validate::check_bundle(
            &self.barcodes,
            &self.gene_lines,
            &self.dimensions,
        ));
        findings.record(validate::check_duplicates(&self.gene_lines, "gene"));
        findings.record(validate::check_duplicates(&self.barcodes, "barcode"));
        findings.record(validate::check_unique_cells(ctx, &self.barcodes, &self.scope));
        findings.into_result()
    }

    fn stream(self) -> MtxBatches {
        let builder = ModelBuilder::new(self.scope, self.options.max_array_values);
        let mut accumulator = BatchAccumulator::new(builder, self.options.batch_size);
        accumulator.push_study_cells(&self.barcodes);
        MtxBatches {
            _matrix: self.matrix,
            lines: self.lines,
            genes: self.gene_lines.iter().map(|line| GeneEntry::parse(line)).collect(),
            barcodes: self.barcodes,
            ordering: self.options.gene_ordering,
            declared_nonzero: self.dimensions.nonzero_count,
            accumulator,
            observations: Observations::new(),
            previous: 0,
            entries: 0,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

// Coordinate lines must be grouped by gene; a gene is complete as soon as
// a line for a different gene index appears.
pub struct MtxBatches {
    _matrix: InputFile,
    lines: MatrixLines,
    genes: Vec<GeneEntry>,
    barcodes: Vec<String>,
    ordering: GeneOrdering,
    declared_nonzero: usize,
    accumulator: BatchAccumulator,
    observations: Observations,
    previous: usize,
    entries: usize,
    pending: VecDeque<Batch>,
    done: bool,
}

impl MtxBatches {
    fn advance(&mut self) -> Result<(), IngestError> {
        let Some((line, text)) = self.lines.next_data_line()? else {
            return self.finish();
        };
        let (gene_index, barcode_index, raw) = parse_coordinate(line, &text)?;

        if gene_index == 0 || gene_index > self.genes.len() {
            return Err(IngestError::InvalidGeneIndex {
                line,
                index: gene_index,
                max: self.genes.len(),
            });
        }
        if gene_index != self.previous {
            let in_order = match self.ordering {
                GeneOrdering::Strict => gene_index == self.previous + 1,
                GeneOrdering::AllowGaps => gene_index > self.previous,
            };
            if !in_order {
                return Err(IngestError::OrderingViolation {
                    line,
                    previous: self.previous,
                    current: gene_index,
                });
            }
            if self.previous > 0 {
                self.complete_gene(self.previous)?;
            }
            for skipped in self.previous + 1..gene_index {
                self.complete_gene(skipped)?;
            }
            self.previous = gene_index;
        }

        if barcode_index == 0 || barcode_index > self.barcodes.len() {
            return Err(IngestError::InvalidBarcodeIndex {
                line,
                index: barcode_index,
                max: self.barcodes.len(),
            });
        }
        let score = parse_score(&self.genes[gene_index - 1].name, raw)?;
        self.entries += 1;
        if let Some(score) = score {
            self.observations
                .push(self.barcodes[barcode_index - 1].as_str(), score);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), IngestError> {
        self.done = true;
        if self.previous > 0 {
            self.complete_gene(self.previous)?;
        }
        if self.ordering == GeneOrdering::AllowGaps {
            for skipped in self.previous + 1..=self.genes.len() {
                self.complete_gene(skipped)?;
            }
        }
        if let Some(batch) = self.accumulator.flush() {
            self.pending.push_back(batch);
        }
        if self.entries != self.declared_nonzero {
            warn!(
                declared = self.declared_nonzero,
                observed = self.entries,
                "coordinate count differs from the dimensions line"
            );
        }
        Ok(())
    }

    fn complete_gene(&mut self, index: usize) -> Result<(), IngestError> {
        let entry = &self.genes[index - 1];
        let observations = mem::take(&mut self.observations);
        if let Some(batch) = self.accumulator.add_gene(
            &entry.name,
            entry.external_id.as_deref(),
            observations,
            false,
        )? {
            self.pending.push_back(batch);
        }
        Ok(())
    }
}

impl Iterator for MtxBatches {
    type Item = Result<Batch, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.pending.pop_front() {
                return Some(Ok(batch));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.advance() {
                self.done = true;
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}

fn parse_coordinate(line: usize, text: &str) -> Result<(usize, usize, &str), IngestError> {
    let malformed =
        || IngestError::Format(format!("Malformed coordinate on line {line}: '{text}'"));
    let mut fields = text.split_whitespace();
    let (Some(gene), Some(barcode), Some(value), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed());
    };
    let gene = gene.parse::<usize>().map_err(|_| malformed())?;
    let barcode = barcode.parse::<usize>().map_err(|_| malformed())?;
    Ok((gene, barcode, value))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    fn matrix_lines(content: &str) -> MatrixLines {
        MatrixLines::new(Box::new(Cursor::new(content.as_bytes().to_vec())))
    }

    #[test]
    fn dimensions_parse() {
        let dims: MatrixDimensions = "33694 4 12".parse().unwrap();
        assert_eq!(
            dims,
            MatrixDimensions {
                gene_count: 33694,
                barcode_count: 4,
                nonzero_count: 12,
            }
        );
        assert_matches!("1 2".parse::<MatrixDimensions>(), Err(IngestError::Format(_)));
        assert_matches!("a b c".parse::<MatrixDimensions>(), Err(IngestError::Format(_)));
    }

    #[test]
    fn comments_skipped_before_dimensions() {
        let mut lines = matrix_lines(
            "%%MatrixMarket matrix coordinate real general\n%metadata_json: {}\n\n2 2 3\n1 1 4.0\n",
        );
        assert_eq!(
            lines.next_data_line().unwrap(),
            Some((4, "2 2 3".to_string()))
        );
        assert_eq!(
            lines.next_data_line().unwrap(),
            Some((5, "1 1 4.0".to_string()))
        );
        assert_eq!(lines.next_data_line().unwrap(), None);
    }

    #[test]
    fn array_banner_rejected() {
        let mut lines = matrix_lines("%%MatrixMarket matrix array real general\n2 2\n");
        assert_matches!(lines.next_data_line(), Err(IngestError::Format(_)));
    }

    #[test]
    fn gene_entries_by_column_count() {
        assert_eq!(
            GeneEntry::parse("ENSG00000243485\tMIR1302-2HG\tGene Expression"),
            GeneEntry {
                name: "MIR1302-2HG".to_string(),
                external_id: Some("ENSG00000243485".to_string()),
            }
        );
        assert_eq!(
            GeneEntry::parse("g1\tG1"),
            GeneEntry {
                name: "G1".to_string(),
                external_id: Some("g1".to_string()),
            }
        );
        assert_eq!(
            GeneEntry::parse("\"CD3E\""),
            GeneEntry {
                name: "CD3E".to_string(),
                external_id: None,
            }
        );
    }

    #[test]
    fn coordinates_need_three_fields() {
        assert_eq!(parse_coordinate(3, "1 2 4.5").unwrap(), (1, 2, "4.5"));
        assert_matches!(parse_coordinate(3, "1 2"), Err(IngestError::Format(_)));
        assert_matches!(parse_coordinate(3, "1 2 3 4"), Err(IngestError::Format(_)));
        assert_matches!(parse_coordinate(3, "x 2 3"), Err(IngestError::Format(_)));
    }
}
