use std::collections::HashSet;
use std::mem;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::IngestError;
use crate::model::{DataArrayRecord, GeneRecord, ModelBuilder, Observations};

pub const DATA_ARRAY_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Batch {
    pub genes: Vec<GeneRecord>,
    pub data_arrays: Vec<DataArrayRecord>,
}

// A released batch is moved out, so the accumulator never holds more than
// one threshold's worth of records plus the gene being added.
#[derive(Debug)]
pub struct BatchAccumulator {
    builder: ModelBuilder,
    batch_size: usize,
    genes: Vec<GeneRecord>,
    data_arrays: Vec<DataArrayRecord>,
    seen_genes: HashSet<String>,
    processed: usize,
    started: Instant,
}

impl BatchAccumulator {
    pub fn new(builder: ModelBuilder, batch_size: usize) -> Self {
        Self {
            builder,
            batch_size: batch_size.max(1),
            genes: Vec::new(),
            data_arrays: Vec::new(),
            seen_genes: HashSet::new(),
            processed: 0,
            started: Instant::now(),
        }
    }

    pub fn push_study_cells(&mut self, cells: &[String]) {
        let arrays = self.builder.study_cells(cells);
        self.data_arrays.extend(arrays);
    }

    pub fn ensure_new_gene(&self, name: &str) -> Result<(), IngestError> {
        if self.seen_genes.contains(name) {
            return Err(IngestError::DuplicateGene(name.to_string()));
        }
        Ok(())
    }

    pub fn add_gene(
        &mut self,
        name: &str,
        external_id: Option<&str>,
        observations: Observations,
        force: bool,
    ) -> Result<Option<Batch>, IngestError> {
        if !self.seen_genes.insert(name.to_string()) {
            return Err(IngestError::DuplicateGene(name.to_string()));
        }
        debug!(gene = name, observed = observations.len(), "creating models");
        let gene = self.builder.gene(name, external_id);
        let arrays = self.builder.gene_arrays(&gene, observations);
        self.genes.push(gene);
        self.data_arrays.extend(arrays);

        if self.data_arrays.len() >= self.batch_size || force {
            return Ok(self.take());
        }
        Ok(None)
    }

    pub fn flush(&mut self) -> Option<Batch> {
        self.take()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn pending_data_arrays(&self) -> usize {
        self.data_arrays.len()
    }

    pub fn pending_genes(&self) -> usize {
        self.genes.len()
    }

    fn take(&mut self) -> Option<Batch> {
        if self.genes.is_empty() && self.data_arrays.is_empty() {
            return None;
        }
        self.processed += self.genes.len();
        info!(
            processed = self.processed,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "processed genes"
        );
        Some(Batch {
            genes: mem::take(&mut self.genes),
            data_arrays: mem::take(&mut self.data_arrays),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use camino::Utf8Path;

    use super::*;
    use crate::domain::FileScope;

    fn accumulator(batch_size: usize) -> BatchAccumulator {
        let scope = FileScope::new(
            "5dd5ae25421aa910a723a337".parse().unwrap(),
            "5d276a50421aa9117c982845".parse().unwrap(),
            Utf8Path::new("matrix.mtx"),
        );
        BatchAccumulator::new(ModelBuilder::new(scope, 100), batch_size)
    }

    fn observed(cell: &str, score: f64) -> Observations {
        let mut observations = Observations::new();
        observations.push(cell, score);
        observations
    }

    #[test]
    fn gene_without_observations_still_recorded() {
        let mut acc = accumulator(10);
        let batch = acc
            .add_gene("G1", None, Observations::new(), true)
            .unwrap()
            .unwrap();
        assert_eq!(batch.genes.len(), 1);
        assert!(batch.data_arrays.is_empty());
        assert_eq!(acc.processed(), 1);
    }

    #[test]
    fn flushes_when_threshold_reached() {
        let mut acc = accumulator(4);
        assert!(acc.add_gene("G1", None, observed("c1", 1.0), false).unwrap().is_none());
        let batch = acc
            .add_gene("G2", None, observed("c1", 2.0), false)
            .unwrap()
            .unwrap();
        assert_eq!(batch.genes.len(), 2);
        assert_eq!(batch.data_arrays.len(), 4);
        assert_eq!(acc.pending_data_arrays(), 0);
        assert_eq!(acc.pending_genes(), 0);
    }

    #[test]
    fn overshoot_is_at_most_one_gene() {
        let mut acc = accumulator(4);
        acc.push_study_cells(&["c1".to_string()]);
        assert!(acc.add_gene("G1", None, observed("c1", 1.0), false).unwrap().is_none());
        let batch = acc
            .add_gene("G2", None, observed("c1", 2.0), false)
            .unwrap()
            .unwrap();
        assert_eq!(batch.data_arrays.len(), 5);
    }

    #[test]
    fn duplicate_gene_rejected_on_second_occurrence() {
        let mut acc = accumulator(10);
        acc.add_gene("G1", None, Observations::new(), false).unwrap();
        acc.add_gene("G2", None, Observations::new(), false).unwrap();
        let err = acc
            .add_gene("G1", None, Observations::new(), false)
            .unwrap_err();
        assert_matches!(err, IngestError::DuplicateGene(name) if name == "G1");
    }

    #[test]
    fn flush_on_empty_accumulator_yields_nothing() {
        let mut acc = accumulator(10);
        assert!(acc.flush().is_none());
        acc.push_study_cells(&["c1".to_string()]);
        let batch = acc.flush().unwrap();
        assert!(batch.genes.is_empty());
        assert_eq!(batch.data_arrays.len(), 1);
        assert_eq!(acc.processed(), 0);
    }
}
