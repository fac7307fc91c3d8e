use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{Span, field, info, info_span};

use crate::batch::{Batch, DATA_ARRAY_BATCH_SIZE};
use crate::config::ResolvedConfig;
use crate::domain::{DocumentId, FileScope, GeneOrdering, MatrixKind};
use crate::error::IngestError;
use crate::gateway::{DATA_ARRAYS_COLLECTION, GENES_COLLECTION, PersistenceGateway};
use crate::model::DEFAULT_MAX_ARRAY_VALUES;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub study_id: DocumentId,
    pub study_file_id: DocumentId,
    pub batch_size: usize,
    pub max_array_values: usize,
    pub gene_ordering: GeneOrdering,
}

impl IngestOptions {
    pub fn new(study_id: DocumentId, study_file_id: DocumentId) -> Self {
        Self {
            study_id,
            study_file_id,
            batch_size: DATA_ARRAY_BATCH_SIZE,
            max_array_values: DEFAULT_MAX_ARRAY_VALUES,
            gene_ordering: GeneOrdering::Strict,
        }
    }

    pub fn from_config(
        study_id: DocumentId,
        study_file_id: DocumentId,
        config: &ResolvedConfig,
    ) -> Self {
        Self {
            study_id,
            study_file_id,
            batch_size: config.batch_size,
            max_array_values: config.max_array_values,
            gene_ordering: config.mtx_gene_order,
        }
    }
}

pub struct IngestContext<'a> {
    gateway: &'a dyn PersistenceGateway,
    retry: RetryPolicy,
    span: Span,
}

impl<'a> IngestContext<'a> {
    pub fn new(gateway: &'a dyn PersistenceGateway, retry: RetryPolicy) -> Self {
        let span = info_span!(
            "ingest",
            kind = field::Empty,
            study_id = field::Empty,
            study_file_id = field::Empty
        );
        Self {
            gateway,
            retry,
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn find(
        &self,
        collection: &str,
        query: &Value,
        projection: &Value,
    ) -> Result<Vec<Value>, IngestError> {
        self.retry
            .run(collection, || self.gateway.find(collection, query, projection))
    }

    pub fn insert<T: Serialize>(&self, records: &[T], collection: &str) -> Result<(), IngestError> {
        let documents = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| IngestError::Encode(err.to_string()))?;
        let start = Instant::now();
        self.retry
            .run(collection, || self.gateway.insert_many(&documents, collection))?;
        info!(
            collection,
            documents = documents.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded models"
        );
        Ok(())
    }

    pub fn persist(&self, batch: &Batch) -> Result<(), IngestError> {
        if !batch.data_arrays.is_empty() {
            self.insert(&batch.data_arrays, DATA_ARRAYS_COLLECTION)?;
        }
        if !batch.genes.is_empty() {
            self.insert(&batch.genes, GENES_COLLECTION)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub kind: MatrixKind,
    pub study_id: DocumentId,
    pub study_file_id: DocumentId,
    pub cluster_name: String,
    pub genes: usize,
    pub data_arrays: usize,
    pub batches: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl IngestSummary {
    fn start(kind: MatrixKind, scope: &FileScope) -> Self {
        let now = Utc::now();
        Self {
            kind,
            study_id: scope.study_id.clone(),
            study_file_id: scope.study_file_id.clone(),
            cluster_name: scope.cluster_name.clone(),
            genes: 0,
            data_arrays: 0,
            batches: 0,
            started_at: now,
            finished_at: now,
        }
    }

    fn record(&mut self, batch: &Batch) {
        self.genes += batch.genes.len();
        self.data_arrays += batch.data_arrays.len();
        self.batches += 1;
    }
}

// `stream` yields owned batches; the caller persists each one before
// pulling the next, so at most one batch is resident at a time.
pub trait ExpressionIngestor: Sized {
    type Batches: Iterator<Item = Result<Batch, IngestError>>;

    fn kind(&self) -> MatrixKind;

    fn scope(&self) -> &FileScope;

    fn validate(&self, ctx: &IngestContext<'_>) -> Result<(), IngestError>;

    fn stream(self) -> Self::Batches;

    fn execute_ingest(self, ctx: &IngestContext<'_>) -> Result<IngestSummary, IngestError> {
        let span = ctx.span().clone();
        span.record("kind", field::display(self.kind()));
        span.record("study_id", field::display(&self.scope().study_id));
        span.record("study_file_id", field::display(&self.scope().study_file_id));
        let _entered = span.enter();

        self.validate(ctx)?;
        let mut summary = IngestSummary::start(self.kind(), self.scope());
        info!(file = %summary.cluster_name, "validation passed, streaming");

        for batch in self.stream() {
            let batch = batch?;
            ctx.persist(&batch)?;
            summary.record(&batch);
        }
        summary.finished_at = Utc::now();
        info!(
            genes = summary.genes,
            data_arrays = summary.data_arrays,
            batches = summary.batches,
            "ingest finished"
        );
        Ok(summary)
    }
}
