pub mod batch;
pub mod config;
pub mod dense;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod mtx;
pub mod output;
pub mod query;
pub mod remote;
pub mod retry;
pub mod source;
pub mod store;
pub mod validate;
