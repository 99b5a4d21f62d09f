//! Batch sales ETL: raw CSV sales data is validated against a country
//! schema and written out as a columnar file. Optionally, marketplace order
//! data is condensed into a weekly product sales index.

pub mod calculator;
pub mod config;
pub mod error;
pub mod runner;
pub mod schema;
pub mod writer;

pub use calculator::{DataCalculator, Dataset, IndexCalculator, Outcome, RunSummary};
pub use config::Configuration;
pub use error::{EtlError, RecordError, RejectReason, Stage};
pub use runner::{execute, execute_with, IndexReport, PipelineError, RunReport};
pub use schema::{Schema, SchemaRegistry};
