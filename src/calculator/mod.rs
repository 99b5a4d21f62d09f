//! The data calculator: raw CSV rows in, a validated [`Dataset`] out.
//!
//! [`source::load`] streams [`RawRecord`]s, [`transform::transform`] maps each
//! onto the schema, and [`DataCalculator::run`] drives both while applying the
//! invalid-record policy. [`index::IndexCalculator`] combines several
//! validated marketplace datasets into the weekly product sales index.

pub mod coerce;
pub mod index;
pub mod parse;
pub mod record;
pub mod source;
pub mod transform;

use std::{ops::AddAssign, sync::Arc};
use tracing::{info, instrument, warn};

use crate::config::{Configuration, InvalidRecordPolicy};
use crate::error::{EtlError, Result};
use crate::schema::Schema;
pub use index::{IndexCalculator, IndexInputs, INDEX_SCHEMA};
pub use record::{Dataset, Decimal, Origin, RawRecord, ValidatedRecord, Value, ValueKind};
pub use source::{load, RecordSource};
pub use transform::{transform, Outcome};

/// Rejections logged individually before only the total is reported.
const LOGGED_REJECTIONS: u64 = 5;

/// Per-run record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub filtered: u64,
}

impl AddAssign for RunSummary {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.filtered += other.filtered;
    }
}

pub struct DataCalculator<'a> {
    config: &'a Configuration,
    schema: Arc<Schema>,
    summary: RunSummary,
}

impl<'a> DataCalculator<'a> {
    pub fn new(config: &'a Configuration, schema: Arc<Schema>) -> Self {
        Self {
            config,
            schema,
            summary: RunSummary::default(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn load(&self) -> Result<RecordSource> {
        load(self.config)
    }

    pub fn transform(&self, raw: RawRecord) -> Outcome {
        transform(raw, self.config, &self.schema)
    }

    /// Load every input, transform each record in order and collect the
    /// accepted ones. Under `abort` the first rejection ends the run.
    #[instrument(level = "info", skip_all, fields(schema = %self.schema.name()))]
    pub fn run(&mut self) -> Result<Dataset> {
        self.summary = RunSummary::default();
        let mut dataset = Dataset::new(Arc::clone(&self.schema));

        for raw in self.load()? {
            let raw = raw?;
            let position = raw.position;
            let origin = raw.origin.clone();
            self.summary.total += 1;

            match self.transform(raw) {
                Outcome::Accepted(record) => {
                    self.summary.accepted += 1;
                    dataset.push(record);
                }
                Outcome::Filtered => self.summary.filtered += 1,
                Outcome::Rejected(error) => {
                    self.summary.rejected += 1;
                    if self.config.on_invalid_record == InvalidRecordPolicy::Abort {
                        return Err(EtlError::InvalidRecord { position, error });
                    }
                    if self.summary.rejected <= LOGGED_REJECTIONS {
                        let (source, line) = origin
                            .map(|o| (o.source.display().to_string(), o.line))
                            .unwrap_or_default();
                        warn!(position, %source, line, %error, "record dropped");
                    }
                }
            }
        }

        let s = self.summary;
        info!(
            total = s.total,
            accepted = s.accepted,
            rejected = s.rejected,
            filtered = s.filtered,
            "calculation finished"
        );
        Ok(dataset)
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Records read so far, including the one that stopped a failed run.
    pub fn processed(&self) -> u64 {
        self.summary.total
    }
}
