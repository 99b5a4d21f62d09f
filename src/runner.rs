//! One end-to-end run: configuration → schema → calculator → writer, then the
//! product sales index when the configuration asks for one.

use std::{path::Path, sync::Arc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::calculator::{DataCalculator, IndexCalculator, RunSummary, INDEX_SCHEMA};
use crate::config::{Configuration, IndexConfig};
use crate::error::{EtlError, Stage};
use crate::schema::{Schema, SchemaRegistry};
use crate::writer::{self, WriteOptions, WriteReport};

/// A failed run: the stage that failed and how many records had been read.
#[derive(Debug, Error)]
#[error("{stage} stage failed after {processed} records: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    pub processed: u64,
    #[source]
    pub source: EtlError,
}

impl PipelineError {
    fn new(source: EtlError, processed: u64) -> Self {
        Self {
            stage: source.stage(),
            processed,
            source,
        }
    }
}

impl From<EtlError> for PipelineError {
    fn from(source: EtlError) -> Self {
        PipelineError::new(source, 0)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub schema: Arc<Schema>,
    pub summary: RunSummary,
    pub output: WriteReport,
    pub index: Option<IndexReport>,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    /// Counters over all index sources.
    pub summary: RunSummary,
    pub rows: usize,
    /// One file, or one per product partition.
    pub outputs: Vec<WriteReport>,
}

/// Load the configuration document at `config_path` and run it.
pub fn execute(config_path: &Path) -> Result<RunReport, PipelineError> {
    let config = Configuration::from_file(config_path)?;
    execute_with(&config)
}

/// Run an already loaded configuration.
#[instrument(level = "info", skip_all, fields(country = %config.country_code))]
pub fn execute_with(config: &Configuration) -> Result<RunReport, PipelineError> {
    let registry = SchemaRegistry::load(config.schema_dir.as_deref())?;
    let schema = registry.resolve(&config.country_code, config.schema_name.as_deref())?;
    config.check_against(&schema)?;
    info!(schema = %schema.name(), fields = schema.len(), "schema selected");

    let mut calculator = DataCalculator::new(config, Arc::clone(&schema));
    let dataset = calculator
        .run()
        .map_err(|e| PipelineError::new(e, calculator.processed()))?;
    let summary = calculator.summary();

    let output = writer::write(
        &dataset,
        &config.output_path,
        config.output_format,
        &WriteOptions::from_config(config),
    )
    .map_err(|e| PipelineError::new(e, summary.total))?;

    let index = match &config.index {
        Some(index) => Some(run_index(config, index, &registry)?),
        None => None,
    };

    Ok(RunReport {
        schema,
        summary,
        output,
        index,
    })
}

fn run_index(
    config: &Configuration,
    index: &IndexConfig,
    registry: &SchemaRegistry,
) -> Result<IndexReport, PipelineError> {
    let schema = registry.by_name(INDEX_SCHEMA)?;
    let mut calculator = IndexCalculator::new(config, index);
    let dataset = calculator
        .run(registry, schema)
        .map_err(|e| PipelineError::new(e, calculator.processed()))?;
    let summary = calculator.summary();

    let options = WriteOptions::from_config(config);
    let outputs = if index.partition_by_product {
        writer::write_partitioned(
            &dataset,
            &index.output_path,
            "product_id",
            config.output_format,
            &options,
        )
    } else {
        writer::write(&dataset, &index.output_path, config.output_format, &options)
            .map(|report| vec![report])
    }
    .map_err(|e| PipelineError::new(e, summary.total))?;

    info!(rows = dataset.len(), files = outputs.len(), "sales index written");
    Ok(IndexReport {
        summary,
        rows: dataset.len(),
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{transform, Outcome};
    use anyhow::Result;
    use arrow::array::{Array, Decimal128Array, Int64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::{self, File};
    use tempfile::tempdir;

    const US_INPUT: &str = "order_id,amount,currency\n1,10.50,USD\nx,5,USD\n";

    fn write_config(dir: &Path, body: &str) -> Result<std::path::PathBuf> {
        let path = dir.join("config.yml");
        fs::write(&path, body)?;
        Ok(path)
    }

    #[test]
    fn test_us_scenario() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("sales_us.csv"), US_INPUT)?;
        let cfg = write_config(
            dir.path(),
            "country_code: US\ninput_path: sales_us.csv\noutput_path: out/sales_us.parquet\n",
        )?;

        let report = execute(&cfg)?;
        assert_eq!(report.schema.name(), "sales_us");
        assert_eq!(report.summary.accepted, 1);
        assert_eq!(report.summary.rejected, 1);
        assert_eq!(report.output.rows, 1);

        let file = File::open(dir.path().join("out/sales_us.parquet"))?;
        let batches = ParquetRecordBatchReaderBuilder::try_new(file)?
            .build()?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 1);

        let order_id = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        let amount = batch
            .column(1)
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .unwrap();
        let currency = batch.column(2).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(order_id.value(0), 1);
        assert_eq!(amount.value_as_string(0), "10.50");
        assert_eq!(currency.value(0), "USD");
        Ok(())
    }

    #[test]
    fn test_abort_leaves_no_output() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("in.csv"), US_INPUT)?;
        let cfg = write_config(
            dir.path(),
            "country_code: US\ninput_path: in.csv\noutput_path: out.parquet\non_invalid_record: abort\n",
        )?;

        let err = execute(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Transform);
        assert_eq!(err.processed, 2);
        assert!(err.to_string().starts_with("transform stage failed after 2 records"), "{err}");
        assert!(!dir.path().join("out.parquet").exists());
        Ok(())
    }

    #[test]
    fn test_empty_input_writes_empty_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("in.csv"), "")?;
        let cfg = write_config(
            dir.path(),
            "country_code: us\ninput_path: in.csv\noutput_path: out.parquet\n",
        )?;

        let report = execute(&cfg)?;
        assert_eq!(report.output.rows, 0);
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&report.output.path)?)?;
        assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
        assert_eq!(builder.schema().fields().len(), 3);
        Ok(())
    }

    #[test]
    fn test_stage_attribution() -> Result<()> {
        let dir = tempdir()?;

        let err = execute(&dir.path().join("missing.yml")).unwrap_err();
        assert_eq!(err.stage, Stage::Config);
        assert_eq!(err.processed, 0);

        let cfg = write_config(
            dir.path(),
            "country_code: XX\ninput_path: in.csv\noutput_path: out.parquet\n",
        )?;
        assert_eq!(execute(&cfg).unwrap_err().stage, Stage::Schema);

        let cfg = write_config(
            dir.path(),
            "country_code: US\ninput_path: absent.csv\noutput_path: out.parquet\n",
        )?;
        assert_eq!(execute(&cfg).unwrap_err().stage, Stage::Load);

        fs::write(dir.path().join("in.csv"), US_INPUT)?;
        fs::create_dir(dir.path().join("taken"))?;
        let cfg = write_config(
            dir.path(),
            "country_code: US\ninput_path: in.csv\noutput_path: taken\n",
        )?;
        let err = execute(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Write);
        assert_eq!(err.processed, 2);
        Ok(())
    }

    #[test]
    fn test_zero_field_schema_fails_before_reading() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("schemas"))?;
        fs::write(
            dir.path().join("schemas/empty.yml"),
            "name: empty\nfields: []\n",
        )?;
        let cfg = write_config(
            dir.path(),
            "country_code: US\ninput_path: absent.csv\noutput_path: out.parquet\nschema_dir: schemas\nschema_name: empty\n",
        )?;
        let err = execute(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Schema);
        assert!(matches!(err.source, EtlError::SchemaValidation { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn test_arrow_ipc_with_nullable_field() -> Result<()> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("de.csv"),
            "order_id;order_date;amount;currency\n7;02.10.2017;1.299,90;eur\n",
        )?;
        let cfg = write_config(
            dir.path(),
            r#"
country_code: DE
input_path: de.csv
output_path: out/sales_de.arrow
output_format: arrow_ipc
delimiter: ";"
transform:
  currency_columns: [currency]
  date_format: "%d.%m.%Y"
  decimal_separator: ","
  thousands_separator: "."
"#,
        )?;
        let report = execute(&cfg)?;
        assert_eq!(report.schema.name(), "sales_de");
        assert_eq!(report.summary.accepted, 1);

        let reader = arrow::ipc::reader::FileReader::try_new(File::open(&report.output.path)?, None)?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = &batches[0];
        let city = batch
            .column_by_name("customer_city")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .unwrap();
        assert!(city.is_null(0));
        let currency = batch
            .column_by_name("currency")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .unwrap();
        assert_eq!(currency.value(0), "EUR");
        Ok(())
    }

    const OLIST: [(&str, &str); 4] = [
        (
            "olist_orders_dataset.csv",
            "order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_carrier_date,order_delivered_customer_date,order_estimated_delivery_date\n\
             o1,c1,delivered,2017-10-02 10:56:33,,,,2017-10-18 00:00:00\n\
             o2,c1,delivered,2017-10-11 09:00:00,,,,2017-10-25 00:00:00\n",
        ),
        (
            "olist_customers_dataset.csv",
            "customer_id,customer_unique_id,customer_zip_code_prefix,customer_city,customer_state\n\
             c1,u1,1000,sao paulo,SP\n",
        ),
        (
            "olist_order_items_dataset.csv",
            "order_id,order_item_id,product_id,seller_id,shipping_limit_date,price,freight_value\n\
             o1,1,p1,s1,2017-10-06 11:07:15,58.9,13.29\n\
             o2,1,p2,s1,2017-10-15 00:00:00,12.0,3.5\n",
        ),
        (
            "olist_order_reviews_dataset.csv",
            "review_id,order_id,review_score,review_comment_title,review_comment_message,review_creation_date,review_answer_timestamp\n\
             r1,o1,4,,,2017-10-10 00:00:00,2017-10-11 00:00:00\n",
        ),
    ];

    const INDEX_CONFIG: &str = "\
index:
  orders: olist/olist_orders_dataset.csv
  customers: olist/olist_customers_dataset.csv
  order_items: olist/olist_order_items_dataset.csv
  order_reviews: olist/olist_order_reviews_dataset.csv
";

    fn write_olist(dir: &Path) -> Result<()> {
        fs::create_dir_all(dir.join("olist"))?;
        for (name, body) in OLIST {
            fs::write(dir.join("olist").join(name), body)?;
        }
        fs::write(dir.join("in.csv"), US_INPUT)?;
        Ok(())
    }

    #[test]
    fn test_index_stage_writes_single_file() -> Result<()> {
        let dir = tempdir()?;
        write_olist(dir.path())?;
        let cfg = write_config(
            dir.path(),
            &format!(
                "country_code: US\ninput_path: in.csv\noutput_path: out.parquet\n{INDEX_CONFIG}  output_path: out/index.parquet\n"
            ),
        )?;

        let report = execute(&cfg)?;
        let index = report.index.expect("index report");
        assert_eq!(index.rows, 2);
        assert_eq!(index.summary.rejected, 0);
        assert_eq!(index.outputs.len(), 1);

        let file = File::open(dir.path().join("out/index.parquet"))?;
        let batches = ParquetRecordBatchReaderBuilder::try_new(file)?
            .build()?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = &batches[0];
        let rating = batch
            .column_by_name("mean_product_rating")
            .and_then(|c| c.as_any().downcast_ref::<arrow::array::Float64Array>())
            .unwrap();
        // p2 has sales but no review
        assert_eq!(rating.value(0), 4.0);
        assert_eq!(rating.value(1), 0.0);
        let cities = batch
            .column_by_name("city_sales")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .unwrap();
        assert_eq!(
            cities.value(0),
            r#"{"sao paulo":{"sales_count":1,"sales_sum":58.9}}"#
        );
        Ok(())
    }

    #[test]
    fn test_index_stage_partitions_by_product() -> Result<()> {
        let dir = tempdir()?;
        write_olist(dir.path())?;
        let cfg = write_config(
            dir.path(),
            &format!(
                "country_code: US\ninput_path: in.csv\noutput_path: out.parquet\n{INDEX_CONFIG}  output_path: out/output_table\n  partition_by_product: true\n  products: [p2]\n"
            ),
        )?;

        let report = execute(&cfg)?;
        let index = report.index.expect("index report");
        assert_eq!(index.rows, 1);
        assert_eq!(
            index.outputs[0].path,
            dir.path().join("out/output_table/product_id=p2/part-0.parquet")
        );
        assert!(!dir.path().join("out/output_table/product_id=p1").exists());
        Ok(())
    }

    #[test]
    fn test_index_stage_failure_is_attributed() -> Result<()> {
        let dir = tempdir()?;
        write_olist(dir.path())?;
        fs::remove_file(dir.path().join("olist/olist_order_reviews_dataset.csv"))?;
        let cfg = write_config(
            dir.path(),
            &format!(
                "country_code: US\ninput_path: in.csv\noutput_path: out.parquet\n{INDEX_CONFIG}  output_path: out/index.parquet\n"
            ),
        )?;

        let err = execute(&cfg).unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        // orders, customers and order lines were read before the reviews failed
        assert_eq!(err.processed, 2 + 1 + 2);
        assert!(dir.path().join("out.parquet").exists());
        assert!(!dir.path().join("out/index.parquet").exists());
        Ok(())
    }

    #[test]
    fn test_accepted_records_are_stable_under_retransform() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("in.csv"), US_INPUT)?;
        let config = Configuration::from_yaml_str(
            "country_code: US\ninput_path: in.csv\noutput_path: out.parquet\n",
            "test.yml",
            dir.path(),
        )?;
        let schema = SchemaRegistry::builtin()?.lookup("US")?;
        let dataset = DataCalculator::new(&config, Arc::clone(&schema)).run()?;

        for (i, record) in dataset.records().iter().enumerate() {
            let again = transform(record.to_raw(&schema, i as u64 + 1), &config, &schema);
            assert_eq!(again, Outcome::Accepted(record.clone()));
        }
        Ok(())
    }
}
