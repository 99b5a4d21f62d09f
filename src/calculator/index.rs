//! Weekly product sales index.
//!
//! Order lines are joined with their orders and the ordering customers, then
//! counted and summed per product and purchase week with a per-city
//! breakdown. Independently, review scores are joined through orders onto
//! order lines and averaged per product. The two sides are outer-joined on
//! `product_id`; gaps on either side become zero.

use chrono::{Datelike, Duration, NaiveDate};
use serde_json::json;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
};
use tracing::{debug, info, instrument};

use super::record::{Dataset, RawRecord, Value};
use super::transform::{transform, Outcome};
use super::{DataCalculator, RunSummary};
use crate::config::{Configuration, IndexConfig, TransformParams, UnknownColumnPolicy};
use crate::error::{EtlError, Result};
use crate::schema::{Schema, SchemaRegistry};

/// Schema of the index rows.
pub const INDEX_SCHEMA: &str = "sales_index";

const ORDERS: &str = "olist_orders";
const CUSTOMERS: &str = "olist_customers";
const ORDER_ITEMS: &str = "olist_order_items";
const ORDER_REVIEWS: &str = "olist_order_reviews";

/// The validated source datasets of one index run.
#[derive(Debug, Clone)]
pub struct IndexInputs {
    pub orders: Dataset,
    pub customers: Dataset,
    pub order_items: Dataset,
    pub order_reviews: Dataset,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CitySales {
    pub sales_count: i64,
    pub sales_sum: f64,
}

/// Sales of one product in one purchase week.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySales {
    pub total_count: i64,
    pub total_sales_sum: f64,
    pub city_sales: BTreeMap<String, CitySales>,
}

impl WeeklySales {
    fn add(&mut self, city: &str, price: f64) {
        self.total_count += 1;
        self.total_sales_sum += price;
        let c = self.city_sales.entry(city.to_string()).or_default();
        c.sales_count += 1;
        c.sales_sum += price;
    }

    /// `{"<city>": {"sales_count": n, "sales_sum": x}, ...}` with cities sorted.
    pub fn city_sales_json(&self) -> String {
        let cities: serde_json::Map<String, serde_json::Value> = self
            .city_sales
            .iter()
            .map(|(city, s)| {
                (
                    city.clone(),
                    json!({ "sales_count": s.sales_count, "sales_sum": s.sales_sum }),
                )
            })
            .collect();
        serde_json::Value::Object(cities).to_string()
    }
}

/// Product → purchase week → sales.
pub type SalesSummary = BTreeMap<String, BTreeMap<NaiveDate, WeeklySales>>;

/// Sunday closing the week that contains `day`.
pub fn week_ending(day: NaiveDate) -> NaiveDate {
    day + Duration::days(i64::from(6 - day.weekday().num_days_from_monday()))
}

/// Loads the source datasets and derives the index from them.
pub struct IndexCalculator<'a> {
    config: &'a Configuration,
    index: &'a IndexConfig,
    summary: RunSummary,
}

impl<'a> IndexCalculator<'a> {
    pub fn new(config: &'a Configuration, index: &'a IndexConfig) -> Self {
        Self {
            config,
            index,
            summary: RunSummary::default(),
        }
    }

    /// Load the index sources and calculate the index rows under `schema`.
    #[instrument(level = "info", skip_all, fields(products = self.index.products.len()))]
    pub fn run(&mut self, registry: &SchemaRegistry, schema: Arc<Schema>) -> Result<Dataset> {
        let inputs = self.load(registry)?;
        self.calculate(&inputs, schema)
    }

    /// Read and validate each source under its marketplace schema. The
    /// run's invalid-record policy applies; the run's transform parameters,
    /// filters and delimiter do not.
    pub fn load(&mut self, registry: &SchemaRegistry) -> Result<IndexInputs> {
        let index = self.index;
        Ok(IndexInputs {
            orders: self.load_one(registry, ORDERS, &index.orders)?,
            customers: self.load_one(registry, CUSTOMERS, &index.customers)?,
            order_items: self.load_one(registry, ORDER_ITEMS, &index.order_items)?,
            order_reviews: self.load_one(registry, ORDER_REVIEWS, &index.order_reviews)?,
        })
    }

    fn load_one(
        &mut self,
        registry: &SchemaRegistry,
        schema_name: &str,
        inputs: &[PathBuf],
    ) -> Result<Dataset> {
        let schema = registry.by_name(schema_name)?;
        let config = self.source_config(inputs);
        let mut calculator = DataCalculator::new(&config, schema);
        let result = calculator.run();
        self.summary += calculator.summary();
        let dataset = result?;
        debug!(schema = schema_name, rows = dataset.len(), "index source loaded");
        Ok(dataset)
    }

    fn source_config(&self, inputs: &[PathBuf]) -> Configuration {
        Configuration {
            input_path: inputs.to_vec(),
            delimiter: ',',
            unknown_columns: UnknownColumnPolicy::Ignore,
            filters: BTreeMap::new(),
            transform: TransformParams::default(),
            index: None,
            ..self.config.clone()
        }
    }

    /// Combine loaded sources into index rows, validated against `schema`.
    pub fn calculate(&self, inputs: &IndexInputs, schema: Arc<Schema>) -> Result<Dataset> {
        let products = &self.index.products;
        let summary = calculate_summary(inputs, products)?;
        let ratings = calculate_product_ratings(inputs, products)?;

        let config = self.source_config(&[]);
        let mut dataset = Dataset::new(Arc::clone(&schema));
        let no_sales = WeeklySales::default();

        let ids: BTreeSet<&str> = summary
            .keys()
            .chain(ratings.keys())
            .map(String::as_str)
            .collect();
        let product_count = ids.len();
        for product in ids {
            let rating = ratings.get(product).copied().unwrap_or(0.0);
            let rows: Vec<(Option<NaiveDate>, &WeeklySales)> = match summary.get(product) {
                Some(weeks) => weeks.iter().map(|(w, s)| (Some(*w), s)).collect(),
                None => vec![(None, &no_sales)],
            };
            for (week, sales) in rows {
                let position = dataset.len() as u64 + 1;
                let raw = RawRecord::new(position)
                    .with("product_id", Value::Text(product.to_string()))
                    .with("order_purchase_week", week.map_or(Value::Null, Value::Date))
                    .with("total_count", Value::Integer(sales.total_count))
                    .with("total_sales_sum", Value::Float(sales.total_sales_sum))
                    .with("city_sales", Value::Text(sales.city_sales_json()))
                    .with("mean_product_rating", Value::Float(rating));
                match transform(raw, &config, &schema) {
                    Outcome::Accepted(record) => dataset.push(record),
                    Outcome::Rejected(error) => {
                        return Err(EtlError::InvalidRecord { position, error })
                    }
                    Outcome::Filtered => {}
                }
            }
        }

        info!(
            products = product_count,
            rows = dataset.len(),
            "sales index calculated"
        );
        Ok(dataset)
    }

    /// Record counters over every source loaded so far.
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn processed(&self) -> u64 {
        self.summary.total
    }
}

/// Order lines joined with orders and customers, grouped by product and the
/// week of the order's purchase timestamp. Lines whose order or customer is
/// unknown are left out.
pub fn calculate_summary(inputs: &IndexInputs, products: &[String]) -> Result<SalesSummary> {
    let customers = &inputs.customers;
    let (c_id, c_city) = (
        column(customers, "customer_id")?,
        column(customers, "customer_city")?,
    );
    let mut cities: HashMap<&str, Vec<&str>> = HashMap::new();
    for rec in customers.records() {
        let v = rec.values();
        if let (Some(id), Some(city)) = (text(&v[c_id]), text(&v[c_city])) {
            cities.entry(id).or_default().push(city);
        }
    }

    let orders = &inputs.orders;
    let (o_id, o_customer, o_purchased) = (
        column(orders, "order_id")?,
        column(orders, "customer_id")?,
        column(orders, "order_purchase_timestamp")?,
    );
    let mut placed: HashMap<&str, Vec<(&str, NaiveDate)>> = HashMap::new();
    for rec in orders.records() {
        let v = rec.values();
        if let (Some(id), Some(customer), Some(day)) =
            (text(&v[o_id]), text(&v[o_customer]), day(&v[o_purchased]))
        {
            placed.entry(id).or_default().push((customer, week_ending(day)));
        }
    }

    let items = &inputs.order_items;
    let (i_order, i_product, i_price) = (
        column(items, "order_id")?,
        column(items, "product_id")?,
        column(items, "price")?,
    );
    let mut summary = SalesSummary::new();
    for rec in items.records() {
        let v = rec.values();
        let (Some(order), Some(product), Some(price)) =
            (text(&v[i_order]), text(&v[i_product]), number(&v[i_price]))
        else {
            continue;
        };
        if !wanted(products, product) {
            continue;
        }
        for (customer, week) in placed.get(order).into_iter().flatten() {
            for city in cities.get(customer).into_iter().flatten() {
                summary
                    .entry(product.to_string())
                    .or_default()
                    .entry(*week)
                    .or_default()
                    .add(city, price);
            }
        }
    }
    Ok(summary)
}

/// Mean review score per product. A review counts once for every line of the
/// order it belongs to.
pub fn calculate_product_ratings(
    inputs: &IndexInputs,
    products: &[String],
) -> Result<BTreeMap<String, f64>> {
    let orders = &inputs.orders;
    let o_id = column(orders, "order_id")?;
    let mut order_count: HashMap<&str, u32> = HashMap::new();
    for rec in orders.records() {
        if let Some(id) = text(&rec.values()[o_id]) {
            *order_count.entry(id).or_default() += 1;
        }
    }

    let items = &inputs.order_items;
    let (i_order, i_product) = (column(items, "order_id")?, column(items, "product_id")?);
    let mut lines: HashMap<&str, Vec<&str>> = HashMap::new();
    for rec in items.records() {
        let v = rec.values();
        if let (Some(order), Some(product)) = (text(&v[i_order]), text(&v[i_product])) {
            lines.entry(order).or_default().push(product);
        }
    }

    let reviews = &inputs.order_reviews;
    let (r_order, r_score) = (column(reviews, "order_id")?, column(reviews, "review_score")?);
    let mut totals: BTreeMap<String, (f64, u64)> = BTreeMap::new();
    for rec in reviews.records() {
        let v = rec.values();
        let (Some(order), Some(score)) = (text(&v[r_order]), number(&v[r_score])) else {
            continue;
        };
        let Some(&matches) = order_count.get(order) else {
            continue;
        };
        for product in lines.get(order).into_iter().flatten() {
            if wanted(products, product) {
                let (sum, n) = totals.entry(product.to_string()).or_default();
                *sum += score * f64::from(matches);
                *n += u64::from(matches);
            }
        }
    }

    Ok(totals
        .into_iter()
        .map(|(product, (sum, n))| (product, sum / n as f64))
        .collect())
}

fn wanted(products: &[String], product: &str) -> bool {
    products.is_empty() || products.iter().any(|p| p == product)
}

fn column(data: &Dataset, name: &str) -> Result<usize> {
    data.schema().index_of(name).ok_or_else(|| {
        EtlError::schema(
            data.schema().name(),
            format!("field `{name}` is required by the sales index"),
        )
    })
}

fn text(v: &Value) -> Option<&str> {
    match v {
        Value::Text(s) => Some(s),
        _ => None,
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Decimal(d) => Some(d.mantissa as f64 / 10f64.powi(i32::from(d.scale))),
        _ => None,
    }
}

fn day(v: &Value) -> Option<NaiveDate> {
    match v {
        Value::DateTime(dt) => Some(dt.date()),
        Value::Date(d) => Some(*d),
        _ => None,
    }
}
