// src/schema/registry.rs

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use super::types::{Schema, SchemaDef};
use crate::error::{EtlError, Result};

/// Definitions compiled into the binary.
const BUILTIN: &[(&str, &str)] = &[
    ("sales_us.yml", include_str!("../../schemas/sales_us.yml")),
    ("sales_br.yml", include_str!("../../schemas/sales_br.yml")),
    ("sales_de.yml", include_str!("../../schemas/sales_de.yml")),
    ("sales_index.yml", include_str!("../../schemas/sales_index.yml")),
    ("olist_customers.yml", include_str!("../../schemas/olist_customers.yml")),
    ("olist_geolocation.yml", include_str!("../../schemas/olist_geolocation.yml")),
    ("olist_order_items.yml", include_str!("../../schemas/olist_order_items.yml")),
    ("olist_order_payments.yml", include_str!("../../schemas/olist_order_payments.yml")),
    ("olist_order_reviews.yml", include_str!("../../schemas/olist_order_reviews.yml")),
    ("olist_orders.yml", include_str!("../../schemas/olist_orders.yml")),
    ("olist_product_category.yml", include_str!("../../schemas/olist_product_category.yml")),
    ("olist_products.yml", include_str!("../../schemas/olist_products.yml")),
    ("olist_sellers.yml", include_str!("../../schemas/olist_sellers.yml")),
];

/// Read-only lookup of schemas by name or by country code.
///
/// All definitions are validated when the registry is built; there is no way to
/// add or change a schema afterwards.
#[derive(Debug)]
pub struct SchemaRegistry {
    by_name: BTreeMap<String, Arc<Schema>>,
    by_country: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// Registry holding only the compiled-in definitions.
    pub fn builtin() -> Result<Self> {
        Self::load(None)
    }

    /// Built-in definitions plus every `*.yml`, `*.yaml` and `*.json` file in
    /// `schema_dir`. A file-backed schema replaces a built-in of the same name.
    #[instrument(level = "debug")]
    pub fn load(schema_dir: Option<&Path>) -> Result<Self> {
        let mut schemas = BUILTIN
            .iter()
            .map(|(origin, text)| SchemaDef::from_yaml_str(text, origin).and_then(Schema::from_def))
            .collect::<Result<Vec<_>>>()?;

        if let Some(dir) = schema_dir {
            let from_disk = read_schema_dir(dir)?;
            info!(dir = %dir.display(), count = from_disk.len(), "loaded schema definitions");
            schemas.extend(from_disk);
        }

        Self::from_schemas(schemas)
    }

    /// Build a registry from already-validated schemas. Later entries replace
    /// earlier ones with the same name.
    pub fn from_schemas(schemas: impl IntoIterator<Item = Schema>) -> Result<Self> {
        let mut by_name: BTreeMap<String, Arc<Schema>> = BTreeMap::new();
        for schema in schemas {
            if by_name.contains_key(schema.name()) {
                debug!(schema = schema.name(), "overriding schema definition");
            }
            by_name.insert(schema.name().to_string(), Arc::new(schema));
        }

        let mut by_country: BTreeMap<String, String> = BTreeMap::new();
        for schema in by_name.values() {
            for country in schema.countries() {
                if let Some(previous) = by_country.insert(country.clone(), schema.name().to_string())
                {
                    return Err(EtlError::schema(
                        schema.name(),
                        format!("country {country} is already claimed by `{previous}`"),
                    ));
                }
            }
        }

        Ok(Self {
            by_name,
            by_country,
        })
    }

    /// Look `key` up as a schema name first, then as a country code.
    pub fn lookup(&self, key: &str) -> Result<Arc<Schema>> {
        if let Some(schema) = self.by_name.get(key) {
            return Ok(Arc::clone(schema));
        }
        self.for_country(key)
    }

    /// Schema registered under exactly `name`.
    pub fn by_name(&self, name: &str) -> Result<Arc<Schema>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| EtlError::SchemaNotFound(name.to_string()))
    }

    /// Default schema for a country code (case-insensitive).
    pub fn for_country(&self, country_code: &str) -> Result<Arc<Schema>> {
        let code = country_code.trim().to_ascii_uppercase();
        self.by_country
            .get(&code)
            .and_then(|name| self.by_name.get(name))
            .cloned()
            .ok_or(EtlError::SchemaNotFound(code))
    }

    /// Resolve the schema for a run: an explicit `schema_name` wins over the
    /// country-derived default.
    pub fn resolve(&self, country_code: &str, schema_name: Option<&str>) -> Result<Arc<Schema>> {
        match schema_name {
            Some(name) => self.by_name(name),
            None => self.for_country(country_code),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

/// Parse every definition file in `dir`, in file-name order.
fn read_schema_dir(dir: &Path) -> Result<Vec<Schema>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        EtlError::schema(dir.display().to_string(), format!("cannot read directory: {e}"))
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut schemas = Vec::new();
    let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in paths {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let is_json = match ext.as_deref() {
            Some("yml") | Some("yaml") => false,
            Some("json") => true,
            _ => continue,
        };

        let origin = path.display().to_string();
        let text = fs::read_to_string(&path)
            .map_err(|e| EtlError::schema(&origin, format!("cannot read file: {e}")))?;
        let def = if is_json {
            SchemaDef::from_json_str(&text, &origin)?
        } else {
            SchemaDef::from_yaml_str(&text, &origin)?
        };
        let schema = Schema::from_def(def)?;

        if let Some(first) = seen.insert(schema.name().to_string(), path.clone()) {
            return Err(EtlError::schema(
                schema.name(),
                format!("defined in both {} and {origin}", first.display()),
            ));
        }
        debug!(schema = schema.name(), path = %origin, "parsed schema file");
        schemas.push(schema);
    }
    Ok(schemas)
}
