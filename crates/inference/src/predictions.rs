//! Prediction records and the prediction file
//!
//! The file uses the pandas `DataFrame.to_json()` default layout: one object
//! per column, keyed by row index.
//!
//! ```json
//! {"id": {"0": "17"}, "extracted": {"0": {"ADR": []}},
//!  "target": {"0": {"ADR": ["тошнота"]}}, "generated_text": {"0": "..."}}
//! ```

use instruct_ner_core::error::{Error, Result};
use instruct_ner_core::ner::{calculate_metrics, MetricsReport};
use instruct_ner_utils::io::{read_json, write_json_pretty};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Entities grouped by type
pub type EntityMap = BTreeMap<String, Vec<String>>;

/// One predicted record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Instruction id
    pub id: String,
    /// Entities parsed from the generation
    pub extracted: EntityMap,
    /// Reference entities
    pub target: EntityMap,
    /// Decoded generation, prompt included
    pub generated_text: String,
}

const COLUMNS: [&str; 4] = ["id", "extracted", "target", "generated_text"];

/// Predictions for a whole split
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredictionTable {
    records: Vec<PredictionRecord>,
}

impl PredictionTable {
    /// Wrap records
    pub fn new(records: Vec<PredictionRecord>) -> Self {
        Self { records }
    }

    /// Add a record
    pub fn push(&mut self, record: PredictionRecord) {
        self.records.push(record);
    }

    /// Records in order
    pub fn records(&self) -> &[PredictionRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Score extracted against target entities
    pub fn metrics<S: AsRef<str>>(&self, entity_types: &[S]) -> MetricsReport {
        calculate_metrics(self.records.iter().map(|r| (&r.extracted, &r.target)), entity_types)
    }

    /// Convert to the column-oriented layout
    pub fn to_columns(&self) -> Result<Value> {
        let mut columns: BTreeMap<&str, Map<String, Value>> = COLUMNS.iter().map(|c| (*c, Map::new())).collect();
        for (row, record) in self.records.iter().enumerate() {
            let key = row.to_string();
            let cells = [
                ("id", Value::String(record.id.clone())),
                ("extracted", serde_json::to_value(&record.extracted)?),
                ("target", serde_json::to_value(&record.target)?),
                ("generated_text", Value::String(record.generated_text.clone())),
            ];
            for (column, value) in cells {
                if let Some(cells) = columns.get_mut(column) {
                    cells.insert(key.clone(), value);
                }
            }
        }
        Ok(Value::Object(
            columns
                .into_iter()
                .map(|(name, cells)| (name.to_string(), Value::Object(cells)))
                .collect(),
        ))
    }

    /// Rebuild from the column-oriented layout
    pub fn from_columns(value: &Value) -> Result<Self> {
        let column = |name: &str| -> Result<&Map<String, Value>> {
            value
                .get(name)
                .and_then(Value::as_object)
                .ok_or_else(|| Error::Serialization(format!("prediction file has no '{}' column", name)))
        };
        let ids = column("id")?;
        let extracted = column("extracted")?;
        let target = column("target")?;
        let generated = column("generated_text")?;

        let mut rows: Vec<(usize, &String)> = ids
            .keys()
            .map(|k| {
                k.parse::<usize>()
                    .map(|row| (row, k))
                    .map_err(|_| Error::Serialization(format!("row key '{}' is not an index", k)))
            })
            .collect::<Result<_>>()?;
        rows.sort();

        let cell = |map: &Map<String, Value>, key: &str, name: &str| -> Result<Value> {
            map.get(key)
                .cloned()
                .ok_or_else(|| Error::Serialization(format!("row {} has no '{}' cell", key, name)))
        };

        let mut records = Vec::with_capacity(rows.len());
        for (_, key) in rows {
            let id = match cell(ids, key, "id")? {
                Value::String(s) => s,
                other => other.to_string(),
            };
            let generated_text = match cell(generated, key, "generated_text")? {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            records.push(PredictionRecord {
                id,
                extracted: serde_json::from_value(cell(extracted, key, "extracted")?)?,
                target: serde_json::from_value(cell(target, key, "target")?)?,
                generated_text,
            });
        }
        Ok(Self { records })
    }

    /// Write the prediction file
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_pretty(path, &self.to_columns()?)?;
        Ok(())
    }

    /// Read a prediction file
    pub fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }
        let value: Value = read_json(path)?;
        Self::from_columns(&value)
    }
}

impl FromIterator<PredictionRecord> for PredictionTable {
    fn from_iter<I: IntoIterator<Item = PredictionRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
