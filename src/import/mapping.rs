//! Column-mapping resolution.
//!
//! The mapping saved during the upload step is a map of column index to
//! `{entityType, field, transform}`. It is compiled once per run into an
//! [`EntityMapping`] so field-key classification (named field vs. custom
//! field id) happens exactly once, never per row.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::{EntityType, FieldMap, FieldValue};

/// One saved column mapping entry, as persisted on the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTarget {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub transform: Transform,
}

/// Per-field transforms, applied in a fixed order:
/// trim, case-fold, empty-substitution, date-parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transform {
    pub trim: bool,
    pub lowercase: bool,
    pub default_if_empty: Option<String>,
    pub parse_date: bool,
}

/// Field lookup key, classified once at mapping-build time. Numeric field
/// references address custom fields by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKey {
    ByName(String),
    ById(i64),
}

impl FieldKey {
    fn from_raw(raw: &str) -> FieldKey {
        match raw.parse::<i64>() {
            Ok(id) => FieldKey::ById(id),
            Err(_) => FieldKey::ByName(raw.to_string()),
        }
    }

    pub fn storage_key(&self) -> String {
        match self {
            FieldKey::ByName(name) => name.clone(),
            FieldKey::ById(id) => format!("custom_field_{id}"),
        }
    }
}

/// A column bound to a concrete entity field.
#[derive(Debug, Clone)]
pub struct BoundColumn {
    pub column: usize,
    pub key: FieldKey,
    pub transform: Transform,
}

/// The compiled mapping: bound columns grouped by target entity type.
#[derive(Debug, Clone, Default)]
pub struct EntityMapping {
    columns: BTreeMap<EntityType, Vec<BoundColumn>>,
}

impl EntityMapping {
    pub fn columns_for(&self, entity: EntityType) -> Option<&[BoundColumn]> {
        self.columns.get(&entity).map(Vec::as_slice)
    }

    /// Restrict the mapping to a single entity type (single-entity runs).
    pub fn retain_entity(&mut self, entity: EntityType) {
        self.columns.retain(|k, _| *k == entity);
    }
}

/// Compile the saved mapping. Lenient: entries with no entity type, an
/// unknown entity type, or no field are skipped so a partially configured
/// mapping never aborts a run.
pub fn group_by_entity(mapping: &BTreeMap<u32, ColumnTarget>) -> EntityMapping {
    let mut columns: BTreeMap<EntityType, Vec<BoundColumn>> = BTreeMap::new();
    for (index, target) in mapping {
        let (Some(entity_raw), Some(field_raw)) =
            (target.entity_type.as_deref(), target.field.as_deref())
        else {
            continue;
        };
        let Some(entity) = EntityType::parse(entity_raw) else {
            continue;
        };
        let field_raw = field_raw.trim();
        if field_raw.is_empty() {
            continue;
        }
        columns.entry(entity).or_default().push(BoundColumn {
            column: *index as usize,
            key: FieldKey::from_raw(field_raw),
            transform: target.transform.clone(),
        });
    }
    EntityMapping { columns }
}

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];

fn apply_transform(raw: &str, transform: &Transform) -> FieldValue {
    let mut value = if transform.trim {
        raw.trim().to_string()
    } else {
        raw.to_string()
    };
    if transform.lowercase {
        value = value.to_lowercase();
    }
    if value.trim().is_empty() {
        match &transform.default_if_empty {
            Some(default) => value = default.clone(),
            None => return FieldValue::Null,
        }
    }
    if transform.parse_date {
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(value.trim(), format) {
                return FieldValue::Date(date);
            }
        }
        // Bad date degrades to "field omitted", never a row error.
        return FieldValue::Null;
    }
    FieldValue::Text(value)
}

/// Extract one entity's field map from a row. Empty values are omitted.
pub fn transform_row(row: &[String], columns: &[BoundColumn]) -> FieldMap {
    let mut fields = FieldMap::new();
    for bound in columns {
        let Some(raw) = row.get(bound.column) else {
            continue;
        };
        let value = apply_transform(raw, &bound.transform);
        if value.is_empty() {
            continue;
        }
        fields.insert(bound.key.storage_key(), value);
    }
    fields
}
