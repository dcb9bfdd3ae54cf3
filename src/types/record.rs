//! Entity record primitives shared by the import engine and the stores

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Destination record kind for a column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Lead,
    Deal,
    Activity,
}

impl EntityType {
    /// Fixed row-processing order. Dependents (lead, deal, activity) must
    /// come after the entities they link to (person, organization), so
    /// sibling records exist before their foreign keys are injected.
    pub const PROCESSING_ORDER: [EntityType; 5] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Lead,
        EntityType::Deal,
        EntityType::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Lead => "lead",
            EntityType::Deal => "deal",
            EntityType::Activity => "activity",
        }
    }

    pub fn parse(s: &str) -> Option<EntityType> {
        match s.to_lowercase().as_str() {
            "person" | "people" | "contact" => Some(EntityType::Person),
            "organization" | "organisation" | "org" | "company" => Some(EntityType::Organization),
            "lead" => Some(EntityType::Lead),
            "deal" => Some(EntityType::Deal),
            "activity" => Some(EntityType::Activity),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single cell/field value as the source format yields it.
///
/// Untagged: JSON round-trips keep the natural representation. Variant
/// order matters for deserialization — `Id` and `Date` are tried before
/// `Text` so id/date strings come back typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Id(Uuid),
    Date(NaiveDate),
    Text(String),
}

impl FieldValue {
    /// Empty means "no data": null, or text that is blank after trimming.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_id(&self) -> Option<Uuid> {
        match self {
            FieldValue::Id(id) => Some(*id),
            FieldValue::Text(s) => Uuid::parse_str(s).ok(),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

/// Flat field → value record for one entity extracted from one row.
pub type FieldMap = BTreeMap<String, FieldValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_order_puts_parents_first() {
        let order = EntityType::PROCESSING_ORDER;
        let pos = |e| order.iter().position(|x| *x == e).unwrap();
        assert!(pos(EntityType::Person) < pos(EntityType::Lead));
        assert!(pos(EntityType::Organization) < pos(EntityType::Deal));
        assert!(pos(EntityType::Deal) < pos(EntityType::Activity));
    }

    #[test]
    fn test_entity_type_parse_aliases() {
        assert_eq!(EntityType::parse("Company"), Some(EntityType::Organization));
        assert_eq!(EntityType::parse("person"), Some(EntityType::Person));
        assert_eq!(EntityType::parse("unknown"), None);
    }

    #[test]
    fn test_field_value_empty() {
        assert!(FieldValue::Null.is_empty());
        assert!(FieldValue::Text("   ".to_string()).is_empty());
        assert!(!FieldValue::Text("x".to_string()).is_empty());
        assert!(!FieldValue::Number(0.0).is_empty());
    }

    #[test]
    fn test_field_value_roundtrip_keeps_types() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&FieldValue::Id(id)).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_id(), Some(id));

        let date = FieldValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        let json = serde_json::to_string(&date).unwrap();
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, date);
    }
}
