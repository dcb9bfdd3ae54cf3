//! Duplicate detection probes.
//!
//! Identity fields are fixed per entity type. A probe is an OR of exact
//! equality over whichever identity fields carry a value; an entity with
//! no identity data never matches anything.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::store::{MatchQuery, MatchScope};
use crate::types::{EntityType, FieldMap, FieldValue};

/// Closed activities older than this never count as duplicates.
const ACTIVITY_MATCH_WINDOW_DAYS: i64 = 30;

pub fn identity_fields(entity: EntityType) -> &'static [&'static str] {
    match entity {
        EntityType::Person | EntityType::Lead => &["email", "phone", "contactName"],
        EntityType::Deal => &["title", "contactName"],
        EntityType::Organization => &["name", "website"],
        EntityType::Activity => &["subject", "activityType"],
    }
}

/// The non-empty identity field/value pairs of a candidate record.
pub fn identity_values(entity: EntityType, fields: &FieldMap) -> Vec<(String, FieldValue)> {
    identity_fields(entity)
        .iter()
        .filter_map(|name| {
            fields
                .get(*name)
                .filter(|v| !v.is_empty())
                .map(|v| (name.to_string(), v.clone()))
        })
        .collect()
}

pub fn has_identity(entity: EntityType, fields: &FieldMap) -> bool {
    identity_fields(entity)
        .iter()
        .any(|name| fields.get(*name).is_some_and(|v| !v.is_empty()))
}

/// Build the duplicate probe for a candidate, or `None` when every
/// identity field is empty.
pub fn match_query(entity: EntityType, owner_id: Uuid, fields: &FieldMap) -> Option<MatchQuery> {
    let any_of = identity_values(entity, fields);
    if any_of.is_empty() {
        return None;
    }
    let scope = match entity {
        EntityType::Organization => MatchScope::ActiveOnly,
        EntityType::Activity => {
            MatchScope::OpenOrCreatedSince(Utc::now() - Duration::days(ACTIVITY_MATCH_WINDOW_DAYS))
        }
        _ => MatchScope::Any,
    };
    Some(MatchQuery {
        entity_type: entity,
        owner_id,
        any_of,
        scope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_candidate_yields_no_probe() {
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("notes".to_string(), FieldValue::from("irrelevant"));
        fields.insert("email".to_string(), FieldValue::Text("  ".to_string()));
        assert!(match_query(EntityType::Person, owner, &fields).is_none());
        assert!(!has_identity(EntityType::Person, &fields));
    }

    #[test]
    fn test_probe_covers_only_populated_identity_fields() {
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("email".to_string(), FieldValue::from("a@x.com"));
        fields.insert("contactName".to_string(), FieldValue::from("Alice"));

        let query = match_query(EntityType::Person, owner, &fields).unwrap();
        assert_eq!(query.any_of.len(), 2);
        assert!(query.any_of.iter().all(|(k, _)| k == "email" || k == "contactName"));
        assert_eq!(query.scope, MatchScope::Any);
    }

    #[test]
    fn test_organization_probe_excludes_archived() {
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("name".to_string(), FieldValue::from("Acme"));
        let query = match_query(EntityType::Organization, owner, &fields).unwrap();
        assert_eq!(query.scope, MatchScope::ActiveOnly);
    }

    #[test]
    fn test_activity_probe_has_recency_scope() {
        let owner = Uuid::new_v4();
        let mut fields = FieldMap::new();
        fields.insert("subject".to_string(), FieldValue::from("Call"));
        let query = match_query(EntityType::Activity, owner, &fields).unwrap();
        assert!(matches!(query.scope, MatchScope::OpenOrCreatedSince(_)));
    }
}
