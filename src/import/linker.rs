//! Relationship linking.
//!
//! Dependent entities (lead, deal, activity) pick up foreign keys and
//! denormalized display fields from siblings created or matched earlier
//! in the same row. Absent siblings leave the foreign key unset.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};

use crate::store::StoredRecord;
use crate::types::{EntityType, FieldMap, FieldValue};

/// Records produced earlier while processing the current row.
pub type SiblingSet = BTreeMap<EntityType, StoredRecord>;

pub fn link(entity: EntityType, fields: &mut FieldMap, siblings: &SiblingSet) {
    let person = siblings.get(&EntityType::Person);
    let organization = siblings.get(&EntityType::Organization);
    let lead = siblings.get(&EntityType::Lead);
    let deal = siblings.get(&EntityType::Deal);

    match entity {
        EntityType::Lead => {
            inject_id(fields, "personId", person);
            inject_id(fields, "organizationId", organization);
            copy_field(fields, "organizationName", organization, "name");
        }
        EntityType::Deal => {
            inject_id(fields, "personId", person);
            copy_field(fields, "contactName", person, "contactName");
            copy_field(fields, "email", person, "email");
            copy_field(fields, "phone", person, "phone");
            inject_id(fields, "organizationId", organization);
            copy_field(fields, "organizationName", organization, "name");
            inject_id(fields, "leadId", lead);
        }
        EntityType::Activity => {
            inject_id(fields, "personId", person);
            inject_id(fields, "organizationId", organization);
            inject_id(fields, "leadId", lead);
            inject_id(fields, "dealId", deal);
        }
        EntityType::Person | EntityType::Organization => {}
    }

    apply_defaults(entity, fields);
}

fn inject_id(fields: &mut FieldMap, key: &str, sibling: Option<&StoredRecord>) {
    if let Some(record) = sibling {
        fields.insert(key.to_string(), FieldValue::Id(record.id));
    }
}

fn copy_field(fields: &mut FieldMap, key: &str, sibling: Option<&StoredRecord>, source: &str) {
    if fields.get(key).is_some_and(|v| !v.is_empty()) {
        return;
    }
    if let Some(value) = sibling.and_then(|r| r.fields.get(source)) {
        if !value.is_empty() {
            fields.insert(key.to_string(), value.clone());
        }
    }
}

fn set_default(fields: &mut FieldMap, key: &str, value: FieldValue) {
    if fields.get(key).is_none_or(FieldValue::is_empty) {
        fields.insert(key.to_string(), value);
    }
}

fn apply_defaults(entity: EntityType, fields: &mut FieldMap) {
    match entity {
        EntityType::Lead => {
            set_default(fields, "status", FieldValue::from("New"));
        }
        EntityType::Deal => {
            set_default(fields, "status", FieldValue::from("Open"));
            set_default(fields, "currency", FieldValue::from("USD"));
            set_default(fields, "pipeline", FieldValue::from("default"));
            set_default(fields, "stage", FieldValue::from("new"));
        }
        EntityType::Activity => {
            set_default(fields, "done", FieldValue::Bool(false));
            let tomorrow = Utc::now().date_naive() + Duration::days(1);
            set_default(fields, "dueDate", FieldValue::Date(tomorrow));
        }
        EntityType::Person | EntityType::Organization => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(entity: EntityType, fields: FieldMap) -> StoredRecord {
        StoredRecord {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            entity_type: entity,
            fields,
            archived: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_deal_links_person_and_organization() {
        let mut person_fields = FieldMap::new();
        person_fields.insert("contactName".to_string(), FieldValue::from("Alice"));
        person_fields.insert("email".to_string(), FieldValue::from("a@x.com"));
        let person = record(EntityType::Person, person_fields);

        let mut org_fields = FieldMap::new();
        org_fields.insert("name".to_string(), FieldValue::from("Acme"));
        let organization = record(EntityType::Organization, org_fields);

        let mut siblings = SiblingSet::new();
        siblings.insert(EntityType::Person, person.clone());
        siblings.insert(EntityType::Organization, organization.clone());

        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), FieldValue::from("Deal1"));
        link(EntityType::Deal, &mut fields, &siblings);

        assert_eq!(fields.get("personId"), Some(&FieldValue::Id(person.id)));
        assert_eq!(
            fields.get("organizationId"),
            Some(&FieldValue::Id(organization.id))
        );
        assert_eq!(fields.get("contactName"), Some(&FieldValue::from("Alice")));
        assert_eq!(
            fields.get("organizationName"),
            Some(&FieldValue::from("Acme"))
        );
    }

    #[test]
    fn test_missing_siblings_leave_keys_unset() {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), FieldValue::from("Solo"));
        link(EntityType::Deal, &mut fields, &SiblingSet::new());
        assert!(fields.get("personId").is_none());
        assert!(fields.get("organizationId").is_none());
    }

    #[test]
    fn test_deal_defaults_do_not_clobber_values() {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), FieldValue::from("Big"));
        fields.insert("currency".to_string(), FieldValue::from("EUR"));
        link(EntityType::Deal, &mut fields, &SiblingSet::new());
        assert_eq!(fields.get("currency"), Some(&FieldValue::from("EUR")));
        assert_eq!(fields.get("status"), Some(&FieldValue::from("Open")));
        assert_eq!(fields.get("pipeline"), Some(&FieldValue::from("default")));
    }

    #[test]
    fn test_activity_gets_due_date_and_open_state() {
        let mut fields = FieldMap::new();
        fields.insert("subject".to_string(), FieldValue::from("Call"));
        link(EntityType::Activity, &mut fields, &SiblingSet::new());
        assert_eq!(fields.get("done"), Some(&FieldValue::Bool(false)));
        let tomorrow = Utc::now().date_naive() + Duration::days(1);
        assert_eq!(fields.get("dueDate"), Some(&FieldValue::Date(tomorrow)));
    }
}
