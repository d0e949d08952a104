//! Wire types for the CRM REST API (HAL-style JSON).

use serde::{Deserialize, Deserializer, Serialize};

/// Collection envelope: `{ "_embedded": { "<name>": [...] }, "_links": { "next": ... } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<E> {
    #[serde(rename = "_embedded", default)]
    pub embedded: E,
    #[serde(rename = "_links", default)]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    pub next: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Id that may arrive either as a JSON number or as a numeric string.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum StringOrInt {
    Str(String),
    Int(i64),
}

impl StringOrInt {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StringOrInt::Int(value) => Some(*value),
            StringOrInt::Str(value) => value.trim().parse().ok(),
        }
    }
}

/// Deserializes an id field that may be a number or a numeric string.
pub fn flexible_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = StringOrInt::deserialize(deserializer)?;
    raw.as_i64()
        .ok_or_else(|| serde::de::Error::custom(format!("invalid numeric id: {raw:?}")))
}

fn flexible_opt_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<StringOrInt>::deserialize(deserializer)?
        .map(|raw| {
            raw.as_i64()
                .ok_or_else(|| serde::de::Error::custom(format!("invalid numeric id: {raw:?}")))
        })
        .transpose()
}

// ---- OAuth ----

#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<&'a str>,
    pub redirect_uri: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token_type: String,
    /// Lifetime of the access token in seconds
    pub expires_in: i64,
    pub access_token: String,
    pub refresh_token: String,
}

// ---- Custom fields ----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_code: Option<String>,
    #[serde(default)]
    pub values: Vec<CustomFieldValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValue {
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_code: Option<String>,
}

impl CustomFieldValues {
    /// A `WORK`-typed multitext entry such as the standard `PHONE`/`EMAIL` fields.
    pub fn work(field_code: &str, value: &str) -> Self {
        Self {
            field_id: None,
            field_code: Some(field_code.to_string()),
            values: vec![CustomFieldValue {
                value: serde_json::Value::String(value.to_string()),
                enum_code: Some("WORK".to_string()),
            }],
        }
    }
}

/// First string value of the field with `field_code`.
pub fn custom_field_text(fields: &[CustomFieldValues], field_code: &str) -> Option<String> {
    fields
        .iter()
        .filter(|field| field.field_code.as_deref() == Some(field_code))
        .flat_map(|field| field.values.iter())
        .find_map(|value| match &value.value {
            serde_json::Value::String(text) if !text.is_empty() => Some(text.clone()),
            serde_json::Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
}

// ---- Leads ----

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmLead {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub price: Option<i64>,
    pub status_id: Option<i64>,
    pub pipeline_id: Option<i64>,
    pub responsible_user_id: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<LeadEmbedded>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LeadEmbedded {
    #[serde(default)]
    pub contacts: Vec<EntityRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityRef {
    pub id: i64,
}

/// Body element for `POST /leads` and `PATCH /leads`.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LeadPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<i64>,
    #[serde(rename = "_embedded", skip_serializing_if = "Option::is_none")]
    pub embedded: Option<LeadPayloadEmbedded>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeadPayloadEmbedded {
    pub contacts: Vec<EntityRef>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadsEmbedded {
    #[serde(default)]
    pub leads: Vec<CrmLead>,
}

/// Response of create/update calls; only ids are echoed back.
#[derive(Debug, Default, Deserialize)]
pub struct CreatedEmbedded {
    #[serde(default)]
    pub leads: Vec<EntityRef>,
    #[serde(default)]
    pub contacts: Vec<EntityRef>,
    #[serde(default)]
    pub tasks: Vec<EntityRef>,
}

// ---- Contacts ----

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmContact {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub responsible_user_id: Option<i64>,
    pub account_id: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub custom_fields_values: Vec<CustomFieldValues>,
}

impl CrmContact {
    pub fn phone(&self) -> Option<String> {
        custom_field_text(&self.custom_fields_values, "PHONE")
    }

    pub fn email(&self) -> Option<String> {
        custom_field_text(&self.custom_fields_values, "EMAIL")
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ContactPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub custom_fields_values: Vec<CustomFieldValues>,
}

// ---- Tasks ----

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmTask {
    pub id: i64,
    #[serde(default)]
    pub text: String,
    pub task_type_id: Option<i64>,
    #[serde(default)]
    pub complete_till: i64,
    #[serde(default)]
    pub is_completed: bool,
    pub responsible_user_id: Option<i64>,
    pub entity_id: Option<i64>,
    pub entity_type: Option<String>,
    pub duration: Option<i64>,
    pub result: Option<TaskResult>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub account_id: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TaskResult {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TaskPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_till: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_type_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
}

// ---- Taxonomy ----

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmPipeline {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub is_unsorted_on: bool,
    #[serde(default)]
    pub is_archive: bool,
    pub account_id: Option<i64>,
    #[serde(rename = "_embedded", default)]
    pub embedded: PipelineEmbedded,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PipelineEmbedded {
    #[serde(default)]
    pub statuses: Vec<CrmStage>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmStage {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sort: i32,
    #[serde(default = "default_true")]
    pub is_editable: bool,
    pub pipeline_id: Option<i64>,
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PipelinesEmbedded {
    #[serde(default)]
    pub pipelines: Vec<CrmPipeline>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmRole {
    pub id: i64,
    pub name: String,
    pub rights: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RolesEmbedded {
    #[serde(default)]
    pub roles: Vec<CrmRole>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CrmUser {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub lang: Option<String>,
    #[serde(default)]
    pub rights: UserRights,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserRights {
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_free: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, deserialize_with = "flexible_opt_id")]
    pub role_id: Option<i64>,
    #[serde(default, deserialize_with = "flexible_opt_id")]
    pub group_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsersEmbedded {
    #[serde(default)]
    pub users: Vec<CrmUser>,
}

fn default_true() -> bool {
    true
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_or_int_accepts_both_shapes() {
        let from_str: StringOrInt = serde_json::from_value(json!("501")).unwrap();
        let from_int: StringOrInt = serde_json::from_value(json!(501)).unwrap();
        let garbage: StringOrInt = serde_json::from_value(json!("abc")).unwrap();

        assert_eq!(from_str.as_i64(), Some(501));
        assert_eq!(from_int.as_i64(), Some(501));
        assert_eq!(garbage.as_i64(), None);
    }

    #[test]
    fn contact_phone_and_email_come_from_custom_fields() {
        let contact: CrmContact = serde_json::from_value(json!({
            "id": 77,
            "name": "Jane",
            "custom_fields_values": [
                {"field_id": 1, "field_code": "PHONE", "values": [{"value": "+971500000000", "enum_code": "WORK"}]},
                {"field_id": 2, "field_code": "EMAIL", "values": [{"value": "jane@example.com"}]}
            ]
        }))
        .unwrap();

        assert_eq!(contact.phone().as_deref(), Some("+971500000000"));
        assert_eq!(contact.email().as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn contact_tolerates_null_custom_fields() {
        let contact: CrmContact =
            serde_json::from_value(json!({"id": 1, "name": "X", "custom_fields_values": null}))
                .unwrap();
        assert!(contact.phone().is_none());
    }

    #[test]
    fn pipeline_embeds_stages() {
        let pipeline: CrmPipeline = serde_json::from_value(json!({
            "id": 10, "name": "Sales", "sort": 1, "is_main": true, "is_unsorted_on": true,
            "_embedded": {"statuses": [
                {"id": 100, "name": "Unsorted", "sort": 10, "is_editable": false, "pipeline_id": 10, "color": "#c1c1c1", "type": 1},
                {"id": 142, "name": "Won", "sort": 10000, "is_editable": false, "pipeline_id": 10, "color": "#CCFF66", "type": 0}
            ]}
        }))
        .unwrap();

        assert_eq!(pipeline.embedded.statuses.len(), 2);
        assert!(!pipeline.embedded.statuses[0].is_editable);
    }

    #[test]
    fn lead_payload_omits_absent_fields() {
        let payload = LeadPayload {
            name: Some("Jane - Villa".to_string()),
            price: Some(0),
            embedded: Some(LeadPayloadEmbedded {
                contacts: vec![EntityRef { id: 77 }],
            }),
            ..LeadPayload::default()
        };

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"name": "Jane - Villa", "price": 0, "_embedded": {"contacts": [{"id": 77}]}})
        );
    }
}
