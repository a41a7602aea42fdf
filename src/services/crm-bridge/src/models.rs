//! Data models for the CRM Bridge Service
//!
//! Users own projects, projects own connections, and a connection describes how
//! one inbound webhook is turned into one CRM operation.

use crate::error::{BridgeError, BridgeResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix shared by every connection's inbound webhook path
pub const WEBHOOK_PATH_PREFIX: &str = "/api/webhook/bitrix/";

/// Account role
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(BridgeError::validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Registered account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// User listing entry for the admin panel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub project_count: i64,
}

/// Minimal owner info attached to admin project listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerInfo {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Active,
    Inactive,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ProjectStatus::Active),
            "INACTIVE" => Ok(ProjectStatus::Inactive),
            other => Err(BridgeError::validation(format!(
                "Unknown project status: {}",
                other
            ))),
        }
    }
}

/// Tenant container sharing one CRM base URL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    /// Bitrix24 inbound webhook base, e.g. `https://acme.bitrix24.ru/rest/1/secret/`
    pub bitrix_webhook_url: Option<String>,
    /// Answer every CRM call with a synthetic response
    pub test_mode: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// CRM base URL, if one is set and non-blank
    pub fn crm_base_url(&self) -> Option<&str> {
        self.bitrix_webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

/// Project with its owner, for the admin listing
#[derive(Debug, Clone, Serialize)]
pub struct ProjectWithOwner {
    #[serde(flatten)]
    pub project: Project,
    pub user: OwnerInfo,
}

/// CRM operation a connection performs
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionCategory {
    CreateDeal,
    CreateLead,
    MoveDeal,
    MoveDealByPhone,
}

impl ConnectionCategory {
    pub const ALL: [ConnectionCategory; 4] = [
        ConnectionCategory::CreateDeal,
        ConnectionCategory::CreateLead,
        ConnectionCategory::MoveDeal,
        ConnectionCategory::MoveDealByPhone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionCategory::CreateDeal => "CREATE_DEAL",
            ConnectionCategory::CreateLead => "CREATE_LEAD",
            ConnectionCategory::MoveDeal => "MOVE_DEAL",
            ConnectionCategory::MoveDealByPhone => "MOVE_DEAL_BY_PHONE",
        }
    }
}

impl fmt::Display for ConnectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionCategory {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectionCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| BridgeError::unsupported_category(s))
    }
}

/// Connection status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Active,
    Inactive,
    Error,
    Pending,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "ACTIVE",
            ConnectionStatus::Inactive => "INACTIVE",
            ConnectionStatus::Error => "ERROR",
            ConnectionStatus::Pending => "PENDING",
        }
    }
}

impl FromStr for ConnectionStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(ConnectionStatus::Active),
            "INACTIVE" => Ok(ConnectionStatus::Inactive),
            "ERROR" => Ok(ConnectionStatus::Error),
            "PENDING" => Ok(ConnectionStatus::Pending),
            other => Err(BridgeError::validation(format!(
                "Unknown connection status: {}",
                other
            ))),
        }
    }
}

/// A configured mapping from inbound webhook payloads to one CRM operation.
///
/// `category`, `config` and `field_mapping` hold the stored text as-is; they are
/// validated when written through the API and parsed again at dispatch time,
/// since rows can be edited behind the API's back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub status: ConnectionStatus,
    pub config: String,
    pub field_mapping: Option<String>,
    pub funnel_id: Option<String>,
    pub stage_id: Option<String>,
    pub webhook_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    /// Parse the stored free-form configuration
    pub fn settings(&self) -> BridgeResult<ConnectionSettings> {
        ConnectionSettings::parse(&self.config)
    }

    /// Parse the stored field-mapping rules
    pub fn mapping_rules(&self) -> BridgeResult<Vec<FieldMappingRule>> {
        FieldMappingRule::parse_list(self.field_mapping.as_deref())
    }
}

/// Generate a fresh, unguessable webhook path
pub fn generate_webhook_path() -> String {
    let token: [u8; 32] = rand::random();
    format!("{}{}", WEBHOOK_PATH_PREFIX, hex::encode(token))
}

/// Build the stored webhook path for an inbound token
pub fn webhook_path_for_token(token: &str) -> String {
    format!("{}{}", WEBHOOK_PATH_PREFIX, token)
}

/// Source-path to target-field translation directive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FieldMappingRule {
    /// Dot-delimited path into the inbound payload
    pub source_field: String,
    /// CRM field identifier
    pub target_field: String,
}

impl FieldMappingRule {
    pub fn new<S1: Into<String>, S2: Into<String>>(source_field: S1, target_field: S2) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
        }
    }

    /// Parse stored rule text.
    ///
    /// Blank or absent text is an empty rule list. Text that is not a JSON array
    /// is malformed. Individual entries that are not `{sourceField, targetField}`
    /// string pairs are dropped.
    pub fn parse_list(text: Option<&str>) -> BridgeResult<Vec<FieldMappingRule>> {
        let text = match text.map(str::trim) {
            None | Some("") => return Ok(Vec::new()),
            Some(text) => text,
        };

        let entries: Vec<Value> = serde_json::from_str(text)
            .map_err(|e| BridgeError::malformed_config("field mapping", e.to_string()))?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value::<FieldMappingRule>(entry).ok())
            .filter(|rule| !rule.source_field.is_empty() && !rule.target_field.is_empty())
            .collect())
    }
}

/// Typed view of a connection's free-form configuration object
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Target funnel for deal moves
    #[serde(
        rename = "CATEGORY_ID",
        default,
        deserialize_with = "de_crm_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub category_id: Option<String>,
    /// Target stage for deal moves
    #[serde(
        rename = "STAGE_ID",
        default,
        deserialize_with = "de_crm_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub stage_id: Option<String>,
    /// Target lead status
    #[serde(
        rename = "STATUS_ID",
        default,
        deserialize_with = "de_crm_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_id: Option<String>,
}

impl ConnectionSettings {
    /// Parse stored configuration text; blank text means no settings
    pub fn parse(text: &str) -> BridgeResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
            .map_err(|e| BridgeError::malformed_config("connection config", e.to_string()))
    }

    /// Validate an API-supplied configuration value before it is stored
    pub fn from_value(value: &Value) -> BridgeResult<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => serde_json::from_value(value.clone())
                .map_err(|e| BridgeError::validation(format!("Invalid config: {}", e))),
            _ => Err(BridgeError::validation("config must be a JSON object")),
        }
    }
}

/// CRM identifiers arrive as strings or numbers; empty strings and numeric zero count as unset.
fn de_crm_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// CRM entity touched by an operation
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CrmEntity {
    Deal,
    Lead,
}

/// What an operation did to the entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Created,
    Moved,
    MovedByPhone,
}

/// Outcome of a successful CRM operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    #[serde(rename = "type")]
    pub entity: CrmEntity,
    pub action: OperationAction,
    /// CRM-assigned or resolved record identifier
    pub bitrix_id: Value,
    /// Output of the field mapping alone
    pub mapped_data: Map<String, Value>,
    /// Fields actually sent to the CRM
    pub fields: Map<String, Value>,
    pub original_payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found_deal: Option<Value>,
    /// Synthetic response; nothing was written to a real CRM
    pub test_mode: bool,
}

/// Body of a successful webhook response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
    pub result: OperationResult,
}

impl WebhookResponse {
    pub fn processed(result: OperationResult) -> Self {
        Self {
            success: true,
            message: "Webhook processed successfully".to_string(),
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_round_trip_names() {
        for category in ConnectionCategory::ALL {
            let parsed: ConnectionCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert_eq!(
            serde_json::to_value(ConnectionCategory::MoveDealByPhone).unwrap(),
            json!("MOVE_DEAL_BY_PHONE")
        );
    }

    #[test]
    fn test_unknown_category_is_unsupported() {
        let err = "DELETE_DEAL".parse::<ConnectionCategory>().unwrap_err();
        assert!(matches!(err, BridgeError::UnsupportedCategory { .. }));
    }

    #[test]
    fn test_parse_rules_blank_is_empty() {
        assert!(FieldMappingRule::parse_list(None).unwrap().is_empty());
        assert!(FieldMappingRule::parse_list(Some("  ")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rules_skips_malformed_entries() {
        let text = r#"[
            {"sourceField": "user.name", "targetField": "NAME"},
            {"sourceField": "phone"},
            {"sourceField": 12, "targetField": "X"},
            {"sourceField": "", "targetField": "EMPTY"},
            "garbage",
            {"sourceField": "email", "targetField": "EMAIL"}
        ]"#;
        let rules = FieldMappingRule::parse_list(Some(text)).unwrap();
        assert_eq!(
            rules,
            vec![
                FieldMappingRule::new("user.name", "NAME"),
                FieldMappingRule::new("email", "EMAIL"),
            ]
        );
    }

    #[test]
    fn test_parse_rules_rejects_non_array() {
        let err = FieldMappingRule::parse_list(Some(r#"{"a": 1}"#)).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedConfig { .. }));
    }

    #[test]
    fn test_settings_accept_numbers_and_strings() {
        let settings =
            ConnectionSettings::parse(r#"{"CATEGORY_ID": 3, "STAGE_ID": "C3:WON", "OTHER": true}"#)
                .unwrap();
        assert_eq!(settings.category_id.as_deref(), Some("3"));
        assert_eq!(settings.stage_id.as_deref(), Some("C3:WON"));
        assert_eq!(settings.status_id, None);
    }

    #[test]
    fn test_settings_numeric_zero_is_unset() {
        let settings =
            ConnectionSettings::parse(r#"{"CATEGORY_ID": 0, "STAGE_ID": "", "STATUS_ID": "0"}"#)
                .unwrap();
        assert_eq!(settings.category_id, None);
        assert_eq!(settings.stage_id, None);
        assert_eq!(settings.status_id.as_deref(), Some("0"));
    }

    #[test]
    fn test_settings_blank_and_malformed() {
        assert_eq!(
            ConnectionSettings::parse("").unwrap(),
            ConnectionSettings::default()
        );
        let err = ConnectionSettings::parse("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedConfig { .. }));
    }

    #[test]
    fn test_settings_from_value_requires_object() {
        assert!(ConnectionSettings::from_value(&json!([1, 2])).is_err());
        assert!(ConnectionSettings::from_value(&json!({"STAGE_ID": {"x": 1}})).is_err());
        assert_eq!(
            ConnectionSettings::from_value(&Value::Null).unwrap(),
            ConnectionSettings::default()
        );
    }

    #[test]
    fn test_generated_webhook_path_shape() {
        let path = generate_webhook_path();
        let token = path.strip_prefix(WEBHOOK_PATH_PREFIX).unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(path, generate_webhook_path());
    }

    #[test]
    fn test_project_crm_base_url_ignores_blank() {
        let now = Utc::now();
        let mut project = Project {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "p".into(),
            description: None,
            status: ProjectStatus::Active,
            bitrix_webhook_url: Some("   ".into()),
            test_mode: false,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(project.crm_base_url(), None);
        project.bitrix_webhook_url = Some("https://acme.bitrix24.ru/rest/1/x/".into());
        assert_eq!(
            project.crm_base_url(),
            Some("https://acme.bitrix24.ru/rest/1/x/")
        );
    }
}
