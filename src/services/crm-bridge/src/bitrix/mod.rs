//! Bitrix24 REST API access
//!
//! [`CrmClient`] is the seam between the operation handlers and the network.
//! The production implementation is [`BitrixClient`]; tests substitute
//! recording fakes or point the real client at a mock server.

pub mod cache;
pub mod client;

pub use cache::FieldCache;
pub use client::BitrixClient;

use crate::error::BridgeResult;
use crate::models::CrmEntity;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// REST method names used by the bridge
pub mod methods {
    pub const DEAL_ADD: &str = "crm.deal.add";
    pub const LEAD_ADD: &str = "crm.lead.add";
    pub const DEAL_UPDATE: &str = "crm.deal.update";
    pub const DEAL_LIST: &str = "crm.deal.list";
    pub const STATUS_LIST: &str = "crm.status.list";
    pub const DEAL_FIELDS: &str = "crm.deal.fields";
    pub const LEAD_FIELDS: &str = "crm.lead.fields";
}

/// Low-level CRM transport plus the typed calls built on it
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Invoke `method` against `base_url` and return the response's `result` member
    async fn call(&self, base_url: &str, method: &str, body: Value) -> BridgeResult<Value>;

    /// Create a deal, returning the CRM-assigned id
    async fn add_deal(&self, base_url: &str, fields: &Map<String, Value>) -> BridgeResult<Value> {
        self.call(base_url, methods::DEAL_ADD, json!({ "fields": fields }))
            .await
    }

    /// Create a lead, returning the CRM-assigned id
    async fn add_lead(&self, base_url: &str, fields: &Map<String, Value>) -> BridgeResult<Value> {
        self.call(base_url, methods::LEAD_ADD, json!({ "fields": fields }))
            .await
    }

    /// Update an existing deal
    async fn update_deal(
        &self,
        base_url: &str,
        id: &Value,
        fields: &Map<String, Value>,
    ) -> BridgeResult<Value> {
        self.call(
            base_url,
            methods::DEAL_UPDATE,
            json!({ "id": id, "fields": fields }),
        )
        .await
    }

    /// Deals whose phone matches `phone`, newest id first
    async fn find_deals_by_phone(&self, base_url: &str, phone: &str) -> BridgeResult<Vec<Value>> {
        let result = self
            .call(
                base_url,
                methods::DEAL_LIST,
                json!({
                    "filter": { "PHONE": phone },
                    "order": { "ID": "DESC" },
                    "select": ["ID", "TITLE", "PHONE", "DATE_CREATE"],
                }),
            )
            .await?;

        Ok(match result {
            Value::Array(deals) => deals,
            _ => Vec::new(),
        })
    }

    /// CRM status dictionary entries matching `filter`
    async fn list_statuses(&self, base_url: &str, filter: Value) -> BridgeResult<Vec<StatusEntry>> {
        let result = self
            .call(base_url, methods::STATUS_LIST, json!({ "filter": filter }))
            .await?;

        Ok(match result {
            Value::Array(entries) => entries
                .into_iter()
                .filter_map(|entry| serde_json::from_value(entry).ok())
                .collect(),
            _ => Vec::new(),
        })
    }

    /// Field descriptors of a CRM entity type
    async fn entity_fields(
        &self,
        base_url: &str,
        entity: CrmEntity,
    ) -> BridgeResult<Vec<FieldDescriptor>> {
        let method = match entity {
            CrmEntity::Deal => methods::DEAL_FIELDS,
            CrmEntity::Lead => methods::LEAD_FIELDS,
        };
        let result = self.call(base_url, method, json!({})).await?;
        Ok(FieldDescriptor::from_fields_result(&result))
    }
}

/// One entry of `crm.status.list`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEntry {
    #[serde(rename = "STATUS_ID")]
    pub status_id: String,
    #[serde(rename = "NAME", default)]
    pub name: String,
    #[serde(rename = "SORT", default, deserialize_with = "de_sort")]
    pub sort: i64,
    #[serde(rename = "CATEGORY_ID", default)]
    pub category_id: Option<String>,
    #[serde(rename = "ENTITY_ID", default)]
    pub entity_id: Option<String>,
}

fn de_sort<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().unwrap_or_default(),
        Value::String(s) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

/// Pipeline stage, as presented to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub sort: i64,
}

/// Deal pipeline with its stages in display order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Funnel {
    pub id: String,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Funnel {
    /// Group deal-stage statuses into funnels keyed by `CATEGORY_ID` (default `"0"`)
    pub fn group(statuses: Vec<StatusEntry>) -> Vec<Funnel> {
        let mut funnels: Vec<Funnel> = Vec::new();

        for status in statuses {
            let is_deal_stage = status
                .entity_id
                .as_deref()
                .map(|entity| entity.starts_with("DEAL_STAGE"))
                .unwrap_or(true);
            if !is_deal_stage {
                continue;
            }

            let category_id = status
                .category_id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| "0".to_string());

            let index = match funnels.iter().position(|f| f.id == category_id) {
                Some(index) => index,
                None => {
                    funnels.push(Funnel {
                        name: funnel_name(&category_id),
                        id: category_id,
                        stages: Vec::new(),
                    });
                    funnels.len() - 1
                }
            };

            funnels[index].stages.push(Stage::from(status));
        }

        for funnel in &mut funnels {
            funnel.stages.sort_by_key(|stage| stage.sort);
        }

        funnels
    }
}

fn funnel_name(category_id: &str) -> String {
    if category_id == "0" {
        "Main funnel".to_string()
    } else {
        format!("Funnel {}", category_id)
    }
}

impl From<StatusEntry> for Stage {
    fn from(status: StatusEntry) -> Self {
        Self {
            id: status.status_id,
            name: status.name,
            sort: status.sort,
        }
    }
}

/// Describes one CRM field for mapping editors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub multiple: bool,
    pub list_items: Option<Value>,
}

impl FieldDescriptor {
    /// Convert a `crm.*.fields` result, dropping `UF_` user-defined fields
    pub fn from_fields_result(result: &Value) -> Vec<FieldDescriptor> {
        let Some(fields) = result.as_object() else {
            return Vec::new();
        };

        fields
            .iter()
            .filter(|(id, _)| !id.starts_with("UF_"))
            .map(|(id, field)| FieldDescriptor {
                id: id.clone(),
                title: field
                    .get("title")
                    .and_then(Value::as_str)
                    .filter(|title| !title.is_empty())
                    .unwrap_or(id)
                    .to_string(),
                field_type: field
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("string")
                    .to_string(),
                required: field
                    .get("isRequired")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                multiple: field
                    .get("isMultiple")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                list_items: field.get("items").cloned().filter(|items| !items.is_null()),
            })
            .collect()
    }
}
