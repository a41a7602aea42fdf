//! CRM operation handlers
//!
//! Every handler follows the same template: resolve the project's CRM base URL,
//! parse the connection's stored rules and settings, map the payload, merge the
//! handler's own fields and then either call the CRM or, for demo projects,
//! answer with a synthetic result.

pub mod create;
pub mod relocate;

pub use create::{create_deal, create_lead};
pub use relocate::{move_deal, move_deal_by_phone};

use crate::bitrix::CrmClient;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::mapping;
use crate::models::{Connection, ConnectionSettings, Project};
use rand::Rng;
use serde_json::{Map, Value};
use tracing::debug;

/// Everything a handler needs besides the payload
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub crm: &'a dyn CrmClient,
    pub config: &'a BridgeConfig,
    pub project: &'a Project,
    pub connection: &'a Connection,
}

/// Output of the shared preparation steps
pub(crate) struct Prepared {
    pub base_url: String,
    pub settings: ConnectionSettings,
    pub mapped: Map<String, Value>,
    pub test_mode: bool,
}

impl<'a> OperationContext<'a> {
    pub fn new(
        crm: &'a dyn CrmClient,
        config: &'a BridgeConfig,
        project: &'a Project,
        connection: &'a Connection,
    ) -> Self {
        Self {
            crm,
            config,
            project,
            connection,
        }
    }

    pub(crate) fn prepare(&self, payload: &Value) -> BridgeResult<Prepared> {
        let base_url = self
            .project
            .crm_base_url()
            .ok_or_else(|| BridgeError::missing_crm_config(self.project.id.to_string()))?
            .to_string();

        let rules = self.connection.mapping_rules()?;
        let settings = self.connection.settings()?;
        let mapped = mapping::apply(payload, &rules);

        debug!(
            connection_id = %self.connection.id,
            rules = rules.len(),
            mapped_fields = mapped.len(),
            "Payload mapped"
        );

        let test_mode = self.project.test_mode || self.config.is_sentinel_url(&base_url);

        Ok(Prepared {
            base_url,
            settings,
            mapped,
            test_mode,
        })
    }
}

/// Identifier handed out in place of a real CRM id
pub(crate) fn synthetic_id() -> Value {
    Value::from(rand::thread_rng().gen_range(1000..11000))
}

/// Copy of `mapped` without the identifier keys
pub(crate) fn without_keys(mapped: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    mapped
        .iter()
        .filter(|(key, _)| !keys.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Apply configured funnel and stage targets on top of mapped update fields
pub(crate) fn apply_move_targets(fields: &mut Map<String, Value>, settings: &ConnectionSettings) {
    if let Some(ref category_id) = settings.category_id {
        fields.insert("CATEGORY_ID".to_string(), Value::from(category_id.as_str()));
    }
    if let Some(ref stage_id) = settings.stage_id {
        fields.insert("STAGE_ID".to_string(), Value::from(stage_id.as_str()));
    }
}

/// Non-empty column value or `default`
pub(crate) fn column_or(value: Option<&str>, default: &str) -> Value {
    Value::from(value.filter(|v| !v.is_empty()).unwrap_or(default))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::models::ConnectionCategory;
    use serde_json::json;

    #[test]
    fn test_prepare_requires_crm_url() {
        let crm = RecordingCrm::default();
        let config = BridgeConfig::default();
        let project = project(Some("  "));
        let connection = connection(ConnectionCategory::CreateDeal, "[]", "{}");
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let err = ctx.prepare(&json!({})).err().unwrap();
        assert!(matches!(err, BridgeError::MissingCrmConfig { .. }));
    }

    #[test]
    fn test_prepare_detects_test_mode() {
        let crm = RecordingCrm::default();
        let config = BridgeConfig::default();
        let connection = connection(ConnectionCategory::CreateDeal, "", "");

        let sentinel = project(Some("https://your-bitrix-domain.bitrix24.ru/"));
        let ctx = OperationContext::new(&crm, &config, &sentinel, &connection);
        assert!(ctx.prepare(&json!({})).unwrap().test_mode);

        let mut flagged = project(Some("https://acme.bitrix24.ru/rest/1/k/"));
        let ctx = OperationContext::new(&crm, &config, &flagged, &connection);
        assert!(!ctx.prepare(&json!({})).unwrap().test_mode);

        flagged.test_mode = true;
        let ctx = OperationContext::new(&crm, &config, &flagged, &connection);
        assert!(ctx.prepare(&json!({})).unwrap().test_mode);
    }

    #[test]
    fn test_prepare_surfaces_malformed_rules() {
        let crm = RecordingCrm::default();
        let config = BridgeConfig::default();
        let project = project(Some("https://acme.bitrix24.ru/rest/1/k/"));
        let connection = connection(ConnectionCategory::CreateLead, "{oops", "{}");
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let err = ctx.prepare(&json!({})).err().unwrap();
        assert!(matches!(err, BridgeError::MalformedConfig { .. }));
    }

    #[test]
    fn test_synthetic_id_range() {
        for _ in 0..200 {
            let id = synthetic_id().as_i64().unwrap();
            assert!((1000..11000).contains(&id));
        }
    }

    #[test]
    fn test_move_targets_override_mapped_values() {
        let mut fields = Map::new();
        fields.insert("STAGE_ID".into(), json!("FROM_PAYLOAD"));
        let settings = ConnectionSettings {
            category_id: Some("2".into()),
            stage_id: Some("C2:WON".into()),
            status_id: None,
        };
        apply_move_targets(&mut fields, &settings);
        assert_eq!(
            Value::Object(fields),
            json!({"STAGE_ID": "C2:WON", "CATEGORY_ID": "2"})
        );
    }
}
