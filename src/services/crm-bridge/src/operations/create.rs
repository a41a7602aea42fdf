//! Deal and lead creation

use super::{column_or, synthetic_id, OperationContext};
use crate::error::BridgeResult;
use crate::models::{CrmEntity, OperationAction, OperationResult};
use serde_json::Value;
use tracing::info;

/// Create a deal in the connection's funnel and stage
pub async fn create_deal(ctx: &OperationContext<'_>, payload: &Value) -> BridgeResult<OperationResult> {
    let prepared = ctx.prepare(payload)?;

    let mut fields = prepared.mapped.clone();
    fields.insert(
        "CATEGORY_ID".to_string(),
        column_or(ctx.connection.funnel_id.as_deref(), "0"),
    );
    fields.insert(
        "STAGE_ID".to_string(),
        column_or(ctx.connection.stage_id.as_deref(), "NEW"),
    );

    let bitrix_id = if prepared.test_mode {
        info!(connection_id = %ctx.connection.id, "Test mode: deal not created");
        synthetic_id()
    } else {
        ctx.crm.add_deal(&prepared.base_url, &fields).await?
    };

    info!(connection_id = %ctx.connection.id, bitrix_id = %bitrix_id, "Deal created");

    Ok(OperationResult {
        entity: CrmEntity::Deal,
        action: OperationAction::Created,
        bitrix_id,
        mapped_data: prepared.mapped,
        fields,
        original_payload: payload.clone(),
        phone_number: None,
        found_deal: None,
        test_mode: prepared.test_mode,
    })
}

/// Create a lead; `STATUS_ID` from the config wins over the stage column
pub async fn create_lead(ctx: &OperationContext<'_>, payload: &Value) -> BridgeResult<OperationResult> {
    let prepared = ctx.prepare(payload)?;

    let status = prepared
        .settings
        .status_id
        .as_deref()
        .or(ctx.connection.stage_id.as_deref());
    let mut fields = prepared.mapped.clone();
    fields.insert("STATUS_ID".to_string(), column_or(status, "NEW"));

    let bitrix_id = if prepared.test_mode {
        info!(connection_id = %ctx.connection.id, "Test mode: lead not created");
        synthetic_id()
    } else {
        ctx.crm.add_lead(&prepared.base_url, &fields).await?
    };

    info!(connection_id = %ctx.connection.id, bitrix_id = %bitrix_id, "Lead created");

    Ok(OperationResult {
        entity: CrmEntity::Lead,
        action: OperationAction::Created,
        bitrix_id,
        mapped_data: prepared.mapped,
        fields,
        original_payload: payload.clone(),
        phone_number: None,
        found_deal: None,
        test_mode: prepared.test_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitrix::methods;
    use crate::config::BridgeConfig;
    use crate::error::BridgeError;
    use crate::models::ConnectionCategory;
    use crate::operations::testing::{connection, project, RecordingCrm};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CRM: &str = "https://acme.bitrix24.ru/rest/1/secret/";

    #[tokio::test]
    async fn test_create_deal_defaults_funnel_and_stage() {
        let crm = RecordingCrm::default().respond(methods::DEAL_ADD, json!(321));
        let config = BridgeConfig::default();
        let project = project(Some(CRM));
        let connection = connection(
            ConnectionCategory::CreateDeal,
            r#"[{"sourceField": "order.title", "targetField": "TITLE"}]"#,
            "{}",
        );
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let payload = json!({"order": {"title": "Order #7"}});
        let result = create_deal(&ctx, &payload).await.unwrap();

        assert_eq!(result.bitrix_id, json!(321));
        assert_eq!(result.entity, CrmEntity::Deal);
        assert!(!result.test_mode);
        assert_eq!(
            crm.body_of(methods::DEAL_ADD).unwrap(),
            json!({"fields": {"TITLE": "Order #7", "CATEGORY_ID": "0", "STAGE_ID": "NEW"}})
        );
        assert_eq!(Value::Object(result.mapped_data), json!({"TITLE": "Order #7"}));
    }

    #[tokio::test]
    async fn test_create_deal_uses_connection_columns() {
        let crm = RecordingCrm::default().respond(methods::DEAL_ADD, json!(9));
        let config = BridgeConfig::default();
        let project = project(Some(CRM));
        let mut connection = connection(ConnectionCategory::CreateDeal, "[]", "{}");
        connection.funnel_id = Some("4".to_string());
        connection.stage_id = Some("C4:PREPARATION".to_string());
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let result = create_deal(&ctx, &json!({})).await.unwrap();
        assert_eq!(
            Value::Object(result.fields),
            json!({"CATEGORY_ID": "4", "STAGE_ID": "C4:PREPARATION"})
        );
    }

    #[tokio::test]
    async fn test_create_lead_sets_status() {
        let crm = RecordingCrm::default().respond(methods::LEAD_ADD, json!("77"));
        let config = BridgeConfig::default();
        let project = project(Some(CRM));
        let mut connection = connection(
            ConnectionCategory::CreateLead,
            r#"[{"sourceField": "name", "targetField": "NAME"}]"#,
            "",
        );
        connection.stage_id = Some("IN_PROCESS".to_string());
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let result = create_lead(&ctx, &json!({"name": "Olga"})).await.unwrap();
        assert_eq!(result.entity, CrmEntity::Lead);
        assert_eq!(result.bitrix_id, json!("77"));
        assert_eq!(
            crm.body_of(methods::LEAD_ADD).unwrap(),
            json!({"fields": {"NAME": "Olga", "STATUS_ID": "IN_PROCESS"}})
        );
    }

    #[tokio::test]
    async fn test_create_lead_status_from_config() {
        let config = BridgeConfig::default();
        let project = project(Some(CRM));

        let crm = RecordingCrm::default().respond(methods::LEAD_ADD, json!(5));
        let configured = connection(
            ConnectionCategory::CreateLead,
            "[]",
            r#"{"STATUS_ID": "IN_PROCESS"}"#,
        );
        let ctx = OperationContext::new(&crm, &config, &project, &configured);
        create_lead(&ctx, &json!({})).await.unwrap();
        assert_eq!(
            crm.body_of(methods::LEAD_ADD).unwrap(),
            json!({"fields": {"STATUS_ID": "IN_PROCESS"}})
        );

        let crm = RecordingCrm::default().respond(methods::LEAD_ADD, json!(6));
        let mut overridden = connection(
            ConnectionCategory::CreateLead,
            "[]",
            r#"{"STATUS_ID": "CONVERTED"}"#,
        );
        overridden.stage_id = Some("IN_PROCESS".to_string());
        let ctx = OperationContext::new(&crm, &config, &project, &overridden);
        let result = create_lead(&ctx, &json!({})).await.unwrap();
        assert_eq!(result.fields.get("STATUS_ID"), Some(&json!("CONVERTED")));
    }

    #[tokio::test]
    async fn test_sentinel_project_never_calls_crm() {
        let crm = RecordingCrm::default();
        let config = BridgeConfig::default();
        let project = project(Some("https://your-bitrix-domain.bitrix24.ru"));
        let connection = connection(ConnectionCategory::CreateLead, "[]", "{}");
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let result = create_lead(&ctx, &json!({"x": 1})).await.unwrap();
        assert!(result.test_mode);
        let id = result.bitrix_id.as_i64().unwrap();
        assert!((1000..11000).contains(&id));
        assert!(crm.methods().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let crm = RecordingCrm::default().fail(methods::DEAL_ADD, "ACCESS_DENIED", "denied");
        let config = BridgeConfig::default();
        let project = project(Some(CRM));
        let connection = connection(ConnectionCategory::CreateDeal, "[]", "{}");
        let ctx = OperationContext::new(&crm, &config, &project, &connection);

        let err = create_deal(&ctx, &json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Upstream { ref code, .. } if code == "ACCESS_DENIED"));
    }
}
