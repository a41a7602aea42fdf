//! Moving existing deals between funnels and stages

use super::{apply_move_targets, synthetic_id, without_keys, OperationContext};
use crate::error::{BridgeError, BridgeResult};
use crate::mapping::{first_present, is_truthy};
use crate::models::{CrmEntity, OperationAction, OperationResult};
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use tracing::{info, warn};

const DEAL_ID_KEYS: [&str; 2] = ["dealId", "id"];
const PHONE_KEYS: [&str; 2] = ["phone", "tel"];

/// Move a deal identified by the payload to the configured funnel and stage
pub async fn move_deal(ctx: &OperationContext<'_>, payload: &Value) -> BridgeResult<OperationResult> {
    let prepared = ctx.prepare(payload)?;

    let deal_id = first_present(&prepared.mapped, payload, &DEAL_ID_KEYS)
        .cloned()
        .ok_or_else(|| BridgeError::missing_identifier(&DEAL_ID_KEYS))?;

    let mut fields = without_keys(&prepared.mapped, &DEAL_ID_KEYS);
    apply_move_targets(&mut fields, &prepared.settings);

    if prepared.test_mode {
        info!(connection_id = %ctx.connection.id, deal_id = %deal_id, "Test mode: deal not moved");
    } else {
        ctx.crm
            .update_deal(&prepared.base_url, &deal_id, &fields)
            .await?;
        info!(connection_id = %ctx.connection.id, deal_id = %deal_id, "Deal moved");
    }

    Ok(OperationResult {
        entity: CrmEntity::Deal,
        action: OperationAction::Moved,
        bitrix_id: deal_id,
        mapped_data: prepared.mapped,
        fields,
        original_payload: payload.clone(),
        phone_number: None,
        found_deal: None,
        test_mode: prepared.test_mode,
    })
}

/// Find the newest deal with the payload's phone number and move it
pub async fn move_deal_by_phone(
    ctx: &OperationContext<'_>,
    payload: &Value,
) -> BridgeResult<OperationResult> {
    let prepared = ctx.prepare(payload)?;

    let phone = first_present(&prepared.mapped, payload, &PHONE_KEYS)
        .map(phone_text)
        .ok_or_else(|| BridgeError::missing_identifier(&PHONE_KEYS))?;

    let mut fields = without_keys(&prepared.mapped, &PHONE_KEYS);
    apply_move_targets(&mut fields, &prepared.settings);

    let (bitrix_id, found_deal) = if prepared.test_mode {
        info!(connection_id = %ctx.connection.id, "Test mode: deal lookup by phone skipped");
        (synthetic_id(), None)
    } else {
        let deals = ctx
            .crm
            .find_deals_by_phone(&prepared.base_url, &phone)
            .await?;

        let deal = newest_deal(deals).ok_or_else(|| {
            warn!(connection_id = %ctx.connection.id, "No deal matches phone number");
            BridgeError::record_not_found(phone.clone())
        })?;
        let deal_id = deal.get("ID").cloned().unwrap_or(Value::Null);

        ctx.crm
            .update_deal(&prepared.base_url, &deal_id, &fields)
            .await?;
        info!(connection_id = %ctx.connection.id, deal_id = %deal_id, "Deal moved by phone");

        (deal_id, Some(deal))
    };

    Ok(OperationResult {
        entity: CrmEntity::Deal,
        action: OperationAction::MovedByPhone,
        bitrix_id,
        mapped_data: prepared.mapped,
        fields,
        original_payload: payload.clone(),
        phone_number: Some(phone),
        found_deal,
        test_mode: prepared.test_mode,
    })
}

fn phone_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Most recently created deal that carries an `ID`; ties and unparsable dates
/// fall back to the highest `ID`
pub fn newest_deal(deals: Vec<Value>) -> Option<Value> {
    deals
        .into_iter()
        .filter(|deal| deal.get("ID").is_some_and(is_truthy))
        .max_by_key(|deal| (created_at(deal), numeric_id(deal)))
}

fn created_at(deal: &Value) -> Option<DateTime<FixedOffset>> {
    deal.get("DATE_CREATE")
        .and_then(Value::as_str)
        .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
}

fn numeric_id(deal: &Value) -> i64 {
    match deal.get("ID") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}
