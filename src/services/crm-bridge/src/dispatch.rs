//! Category-based dispatch to the CRM operation handlers

use crate::error::BridgeResult;
use crate::models::{ConnectionCategory, OperationResult};
use crate::operations::{self, OperationContext};
use serde_json::Value;
use tracing::info;

/// Run the operation named by the connection's stored category.
///
/// Unknown category text is `UnsupportedCategory`.
pub async fn dispatch(ctx: &OperationContext<'_>, payload: &Value) -> BridgeResult<OperationResult> {
    let category: ConnectionCategory = ctx.connection.category.parse()?;

    info!(
        connection_id = %ctx.connection.id,
        category = %category,
        "Dispatching webhook"
    );

    match category {
        ConnectionCategory::CreateDeal => operations::create_deal(ctx, payload).await,
        ConnectionCategory::CreateLead => operations::create_lead(ctx, payload).await,
        ConnectionCategory::MoveDeal => operations::move_deal(ctx, payload).await,
        ConnectionCategory::MoveDealByPhone => operations::move_deal_by_phone(ctx, payload).await,
    }
}
