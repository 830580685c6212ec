// Segment membership handlers

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::{ActionError, ActionHandler, HandlerContext};
use crate::store::CrmStore;
use crate::workflows::actions::{parse_params, ActionType, SegmentParams};

/// Resolve segment and contact for a membership change. Both must exist in
/// the execution's tenant.
async fn resolve(
    crm: &dyn CrmStore,
    p: &SegmentParams,
    ctx: &HandlerContext<'_>,
) -> Result<Uuid, ActionError> {
    let tenant_id = ctx.context.tenant_id();
    crm.get_segment(tenant_id, p.segment_id)
        .await?
        .ok_or_else(|| ActionError::NotFound(format!("Segment {}", p.segment_id)))?;

    let contact_id = p
        .contact_id
        .or_else(|| ctx.context.entity_of("contact"))
        .ok_or(ActionError::MissingTarget("contact"))?;
    crm.get_contact(tenant_id, contact_id)
        .await?
        .ok_or_else(|| ActionError::NotFound(format!("Contact {}", contact_id)))?;
    Ok(contact_id)
}

pub struct AddToSegmentHandler {
    crm: Arc<dyn CrmStore>,
}

impl AddToSegmentHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for AddToSegmentHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: SegmentParams = parse_params(ActionType::AddToSegment, params)?;
        let contact_id = resolve(self.crm.as_ref(), &p, ctx).await?;

        // The count moves only on a fresh insert so re-adding is a no-op.
        if !self.crm.add_segment_member(p.segment_id, contact_id).await? {
            return Ok(json!({
                "segmentId": p.segment_id,
                "contactId": contact_id,
                "added": false,
                "message": "Contact already in segment",
            }));
        }
        let count = self.crm.adjust_segment_count(p.segment_id, 1).await?;

        Ok(json!({
            "segmentId": p.segment_id,
            "contactId": contact_id,
            "added": true,
            "contactCount": count,
        }))
    }
}

pub struct RemoveFromSegmentHandler {
    crm: Arc<dyn CrmStore>,
}

impl RemoveFromSegmentHandler {
    pub fn new(crm: Arc<dyn CrmStore>) -> Self {
        Self { crm }
    }
}

#[async_trait]
impl ActionHandler for RemoveFromSegmentHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: SegmentParams = parse_params(ActionType::RemoveFromSegment, params)?;
        let contact_id = resolve(self.crm.as_ref(), &p, ctx).await?;

        if !self.crm.remove_segment_member(p.segment_id, contact_id).await? {
            return Ok(json!({
                "segmentId": p.segment_id,
                "contactId": contact_id,
                "removed": false,
                "message": "Contact not in segment",
            }));
        }
        let count = self.crm.adjust_segment_count(p.segment_id, -1).await?;

        Ok(json!({
            "segmentId": p.segment_id,
            "contactId": contact_id,
            "removed": true,
            "contactCount": count,
        }))
    }
}
