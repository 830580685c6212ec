use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ActionError, ActionHandler, HandlerContext};
use crate::workflows::actions::{parse_params, ActionType, DelayParams, ParamsError};

/// Suspends the execution in-process. Cancellation wakes it early and
/// aborts the run.
pub struct DelayHandler {
    max_minutes: u64,
}

impl DelayHandler {
    pub fn new(max_minutes: u64) -> Self {
        Self { max_minutes }
    }
}

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, ActionError> {
        let p: DelayParams = parse_params(ActionType::Delay, params)?;
        if p.delay_in_minutes > self.max_minutes as f64 {
            return Err(ParamsError::Invalid(format!(
                "delayInMinutes must not exceed {}",
                self.max_minutes
            ))
            .into());
        }
        let duration = p.duration()?;

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.cancel.cancelled() => return Err(ActionError::Canceled),
        }

        Ok(json!({ "delayedMinutes": p.delay_in_minutes }))
    }
}
