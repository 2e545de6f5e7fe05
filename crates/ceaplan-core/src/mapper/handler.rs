//! WorkflowMapperHandler - TRANSLATE を受けて PLAN（または FAQ）を返す

use async_trait::async_trait;

use super::{MapOutcome, WorkflowMapper};
use crate::domain::{CeaplanError, Envelope, HandlerId, Reply, RequestBody};
use crate::runtime::{Handler, HandlerContext};

pub struct WorkflowMapperHandler {
    mapper: WorkflowMapper,
}

impl WorkflowMapperHandler {
    pub fn new(mapper: WorkflowMapper) -> Self {
        Self { mapper }
    }
}

#[async_trait]
impl Handler for WorkflowMapperHandler {
    fn id(&self) -> HandlerId {
        HandlerId::workflow_mapper()
    }

    async fn on_request(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
        request: &RequestBody,
    ) -> Result<(), CeaplanError> {
        let RequestBody::Translate { intent } = request else {
            return Err(CeaplanError::Internal(
                "workflow mapper only accepts TRANSLATE requests".into(),
            ));
        };

        let reply = match self.mapper.map(intent).await? {
            MapOutcome::Plan(plan) => Reply::Plan { plan },
            MapOutcome::Faq(answer) => Reply::Faq { answer },
        };
        ctx.reply(envelope, reply).await;
        Ok(())
    }
}
