//! IntentParserHandler - バス上の入口
//!
//! ASK を受けて、FAQ はその場で答え、曖昧なら CLARIFY を返し、
//! ワークフロー要求は Intent を付けて WorkflowMapper へ転送する。

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::IntentParser;
use crate::domain::{ActionCategory, CeaplanError, Envelope, HandlerId, Reply, RequestBody};
use crate::ports::CapabilityProvider;
use crate::runtime::{Handler, HandlerContext};

pub struct IntentParserHandler {
    parser: IntentParser,
    provider: Arc<dyn CapabilityProvider>,
    mapper: HandlerId,
}

impl IntentParserHandler {
    pub fn new(parser: IntentParser, provider: Arc<dyn CapabilityProvider>) -> Self {
        Self {
            parser,
            provider,
            mapper: HandlerId::workflow_mapper(),
        }
    }

    /// Forward workflow requests to another handler id.
    pub fn with_mapper(mut self, mapper: HandlerId) -> Self {
        self.mapper = mapper;
        self
    }
}

#[async_trait]
impl Handler for IntentParserHandler {
    fn id(&self) -> HandlerId {
        HandlerId::intent_parser()
    }

    async fn on_request(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
        request: &RequestBody,
    ) -> Result<(), CeaplanError> {
        let RequestBody::Ask { text, want_json } = request else {
            return Err(CeaplanError::Internal(
                "intent parser only accepts ASK requests".into(),
            ));
        };

        let mut intent = self.parser.parse(text)?;
        intent.want_json = *want_json;

        match intent.category {
            ActionCategory::Ambiguous => {
                // missing は AMBIGUOUS のとき必ず入っている
                let missing = intent
                    .missing
                    .ok_or_else(|| CeaplanError::Internal("ambiguous intent without missing piece".into()))?;
                info!(conversation = %envelope.conversation_id(), ?missing, "asking for clarification");
                ctx.reply(envelope, Reply::clarify(missing, intent.confidence))
                    .await;
            }
            ActionCategory::Faq => {
                let answer = self.provider.answer_faq(&intent.raw_text).await?;
                let Some(answer) = answer else {
                    return Err(CeaplanError::NoMatchingCapability(format!(
                        "no FAQ entry answers {:?}",
                        intent.raw_text
                    )));
                };
                ctx.reply(envelope, Reply::Faq { answer }).await;
            }
            ActionCategory::WorkflowRequest => {
                let delivery = ctx
                    .forward(envelope, self.mapper.clone(), RequestBody::Translate { intent })
                    .await;
                if !delivery.is_delivered() {
                    return Err(CeaplanError::Internal(format!(
                        "workflow mapper {} is not available",
                        self.mapper
                    )));
                }
            }
        }
        Ok(())
    }
}
