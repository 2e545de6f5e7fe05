//! Assistant - バス・ハンドラ・プロバイダをまとめた入口

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use ulid::Ulid;

use super::status::{HandlerStatus, Status};
use crate::bus::{BusStats, MessageBus};
use crate::config::Config;
use crate::domain::{Body, CeaplanError, HandlerId, Reply, RequestBody, ScriptHelp};
use crate::ports::CapabilityProvider;
use crate::runtime::{Handler, HandlerHandle, HandlerRunner};

pub struct Assistant {
    config: Config,
    bus: MessageBus,
    provider: Arc<dyn CapabilityProvider>,
    handlers: Vec<Arc<dyn Handler>>,
    running: Mutex<Vec<HandlerHandle>>,
}

impl Assistant {
    pub(crate) fn new(
        config: Config,
        bus: MessageBus,
        provider: Arc<dyn CapabilityProvider>,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Self {
        Self {
            config,
            bus,
            provider,
            handlers,
            running: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }

    /// Register every handler's mailbox and start its receive loop.
    ///
    /// 起動済みなら何もしない。shutdown() の後は再起動できる。
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if !running.is_empty() {
            debug!("assistant already running");
            return;
        }
        for handler in &self.handlers {
            let mailbox = self.bus.register(handler.id()).await;
            let runner = HandlerRunner::new(handler.clone(), mailbox, self.bus.clone());
            running.push(runner.start());
        }
        info!(handlers = running.len(), "assistant started");
    }

    /// One request/response exchange with the intent parser.
    pub async fn ask(&self, text: &str, want_json: bool) -> Result<Reply, CeaplanError> {
        let caller = HandlerId::new(format!("caller-{}", Ulid::new()));
        let request = self.bus.envelope(
            caller,
            HandlerId::intent_parser(),
            Body::Request(RequestBody::Ask {
                text: text.to_string(),
                want_json,
            }),
        );

        let answer = self
            .bus
            .send_request(request, self.config.request_timeout())
            .await?;

        match answer.body {
            Body::Response(reply) => Ok(reply),
            Body::Error(payload) => Err(payload.into()),
            other => Err(CeaplanError::Internal(format!(
                "unexpected {} answer",
                other.kind()
            ))),
        }
    }

    pub async fn script_help(&self, id_or_name: &str) -> Result<ScriptHelp, CeaplanError> {
        Ok(self.provider.script_help(id_or_name).await?)
    }

    pub async fn stats(&self) -> BusStats {
        self.bus.stats().await
    }

    pub async fn status(&self) -> Status {
        let handlers = self
            .running
            .lock()
            .await
            .iter()
            .map(|h| HandlerStatus {
                id: h.id().clone(),
                state: h.state(),
            })
            .collect();
        Status {
            handlers,
            bus: self.bus.stats().await,
        }
    }

    /// Stop every handler, letting in-flight envelopes finish.
    pub async fn shutdown(&self) {
        let handles: Vec<HandlerHandle> = self.running.lock().await.drain(..).collect();
        for handle in &handles {
            handle.request_stop();
        }
        for handle in handles {
            let id = handle.id().clone();
            let state = handle.stop().await;
            debug!(handler = %id, %state, "handler stopped");
        }
        info!("assistant shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AssistantBuilder;
    use crate::domain::{ErrorKind, HandlerState, MissingPiece};

    async fn started() -> Assistant {
        let assistant = AssistantBuilder::new(Config::default()).build().unwrap();
        assistant.start().await;
        assistant
    }

    #[tokio::test]
    async fn ask_faq() {
        let assistant = started().await;
        let reply = assistant.ask("what is CEA?", false).await.unwrap();
        assert!(matches!(reply, Reply::Faq { answer } if answer.contains("City Energy Analyst")));
        assistant.shutdown().await;
    }

    #[tokio::test]
    async fn ask_vague_gets_clarify() {
        let assistant = started().await;
        let reply = assistant.ask("optimize this", false).await.unwrap();
        assert!(matches!(
            reply,
            Reply::Clarify { missing: MissingPiece::Domain, .. }
        ));
        assistant.shutdown().await;
    }

    #[tokio::test]
    async fn ask_empty_is_parse_error() {
        let assistant = started().await;
        let err = assistant.ask("   ?!  ", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assistant.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent_and_status_lists_handlers() {
        let assistant = started().await;
        assistant.start().await;

        let status = assistant.status().await;
        assert_eq!(status.handlers.len(), 2);
        assert!(status.handlers.iter().all(|h| h.state == HandlerState::Running));
        assert_eq!(status.bus.registered, 2);

        assistant.shutdown().await;
        assert!(assistant.status().await.handlers.is_empty());
    }

    #[tokio::test]
    async fn script_help_by_name() {
        let assistant = started().await;
        let help = assistant.script_help("network_layout").await.unwrap();
        assert_eq!(help.id, "network-analysis-001");
        assistant.shutdown().await;
    }
}
