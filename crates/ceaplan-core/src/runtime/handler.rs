//! Handler trait - バスに参加するハンドラの契約
//!
//! ディスパッチは `Body` の閉じた enum に対する match で行う。
//! ハンドラは自分の状態しか触らず、他のハンドラとは envelope だけでやり取りする。

use async_trait::async_trait;
use tracing::debug;

use crate::bus::{Delivery, MessageBus};
use crate::domain::{
    Body, CeaplanError, Envelope, ErrorPayload, HandlerId, Notice, Reply, RequestBody,
};

/// A participant on the bus.
///
/// Only `on_request` is mandatory. Returning `Err` from any routine is a fault:
/// for a REQUEST it becomes an ERROR envelope to the requester.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn id(&self) -> HandlerId;

    async fn on_request(
        &self,
        ctx: &HandlerContext,
        envelope: &Envelope,
        request: &RequestBody,
    ) -> Result<(), CeaplanError>;

    async fn on_response(
        &self,
        _ctx: &HandlerContext,
        envelope: &Envelope,
        _reply: &Reply,
    ) -> Result<(), CeaplanError> {
        debug!(handler = %self.id(), envelope_id = %envelope.id, "unsolicited response ignored");
        Ok(())
    }

    async fn on_error(
        &self,
        _ctx: &HandlerContext,
        envelope: &Envelope,
        error: &ErrorPayload,
    ) -> Result<(), CeaplanError> {
        debug!(handler = %self.id(), envelope_id = %envelope.id, kind = %error.kind, "unsolicited error ignored");
        Ok(())
    }

    async fn on_inform(
        &self,
        _ctx: &HandlerContext,
        envelope: &Envelope,
        notice: &Notice,
    ) -> Result<(), CeaplanError> {
        debug!(handler = %self.id(), envelope_id = %envelope.id, topic = %notice.topic, "inform ignored");
        Ok(())
    }
}

/// Route one envelope to the kind-specific routine.
pub(crate) async fn dispatch(
    handler: &dyn Handler,
    ctx: &HandlerContext,
    envelope: &Envelope,
) -> Result<(), CeaplanError> {
    match &envelope.body {
        Body::Request(request) => handler.on_request(ctx, envelope, request).await,
        Body::Response(reply) => handler.on_response(ctx, envelope, reply).await,
        Body::Error(error) => handler.on_error(ctx, envelope, error).await,
        Body::Inform(notice) => handler.on_inform(ctx, envelope, notice).await,
    }
}

/// What a handler can do on the bus while processing an envelope.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    id: HandlerId,
    bus: MessageBus,
}

impl HandlerContext {
    pub fn new(id: HandlerId, bus: MessageBus) -> Self {
        Self { id, bus }
    }

    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Answer `request` with a RESPONSE.
    pub async fn reply(&self, request: &Envelope, reply: Reply) -> Delivery {
        let envelope = self
            .bus
            .answer(request, self.id.clone(), Body::Response(reply));
        self.bus.send(envelope).await
    }

    /// Answer `request` with an ERROR.
    pub async fn fail(&self, request: &Envelope, error: &CeaplanError) -> Delivery {
        let envelope = self
            .bus
            .answer(request, self.id.clone(), Body::Error(error.to_payload()));
        self.bus.send(envelope).await
    }

    /// Hand the conversation of `request` over to another handler.
    ///
    /// The forwarded REQUEST keeps the caller's correlation and reply target, so
    /// the receiver answers the original caller directly.
    pub async fn forward(
        &self,
        request: &Envelope,
        receiver: HandlerId,
        body: RequestBody,
    ) -> Delivery {
        let mut envelope = self
            .bus
            .envelope(self.id.clone(), receiver, Body::Request(body));
        envelope.correlation_id = Some(request.conversation_id());
        envelope.reply_to = Some(request.reply_target().clone());
        self.bus.send(envelope).await
    }

    pub async fn inform(&self, receiver: HandlerId, notice: Notice) -> Delivery {
        let envelope = self
            .bus
            .envelope(self.id.clone(), receiver, Body::Inform(notice));
        self.bus.send(envelope).await
    }
}
