//! ハンドラの受信ループとライフサイクル
//!
//! - `HandlerRunner::new` で CREATED
//! - `start()` で RUNNING。tokio task で mailbox を 1 通ずつ処理する
//! - `stop()` は処理中の envelope を最後まで処理してから STOPPED にする
//!   （キューに残った envelope は配送されず、バスの stats に "stopped target" として出る）
//!
//! ハンドラの失敗（Err / panic）はディスパッチ境界で捕まえ、REQUEST なら ERROR envelope にして返す。
//! ハンドラ自身は RUNNING のまま次の envelope に進む。

use std::any::Any;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handler::{Handler, HandlerContext, dispatch};
use crate::bus::{Mailbox, MessageBus};
use crate::domain::{CeaplanError, Envelope, EnvelopeKind, HandlerId, HandlerState};

/// A handler in the CREATED state, owning its mailbox.
pub struct HandlerRunner {
    handler: Arc<dyn Handler>,
    mailbox: Mailbox,
    bus: MessageBus,
    state_tx: watch::Sender<HandlerState>,
}

impl HandlerRunner {
    pub fn new(handler: Arc<dyn Handler>, mailbox: Mailbox, bus: MessageBus) -> Self {
        let (state_tx, _) = watch::channel(HandlerState::Created);
        Self {
            handler,
            mailbox,
            bus,
            state_tx,
        }
    }

    pub fn id(&self) -> HandlerId {
        self.handler.id()
    }

    pub fn state(&self) -> HandlerState {
        *self.state_tx.borrow()
    }

    /// CREATED → RUNNING.
    pub fn start(self) -> HandlerHandle {
        let id = self.handler.id();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        transition(&id, &self.state_tx, HandlerState::Running);
        let state_rx = self.state_tx.subscribe();

        let ctx = HandlerContext::new(id.clone(), self.bus.clone());
        let loop_state = LoopState {
            handler: self.handler,
            mailbox: self.mailbox,
            ctx,
            state_tx: self.state_tx,
        };
        let join = tokio::spawn(receive_loop(loop_state, shutdown_rx));

        HandlerHandle {
            id,
            state_rx,
            shutdown_tx,
            join,
        }
    }
}

/// Handle of a RUNNING handler.
/// - `shutdown_tx` を drop してもループは止まる
pub struct HandlerHandle {
    id: HandlerId,
    state_rx: watch::Receiver<HandlerState>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl HandlerHandle {
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    pub fn state(&self) -> HandlerState {
        *self.state_rx.borrow()
    }

    /// Ask the loop to stop after the envelope in progress (if any).
    pub fn request_stop(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop and wait until the handler is STOPPED.
    pub async fn stop(self) -> HandlerState {
        self.request_stop();
        if let Err(e) = self.join.await {
            warn!(handler = %self.id, error = %e, "receive loop ended abnormally");
        }
        *self.state_rx.borrow()
    }
}

struct LoopState {
    handler: Arc<dyn Handler>,
    mailbox: Mailbox,
    ctx: HandlerContext,
    state_tx: watch::Sender<HandlerState>,
}

async fn receive_loop(mut state: LoopState, mut shutdown_rx: watch::Receiver<bool>) {
    let id = state.ctx.id().clone();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // mailbox 待ちは shutdown と競合させる（recv は cancel-safe）
        let envelope = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            envelope = state.mailbox.recv() => envelope,
        };

        let Some(envelope) = envelope else {
            debug!(handler = %id, "mailbox closed");
            break;
        };

        // ここから先は select の外なので、stop 要求が来ても最後まで処理する
        process(&state.handler, &state.ctx, envelope).await;
    }

    transition(&id, &state.state_tx, HandlerState::Stopped);
    state.ctx.bus().mark_stopped(&id).await;
}

async fn process(handler: &Arc<dyn Handler>, ctx: &HandlerContext, envelope: Envelope) {
    let envelope = Arc::new(envelope);

    // 専用 task で実行して panic もここで捕まえる
    let task = tokio::spawn({
        let handler = Arc::clone(handler);
        let ctx = ctx.clone();
        let envelope = Arc::clone(&envelope);
        async move { dispatch(handler.as_ref(), &ctx, &envelope).await }
    });

    let fault = match task.await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join_err) if join_err.is_panic() => {
            CeaplanError::Internal(format!("handler panicked: {}", panic_message(join_err.into_panic())))
        }
        Err(join_err) => CeaplanError::Internal(format!("handler task failed: {join_err}")),
    };

    if envelope.kind() == EnvelopeKind::Request {
        warn!(
            handler = %ctx.id(),
            envelope_id = %envelope.id,
            kind = %fault.kind(),
            error = %fault,
            "request failed; replying with ERROR"
        );
        ctx.fail(&envelope, &fault).await;
    } else {
        warn!(
            handler = %ctx.id(),
            envelope_id = %envelope.id,
            envelope_kind = %envelope.kind(),
            error = %fault,
            "fault while handling non-request envelope"
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn transition(id: &HandlerId, state_tx: &watch::Sender<HandlerState>, next: HandlerState) {
    let current = *state_tx.borrow();
    if !current.can_transition_to(next) {
        warn!(handler = %id, from = %current, to = %next, "invalid state transition ignored");
        return;
    }
    state_tx.send_replace(next);
    info!(handler = %id, from = %current, to = %next, "handler state changed");
}
