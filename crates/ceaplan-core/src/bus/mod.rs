//! Message bus - ハンドラ間の型付きメッセージ配送
//!
//! # 保証
//! - (sender, receiver) ペアごとに FIFO（宛先 mailbox が 1 本の FIFO なので）
//! - RESPONSE / ERROR は correlation id で `send_request` の待ち受けに直接渡す
//! - 待ち受けがいない回答は receiver 宛に通常配送し、宛先がなければ捨てる
//!   （タイムアウト後に届いた回答はここで消える）
//!
//! # 共有状態
//! バスはハンドラ間で共有される唯一のデータ構造。ロックは短く、await を跨がない。

mod mailbox;
mod stats;

pub use self::mailbox::{Delivery, DropReason, Mailbox, OverflowPolicy};
pub use self::stats::{BusStats, StoppedTarget};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, oneshot};
use tracing::{debug, info, warn};

use self::mailbox::MailboxShared;
use crate::domain::{Body, BusError, Envelope, EnvelopeId, EnvelopeKind, HandlerId};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

/// Bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub mailbox_capacity: usize,
    /// Policy for REQUEST / RESPONSE / ERROR traffic.
    pub request_overflow: OverflowPolicy,
    /// Policy for INFORM traffic.
    pub inform_overflow: OverflowPolicy,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            request_overflow: OverflowPolicy::Block,
            inform_overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl BusConfig {
    fn policy_for(&self, kind: EnvelopeKind) -> OverflowPolicy {
        match kind {
            EnvelopeKind::Inform => self.inform_overflow,
            _ => self.request_overflow,
        }
    }
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

struct BusInner {
    config: BusConfig,
    mailboxes: RwLock<HashMap<HandlerId, Arc<MailboxShared>>>,
    pending: Mutex<HashMap<EnvelopeId, oneshot::Sender<Envelope>>>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

/// Cheap to clone; all clones share the same routing table.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(config: BusConfig) -> Self {
        Self::with_ports(
            config,
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    pub fn with_ports(
        config: BusConfig,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                mailboxes: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                ids,
                clock,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Create the mailbox for `handler_id`.
    ///
    /// Registering an id again replaces the old mailbox; the old one is closed.
    pub async fn register(&self, handler_id: HandlerId) -> Mailbox {
        let shared = MailboxShared::new(handler_id.clone(), self.inner.config.mailbox_capacity);
        let previous = self
            .inner
            .mailboxes
            .write()
            .await
            .insert(handler_id.clone(), Arc::clone(&shared));
        if let Some(previous) = previous {
            warn!(handler = %handler_id, "handler re-registered; closing previous mailbox");
            previous.close();
            previous.clear().await;
        }
        info!(handler = %handler_id, "handler registered");
        Mailbox::new(shared)
    }

    /// Remove a handler. Envelopes still queued for it are dropped silently.
    pub async fn unregister(&self, handler_id: &HandlerId) -> bool {
        let removed = self.inner.mailboxes.write().await.remove(handler_id);
        match removed {
            Some(shared) => {
                shared.close();
                let dropped = shared.clear().await;
                self.inner
                    .counters
                    .dropped
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                info!(handler = %handler_id, dropped, "handler unregistered");
                true
            }
            None => false,
        }
    }

    pub async fn is_registered(&self, handler_id: &HandlerId) -> bool {
        self.inner.mailboxes.read().await.contains_key(handler_id)
    }

    /// Flag a handler's mailbox as belonging to a stopped handler.
    pub(crate) async fn mark_stopped(&self, handler_id: &HandlerId) {
        if let Some(shared) = self.inner.mailboxes.read().await.get(handler_id) {
            shared.mark_stopped();
        }
    }

    /// Build a fresh envelope stamped with a new id and the current time.
    pub fn envelope(&self, sender: HandlerId, receiver: HandlerId, body: Body) -> Envelope {
        Envelope {
            id: self.inner.ids.generate_envelope_id(),
            correlation_id: None,
            reply_to: None,
            sender,
            receiver,
            body,
            timestamp: self.inner.clock.now(),
        }
    }

    /// Build an answer to `request` (RESPONSE or ERROR body) for its conversation.
    pub fn answer(&self, request: &Envelope, sender: HandlerId, body: Body) -> Envelope {
        let mut envelope = self.envelope(sender, request.reply_target().clone(), body);
        envelope.correlation_id = Some(request.conversation_id());
        envelope
    }

    /// Fire-and-forget delivery.
    pub async fn send(&self, envelope: Envelope) -> Delivery {
        let kind = envelope.kind();

        if kind.is_answer()
            && let Some(correlation_id) = envelope.correlation_id
        {
            let waiter = self.inner.pending.lock().await.remove(&correlation_id);
            if let Some(waiter) = waiter {
                // 受け手がちょうど timeout で諦めた場合は Err が返るが、それは late response と同じ扱い
                if waiter.send(envelope).is_ok() {
                    self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    return Delivery::ToWaiter;
                }
                debug!(%correlation_id, "waiter gone before delivery");
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                return Delivery::Dropped(DropReason::UnknownReceiver);
            }
        }

        let target = self
            .inner
            .mailboxes
            .read()
            .await
            .get(&envelope.receiver)
            .cloned();

        let Some(target) = target else {
            match kind {
                EnvelopeKind::Request => {
                    warn!(receiver = %envelope.receiver, envelope_id = %envelope.id, "request to unknown handler dropped")
                }
                _ => {
                    debug!(receiver = %envelope.receiver, envelope_id = %envelope.id, %kind, "unroutable envelope dropped")
                }
            }
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Delivery::Dropped(DropReason::UnknownReceiver);
        };

        let receiver = envelope.receiver.clone();
        let delivery = target
            .push(envelope, self.inner.config.policy_for(kind))
            .await;
        match delivery {
            Delivery::Dropped(reason) => {
                warn!(%receiver, ?reason, %kind, "envelope dropped");
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Displaced => {
                debug!(%receiver, %kind, "mailbox full; queued entry displaced");
                self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        delivery
    }

    /// Send a REQUEST and wait for its correlated RESPONSE / ERROR.
    ///
    /// The request gets a fresh id, which is the correlation key. Waiting (including
    /// any backpressure on the send) is bounded by `timeout`; on expiry the waiter
    /// is removed and a late answer is dropped by `send`.
    pub async fn send_request(
        &self,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, BusError> {
        if envelope.kind() != EnvelopeKind::Request {
            return Err(BusError::NotARequest(envelope.kind().to_string()));
        }

        let id = self.inner.ids.generate_envelope_id();
        envelope.id = id;
        envelope.correlation_id = None;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let exchange = async {
            self.send(envelope).await;
            rx.await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(answer)) => Ok(answer),
            // Ok(Err(_)) は waiter が回答なしで捨てられた場合（再登録など）
            Ok(Err(_)) | Err(_) => {
                self.expire(id, timeout).await;
                Err(BusError::Timeout(timeout))
            }
        }
    }

    async fn expire(&self, id: EnvelopeId, timeout: Duration) {
        self.inner.pending.lock().await.remove(&id);
        self.inner.counters.timeouts.fetch_add(1, Ordering::Relaxed);
        warn!(envelope_id = %id, ?timeout, "request timed out");
    }

    /// Snapshot of bus counters and stopped targets.
    pub async fn stats(&self) -> BusStats {
        let mailboxes = self.inner.mailboxes.read().await;
        let mut stopped_targets = Vec::new();
        let mut displaced = 0;
        for (id, shared) in mailboxes.iter() {
            displaced += shared.displaced();
            if shared.is_stopped() {
                stopped_targets.push(StoppedTarget {
                    handler: id.clone(),
                    queued: shared.len().await,
                });
            }
        }
        stopped_targets.sort_by(|a, b| a.handler.cmp(&b.handler));

        BusStats {
            registered: mailboxes.len(),
            pending_waiters: self.inner.pending.lock().await.len(),
            delivered: self.inner.counters.delivered.load(Ordering::Relaxed),
            dropped: self.inner.counters.dropped.load(Ordering::Relaxed),
            displaced,
            timeouts: self.inner.counters.timeouts.load(Ordering::Relaxed),
            stopped_targets,
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, ErrorPayload, Notice, Reply, RequestBody};

    fn ask(bus: &MessageBus, from: &str, to: &str, text: &str) -> Envelope {
        bus.envelope(
            HandlerId::new(from),
            HandlerId::new(to),
            Body::Request(RequestBody::Ask {
                text: text.into(),
                want_json: false,
            }),
        )
    }

    fn text_of(env: &Envelope) -> String {
        match &env.body {
            Body::Request(RequestBody::Ask { text, .. }) => text.clone(),
            Body::Response(Reply::Faq { answer }) => answer.clone(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    /// Minimal responder: answers every ASK with its own text.
    fn spawn_echo(bus: MessageBus, mut mailbox: Mailbox) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = mailbox.recv().await {
                let answer = text_of(&request);
                let reply = bus.answer(
                    &request,
                    mailbox.owner().clone(),
                    Body::Response(Reply::Faq { answer }),
                );
                bus.send(reply).await;
            }
        })
    }

    #[tokio::test]
    async fn send_to_unknown_receiver_is_dropped() {
        let bus = MessageBus::new(BusConfig::default());
        let delivery = bus.send(ask(&bus, "a", "nobody", "hi")).await;
        assert_eq!(delivery, Delivery::Dropped(DropReason::UnknownReceiver));
        assert_eq!(bus.stats().await.dropped, 1);
    }

    #[tokio::test]
    async fn fifo_per_pair() {
        let bus = MessageBus::new(BusConfig::default());
        let mut mailbox = bus.register(HandlerId::new("b")).await;

        for n in 0..20 {
            bus.send(ask(&bus, "a", "b", &n.to_string())).await;
        }
        for n in 0..20 {
            let env = mailbox.recv().await.unwrap();
            assert_eq!(text_of(&env), n.to_string());
        }
    }

    #[tokio::test]
    async fn send_request_round_trip_correlates() {
        let bus = MessageBus::new(BusConfig::default());
        let mailbox = bus.register(HandlerId::new("echo")).await;
        let _echo = spawn_echo(bus.clone(), mailbox);

        let request = ask(&bus, "caller", "echo", "ping");
        let original_id = request.id;
        let answer = bus
            .send_request(request, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(answer.kind(), EnvelopeKind::Response);
        assert!(answer.correlation_id.is_some());
        // fresh id が振られる
        assert_ne!(answer.correlation_id, Some(original_id));
        assert_eq!(text_of(&answer), "ping");
        assert_eq!(bus.stats().await.pending_waiters, 0);
    }

    #[tokio::test]
    async fn send_request_without_responder_times_out() {
        let bus = MessageBus::new(BusConfig::default());
        let _mailbox = bus.register(HandlerId::new("silent")).await;

        let result = bus
            .send_request(ask(&bus, "caller", "silent", "hello?"), Duration::from_millis(50))
            .await;

        assert_eq!(result, Err(BusError::Timeout(Duration::from_millis(50))));
        let stats = bus.stats().await;
        assert_eq!(stats.pending_waiters, 0);
        assert_eq!(stats.timeouts, 1);
    }

    #[tokio::test]
    async fn request_to_unregistered_handler_times_out() {
        let bus = MessageBus::new(BusConfig::default());
        let result = bus
            .send_request(ask(&bus, "caller", "gone", "x"), Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(BusError::Timeout(_))));
    }

    #[tokio::test]
    async fn late_answer_is_dropped() {
        let bus = MessageBus::new(BusConfig::default());
        let mut mailbox = bus.register(HandlerId::new("slow")).await;

        let result = bus
            .send_request(ask(&bus, "caller", "slow", "x"), Duration::from_millis(20))
            .await;
        assert!(result.is_err());

        let request = mailbox.recv().await.unwrap();
        let late = bus.answer(
            &request,
            HandlerId::new("slow"),
            Body::Error(ErrorPayload {
                kind: ErrorKind::Internal,
                message: "too late".into(),
            }),
        );
        assert_eq!(
            bus.send(late).await,
            Delivery::Dropped(DropReason::UnknownReceiver)
        );
    }

    #[tokio::test]
    async fn send_request_rejects_non_requests() {
        let bus = MessageBus::new(BusConfig::default());
        let inform = bus.envelope(
            HandlerId::new("a"),
            HandlerId::new("b"),
            Body::Inform(Notice {
                topic: "t".into(),
                data: serde_json::Value::Null,
            }),
        );
        let result = bus.send_request(inform, Duration::from_millis(10)).await;
        assert_eq!(result, Err(BusError::NotARequest("INFORM".into())));
    }

    #[tokio::test]
    async fn inform_uses_drop_oldest_policy() {
        let bus = MessageBus::new(BusConfig {
            mailbox_capacity: 1,
            ..BusConfig::default()
        });
        let mut mailbox = bus.register(HandlerId::new("b")).await;

        for n in 0..3 {
            let env = bus.envelope(
                HandlerId::new("a"),
                HandlerId::new("b"),
                Body::Inform(Notice {
                    topic: "tick".into(),
                    data: serde_json::json!(n),
                }),
            );
            bus.send(env).await;
        }

        let env = mailbox.recv().await.unwrap();
        match env.body {
            Body::Inform(n) => assert_eq!(n.data, serde_json::json!(2)),
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(bus.stats().await.displaced, 2);
    }

    #[tokio::test]
    async fn inform_overflow_keeps_queued_request() {
        let bus = MessageBus::new(BusConfig {
            mailbox_capacity: 1,
            ..BusConfig::default()
        });
        let mut mailbox = bus.register(HandlerId::new("b")).await;

        assert_eq!(bus.send(ask(&bus, "a", "b", "plan")).await, Delivery::Enqueued);
        let inform = bus.envelope(
            HandlerId::new("a"),
            HandlerId::new("b"),
            Body::Inform(Notice {
                topic: "tick".into(),
                data: serde_json::Value::Null,
            }),
        );
        assert_eq!(
            bus.send(inform).await,
            Delivery::Dropped(DropReason::Overflow)
        );

        let env = mailbox.recv().await.unwrap();
        assert_eq!(text_of(&env), "plan");
        let stats = bus.stats().await;
        assert_eq!(stats.displaced, 0);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn unregister_drops_in_flight_messages() {
        let bus = MessageBus::new(BusConfig::default());
        let mut mailbox = bus.register(HandlerId::new("b")).await;
        bus.send(ask(&bus, "a", "b", "1")).await;
        bus.send(ask(&bus, "a", "b", "2")).await;

        assert!(bus.unregister(&HandlerId::new("b")).await);
        assert!(mailbox.recv().await.is_none());
        assert!(!bus.is_registered(&HandlerId::new("b")).await);
        assert_eq!(bus.stats().await.dropped, 2);
    }

    #[tokio::test]
    async fn concurrent_requests_never_cross_deliver() {
        let bus = MessageBus::new(BusConfig::default());
        let mailbox = bus.register(HandlerId::new("echo")).await;
        let _echo = spawn_echo(bus.clone(), mailbox);

        let mut joins = Vec::new();
        for n in 0..16 {
            let bus = bus.clone();
            joins.push(tokio::spawn(async move {
                let caller = format!("caller-{n}");
                let request = ask(&bus, &caller, "echo", &format!("msg-{n}"));
                let answer = bus
                    .send_request(request, Duration::from_secs(2))
                    .await
                    .unwrap();
                (n, text_of(&answer))
            }));
        }

        for join in joins {
            let (n, text) = join.await.unwrap();
            assert_eq!(text, format!("msg-{n}"));
        }
    }
}
