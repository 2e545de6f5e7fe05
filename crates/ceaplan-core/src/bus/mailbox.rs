//! Mailbox - ハンドラごとの有界 FIFO キュー
//!
//! # 設計
//! - `Mutex<VecDeque<Envelope>>` + `Notify` 2 本（readable / writable）
//! - 送信側は複数（バス経由）、受信側は 1 つ（`Mailbox` は Clone できない）
//! - ロックを保持したまま await しない
//! - `notified()` はロック取得前に enable しておく（取りこぼし防止）
//!
//! 満杯時の挙動は `OverflowPolicy` で決まる:
//! - `Block`: 空きが出るまで送信側を待たせる（backpressure）
//! - `DropOldest`: 一番古い INFORM を捨てて入れる。INFORM は REQUEST / RESPONSE / ERROR を
//!   押し出せないので、キューに INFORM が無ければ入ってきた INFORM の方を捨てる

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};

use crate::domain::{Envelope, EnvelopeKind, HandlerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Block,
    DropOldest,
}

/// Why an envelope was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    UnknownReceiver,
    Unregistered,
    TargetStopped,
    /// Mailbox full and nothing of lower or equal priority to evict.
    Overflow,
}

/// Result of a `send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Enqueued,
    /// Enqueued after dropping the oldest entry.
    Displaced,
    /// Handed straight to a `send_request` waiter.
    ToWaiter,
    Dropped(DropReason),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Delivery::Dropped(_))
    }
}

pub(crate) struct MailboxShared {
    owner: HandlerId,
    capacity: usize,
    queue: Mutex<VecDeque<Envelope>>,
    readable: Notify,
    writable: Notify,
    closed: AtomicBool,
    stopped: AtomicBool,
    displaced: AtomicU64,
}

impl MailboxShared {
    pub(crate) fn new(owner: HandlerId, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            owner,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            readable: Notify::new(),
            writable: Notify::new(),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            displaced: AtomicU64::new(0),
        })
    }

    pub(crate) async fn push(&self, envelope: Envelope, policy: OverflowPolicy) -> Delivery {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Delivery::Dropped(DropReason::Unregistered);
            }

            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.queue.lock().await;
                if queue.len() < self.capacity {
                    queue.push_back(envelope);
                    drop(queue);
                    self.readable.notify_one();
                    return Delivery::Enqueued;
                }

                match policy {
                    OverflowPolicy::DropOldest => {
                        let Some(victim) = eviction_slot(&queue, envelope.kind()) else {
                            return Delivery::Dropped(DropReason::Overflow);
                        };
                        queue.remove(victim);
                        queue.push_back(envelope);
                        drop(queue);
                        self.displaced.fetch_add(1, Ordering::Relaxed);
                        self.readable.notify_one();
                        return Delivery::Displaced;
                    }
                    OverflowPolicy::Block => {
                        // 停止済みの宛先は空かないので待たない
                        if self.stopped.load(Ordering::Acquire) {
                            return Delivery::Dropped(DropReason::TargetStopped);
                        }
                    }
                }
            }

            notified.await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    pub(crate) async fn clear(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let n = queue.len();
        queue.clear();
        n
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
        self.writable.notify_waiters();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn displaced(&self) -> u64 {
        self.displaced.load(Ordering::Relaxed)
    }

    pub(crate) async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

/// 押し出す位置。INFORM が最優先の犠牲で、INFORM 以外は INFORM が無ければ先頭を押し出す。
fn eviction_slot(queue: &VecDeque<Envelope>, incoming: EnvelopeKind) -> Option<usize> {
    let oldest_inform = queue.iter().position(|e| e.kind() == EnvelopeKind::Inform);
    match (oldest_inform, incoming) {
        (Some(slot), _) => Some(slot),
        (None, EnvelopeKind::Inform) => None,
        (None, _) => (!queue.is_empty()).then_some(0),
    }
}

/// Receiving half of a handler's mailbox. Owned by exactly one handler.
pub struct Mailbox {
    shared: Arc<MailboxShared>,
}

impl Mailbox {
    pub(crate) fn new(shared: Arc<MailboxShared>) -> Self {
        Self { shared }
    }

    pub fn owner(&self) -> &HandlerId {
        &self.shared.owner
    }

    /// Wait for the next envelope. `None` once the mailbox is unregistered.
    ///
    /// Cancel-safe: an envelope is only removed in the poll that returns it.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let notified = self.shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            if let Some(envelope) = self.try_pop().await {
                return Some(envelope);
            }

            notified.await;
        }
    }

    /// Take the next envelope without waiting.
    pub async fn try_recv(&mut self) -> Option<Envelope> {
        if self.shared.closed.load(Ordering::Acquire) {
            return None;
        }
        self.try_pop().await
    }

    pub async fn len(&self) -> usize {
        self.shared.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn try_pop(&self) -> Option<Envelope> {
        let envelope = self.shared.queue.lock().await.pop_front();
        if envelope.is_some() {
            self.shared.writable.notify_one();
        }
        envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Body, EnvelopeId, Notice, RequestBody};
    use chrono::Utc;
    use std::time::Duration;
    use ulid::Ulid;

    fn notice(n: u32) -> Envelope {
        Envelope {
            id: EnvelopeId::from_ulid(Ulid::new()),
            correlation_id: None,
            reply_to: None,
            sender: HandlerId::new("sender"),
            receiver: HandlerId::new("owner"),
            body: Body::Inform(Notice {
                topic: "n".into(),
                data: serde_json::json!(n),
            }),
            timestamp: Utc::now(),
        }
    }

    fn ask(text: &str) -> Envelope {
        Envelope {
            body: Body::Request(RequestBody::Ask {
                text: text.into(),
                want_json: false,
            }),
            ..notice(0)
        }
    }

    fn seq(env: &Envelope) -> u64 {
        match &env.body {
            Body::Inform(n) => n.data.as_u64().unwrap(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn fifo_order_is_kept() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 8);
        let mut mailbox = Mailbox::new(shared.clone());

        for n in 0..5 {
            assert_eq!(shared.push(notice(n), OverflowPolicy::Block).await, Delivery::Enqueued);
        }
        for n in 0..5 {
            assert_eq!(seq(&mailbox.recv().await.unwrap()), n);
        }
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn drop_oldest_displaces_head() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 2);
        let mut mailbox = Mailbox::new(shared.clone());

        shared.push(notice(1), OverflowPolicy::DropOldest).await;
        shared.push(notice(2), OverflowPolicy::DropOldest).await;
        let delivery = shared.push(notice(3), OverflowPolicy::DropOldest).await;

        assert_eq!(delivery, Delivery::Displaced);
        assert_eq!(shared.displaced(), 1);
        assert_eq!(seq(&mailbox.recv().await.unwrap()), 2);
        assert_eq!(seq(&mailbox.recv().await.unwrap()), 3);
    }

    #[tokio::test]
    async fn inform_never_displaces_a_queued_request() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 1);
        let mut mailbox = Mailbox::new(shared.clone());

        assert_eq!(shared.push(ask("keep me"), OverflowPolicy::Block).await, Delivery::Enqueued);
        let delivery = shared.push(notice(1), OverflowPolicy::DropOldest).await;

        assert_eq!(delivery, Delivery::Dropped(DropReason::Overflow));
        assert_eq!(shared.displaced(), 0);
        let env = mailbox.recv().await.unwrap();
        assert_eq!(env.kind(), EnvelopeKind::Request);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn inform_displaces_oldest_inform_behind_a_request() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 3);
        let mut mailbox = Mailbox::new(shared.clone());

        shared.push(ask("first"), OverflowPolicy::Block).await;
        shared.push(notice(1), OverflowPolicy::DropOldest).await;
        shared.push(notice(2), OverflowPolicy::DropOldest).await;
        let delivery = shared.push(notice(3), OverflowPolicy::DropOldest).await;

        assert_eq!(delivery, Delivery::Displaced);
        assert_eq!(mailbox.recv().await.unwrap().kind(), EnvelopeKind::Request);
        assert_eq!(seq(&mailbox.recv().await.unwrap()), 2);
        assert_eq!(seq(&mailbox.recv().await.unwrap()), 3);
    }

    #[tokio::test]
    async fn request_under_drop_oldest_evicts_an_inform_first() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 2);
        let mut mailbox = Mailbox::new(shared.clone());

        shared.push(ask("a"), OverflowPolicy::DropOldest).await;
        shared.push(notice(1), OverflowPolicy::DropOldest).await;
        let delivery = shared.push(ask("b"), OverflowPolicy::DropOldest).await;

        assert_eq!(delivery, Delivery::Displaced);
        assert_eq!(mailbox.recv().await.unwrap().kind(), EnvelopeKind::Request);
        assert_eq!(mailbox.recv().await.unwrap().kind(), EnvelopeKind::Request);
        assert!(mailbox.is_empty().await);
    }

    #[tokio::test]
    async fn block_waits_for_space() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 1);
        let mut mailbox = Mailbox::new(shared.clone());
        shared.push(notice(1), OverflowPolicy::Block).await;

        let pusher = tokio::spawn({
            let shared = shared.clone();
            async move { shared.push(notice(2), OverflowPolicy::Block).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());

        assert_eq!(seq(&mailbox.recv().await.unwrap()), 1);
        assert_eq!(pusher.await.unwrap(), Delivery::Enqueued);
        assert_eq!(seq(&mailbox.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 4);
        let mut mailbox = Mailbox::new(shared.clone());

        let receiver = tokio::spawn(async move { mailbox.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shared.push(notice(7), OverflowPolicy::Block).await;

        let env = receiver.await.unwrap().unwrap();
        assert_eq!(seq(&env), 7);
    }

    #[tokio::test]
    async fn close_releases_receiver_and_blocked_sender() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 1);
        let mut mailbox = Mailbox::new(shared.clone());
        shared.push(notice(1), OverflowPolicy::Block).await;

        let pusher = tokio::spawn({
            let shared = shared.clone();
            async move { shared.push(notice(2), OverflowPolicy::Block).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        shared.close();
        shared.clear().await;

        assert_eq!(pusher.await.unwrap(), Delivery::Dropped(DropReason::Unregistered));
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn stopped_target_drops_instead_of_blocking() {
        let shared = MailboxShared::new(HandlerId::new("owner"), 1);
        shared.push(notice(1), OverflowPolicy::Block).await;
        shared.mark_stopped();

        let delivery = shared.push(notice(2), OverflowPolicy::Block).await;
        assert_eq!(delivery, Delivery::Dropped(DropReason::TargetStopped));
        assert_eq!(shared.len().await, 1);
    }
}
