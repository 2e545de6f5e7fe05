//! Envelope - バス上を流れる 1 通のメッセージ
//!
//! kind は `Body` から導出するので、kind と payload が食い違うことはない。
//!
//! # Conversation
//! - 新規 REQUEST は `correlation_id = None`
//! - 会話の途中で別ハンドラへ転送する REQUEST は、元の REQUEST id を
//!   `correlation_id` に、元の呼び出し元を `reply_to` に持つ
//! - 返信は `reply_target()` 宛に `conversation_id()` を correlation として送る
//!
//! so the final RESPONSE always carries the id of the caller's REQUEST.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ErrorPayload;
use super::ids::{EnvelopeId, HandlerId};
use super::intent::{Intent, MissingPiece};
use super::plan::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeKind {
    Request,
    Response,
    Error,
    Inform,
}

impl EnvelopeKind {
    /// RESPONSE / ERROR answer a prior REQUEST.
    pub fn is_answer(&self) -> bool {
        matches!(self, EnvelopeKind::Response | EnvelopeKind::Error)
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeKind::Request => "REQUEST",
            EnvelopeKind::Response => "RESPONSE",
            EnvelopeKind::Error => "ERROR",
            EnvelopeKind::Inform => "INFORM",
        };
        f.write_str(s)
    }
}

/// Payloads of REQUEST envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestBody {
    /// Caller-facing request `{text, wantJson}`.
    Ask {
        text: String,
        #[serde(default, rename = "wantJson")]
        want_json: bool,
    },
    /// Parser → mapper.
    Translate { intent: Intent },
}

/// Payloads of RESPONSE envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reply {
    Faq {
        answer: String,
    },
    Plan {
        plan: ExecutionPlan,
    },
    Clarify {
        question: String,
        missing: MissingPiece,
        confidence: f64,
    },
}

impl Reply {
    pub fn clarify(missing: MissingPiece, confidence: f64) -> Self {
        Reply::Clarify {
            question: missing.question().to_string(),
            missing,
            confidence,
        }
    }
}

/// Fire-and-forget notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub topic: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Closed set of envelope bodies; one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Body {
    Request(RequestBody),
    Response(Reply),
    Error(ErrorPayload),
    Inform(Notice),
}

impl Body {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Body::Request(_) => EnvelopeKind::Request,
            Body::Response(_) => EnvelopeKind::Response,
            Body::Error(_) => EnvelopeKind::Error,
            Body::Inform(_) => EnvelopeKind::Inform,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<EnvelopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<HandlerId>,
    pub sender: HandlerId,
    pub receiver: HandlerId,
    pub body: Body,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        self.body.kind()
    }

    /// Id of the caller's original REQUEST for this conversation.
    pub fn conversation_id(&self) -> EnvelopeId {
        self.correlation_id.unwrap_or(self.id)
    }

    /// Who answers to this envelope go to.
    pub fn reply_target(&self) -> &HandlerId {
        self.reply_to.as_ref().unwrap_or(&self.sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn envelope(body: Body) -> Envelope {
        Envelope {
            id: EnvelopeId::from_ulid(Ulid::new()),
            correlation_id: None,
            reply_to: None,
            sender: HandlerId::new("caller"),
            receiver: HandlerId::intent_parser(),
            body,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn kind_follows_body() {
        let env = envelope(Body::Inform(Notice {
            topic: "catalog.refreshed".into(),
            data: serde_json::Value::Null,
        }));
        assert_eq!(env.kind(), EnvelopeKind::Inform);
        assert!(!env.kind().is_answer());
    }

    #[test]
    fn new_request_is_its_own_conversation() {
        let env = envelope(Body::Request(RequestBody::Ask {
            text: "what is CEA?".into(),
            want_json: false,
        }));
        assert_eq!(env.conversation_id(), env.id);
        assert_eq!(env.reply_target(), &HandlerId::new("caller"));
    }

    #[test]
    fn forwarded_request_keeps_original_conversation() {
        let original = EnvelopeId::from_ulid(Ulid::new());
        let mut env = envelope(Body::Request(RequestBody::Ask {
            text: "x".into(),
            want_json: false,
        }));
        env.correlation_id = Some(original);
        env.reply_to = Some(HandlerId::new("caller-2"));
        env.sender = HandlerId::intent_parser();

        assert_eq!(env.conversation_id(), original);
        assert_eq!(env.reply_target(), &HandlerId::new("caller-2"));
    }

    #[test]
    fn ask_body_uses_want_json_field_name() {
        let json = serde_json::to_value(Body::Request(RequestBody::Ask {
            text: "hi".into(),
            want_json: true,
        }))
        .unwrap();
        assert_eq!(json["kind"], "REQUEST");
        assert_eq!(json["payload"]["wantJson"], true);
    }

    #[test]
    fn clarify_reply_is_tagged() {
        let json = serde_json::to_value(Reply::clarify(MissingPiece::Domain, 0.15)).unwrap();
        assert_eq!(json["kind"], "CLARIFY");
        assert_eq!(json["missing"], "domain");
    }
}
