use myna_api::fault::Fault;
use myna_api::message::{Message, MessageId, MessageTag};
use myna_api::types::{AgentResult, BoxedMessage};
use std::fmt;
use tokio::sync::oneshot;

/// Completion slot of a synchronous or request-style send. Dropping it
/// unfulfilled resolves the sender with a closed-channel error.
pub(crate) type ReplySlot = oneshot::Sender<AgentResult<BoxedMessage>>;

pub(crate) enum EnvelopeBody {
    /// An application message, dispatched by tag.
    User(BoxedMessage),
    /// Graceful stop directive; `Some` means the port is being killed
    /// with a fault to propagate.
    Stop(Option<Fault>),
}

/// One queued message plus its delivery bookkeeping.
pub(crate) struct Envelope {
    pub id: MessageId,
    pub tag: MessageTag,
    pub body: EnvelopeBody,
    pub reply: Option<ReplySlot>,
}

impl Envelope {
    pub fn user<M: Message>(msg: M, reply: Option<ReplySlot>) -> Self {
        Self {
            id: MessageId::new(),
            tag: M::TAG,
            body: EnvelopeBody::User(Box::new(msg)),
            reply,
        }
    }

    pub fn user_boxed(tag: MessageTag, payload: BoxedMessage) -> Self {
        Self {
            id: MessageId::new(),
            tag,
            body: EnvelopeBody::User(payload),
            reply: None,
        }
    }

    pub fn stop(fault: Option<Fault>) -> Self {
        Self {
            id: MessageId::new(),
            tag: MessageTag("myna/stop"),
            body: EnvelopeBody::Stop(fault),
            reply: None,
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field(
                "body",
                match self.body {
                    EnvelopeBody::User(_) => &"<user>",
                    EnvelopeBody::Stop(_) => &"<stop>",
                },
            )
            .field("reply", &self.reply.is_some())
            .finish()
    }
}
