//! The seam between the session and whatever computes replies.

use crate::irc::message::ProtocolMessage;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{error, warn};

/// Replies produced for one inbound message. `None` and an empty list both
/// mean "nothing to say".
pub type Reply = Option<Vec<ProtocolMessage>>;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("malformed {command}: {reason}")]
    Malformed { command: String, reason: String },
}

/// What a handler knows about the session it is answering for.
///
/// `span` is the handler's logging facility: it is entered around every
/// call, so `tracing` events emitted by the handler carry it.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub nickname: String,
    pub channel: String,
    pub realname: String,
    pub span: tracing::Span,
}

impl HandlerContext {
    pub fn new(nickname: &str, channel: &str, realname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            channel: channel.to_string(),
            realname: realname.to_string(),
            span: tracing::info_span!("handler", nick = %nickname, channel = %channel),
        }
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target.eq_ignore_ascii_case(&self.channel)
    }

    pub fn is_me(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nickname)
    }
}

/// Computes replies for messages received while the bot is on its channel.
///
/// Any state a handler needs lives in the implementing value, which the
/// composition root owns for the lifetime of the session.
pub trait MessageHandler: Send {
    fn handle(
        &mut self,
        msg: &ProtocolMessage,
        ctx: &HandlerContext,
    ) -> Result<Reply, HandlerError>;
}

impl<F> MessageHandler for F
where
    F: FnMut(&ProtocolMessage, &HandlerContext) -> Result<Reply, HandlerError> + Send,
{
    fn handle(
        &mut self,
        msg: &ProtocolMessage,
        ctx: &HandlerContext,
    ) -> Result<Reply, HandlerError> {
        self(msg, ctx)
    }
}

/// Run `handler` on `msg`. Errors and panics are logged and produce no
/// replies; they never reach the caller.
pub fn invoke(
    handler: &mut dyn MessageHandler,
    msg: &ProtocolMessage,
    ctx: &HandlerContext,
) -> Vec<ProtocolMessage> {
    let _entered = ctx.span.enter();
    match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(msg, ctx))) {
        Ok(Ok(replies)) => replies.unwrap_or_default(),
        Ok(Err(e)) => {
            warn!(command = %msg.command, "Handler error: {}", e);
            Vec::new()
        }
        Err(payload) => {
            error!(command = %msg.command, "Handler panicked: {}", panic_message(&*payload));
            Vec::new()
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
