//! The protocol message value shared by the parser, the handlers and the
//! serializer.

use std::fmt;

use super::codec;

/// One IRC protocol message: `[:prefix ]command[ args...]`.
///
/// The last element of `args` is the trailing parameter and may contain
/// spaces. Messages are plain values; build replies with the constructors
/// below instead of formatting raw lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolMessage {
    pub prefix: Option<String>,
    pub command: String,
    pub args: Vec<String>,
}

impl ProtocolMessage {
    pub fn new<C, I, A>(command: C, args: I) -> Self
    where
        C: Into<String>,
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            prefix: None,
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    #[cfg(test)]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", [target, text])
    }

    pub fn join(channel: &str) -> Self {
        Self::new("JOIN", [channel])
    }

    pub fn pass(password: &str) -> Self {
        Self::new("PASS", [password])
    }

    pub fn nick(nickname: &str) -> Self {
        Self::new("NICK", [nickname])
    }

    /// `USER <ident> <hostname> * :<realname>`
    pub fn user(ident: &str, hostname: &str, realname: &str) -> Self {
        Self::new("USER", [ident, hostname, "*", realname])
    }

    /// Answer to a `PING`, echoing its arguments back to the server.
    pub fn pong(ping: &ProtocolMessage) -> Self {
        Self::new("PONG", ping.args.iter().cloned())
    }

    pub fn quit(message: Option<&str>) -> Self {
        Self::new("QUIT", message)
    }

    /// True when the command matches `verb`, ignoring ASCII case.
    pub fn is(&self, verb: &str) -> bool {
        self.command.eq_ignore_ascii_case(verb)
    }

    /// Chat content (`PRIVMSG`/`NOTICE`) is paced through the outbound queue;
    /// everything else is protocol control and is written immediately.
    pub fn is_content(&self) -> bool {
        self.is("PRIVMSG") || self.is("NOTICE")
    }

    /// Nickname part of the prefix (`nick` in `nick!ident@host`).
    pub fn source_nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split_once('!').map_or(prefix, |(nick, _)| nick))
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// The last argument, which carries message text for `PRIVMSG` and friends.
    pub fn trailing(&self) -> Option<&str> {
        self.args.last().map(String::as_str)
    }
}

impl fmt::Display for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::serialize(self))
    }
}
