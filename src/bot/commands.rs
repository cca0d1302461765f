//! Chat commands answered by the bundled handler.
//!
//! On the channel a command must start with `!` (`!shuffle a,b,c`); in a
//! direct message to the bot the `!` is not needed. Replies go back to the
//! channel, or to the sender for direct messages.

use crate::bot::handler::{HandlerContext, HandlerError, MessageHandler, Reply};
use crate::irc::message::ProtocolMessage;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const BOLD: char = '\x02';

const HELP: &str = "\x02***** {botname} Help *****\x02\n\
For more information about command, type:\n\
\x02/msg {botnick} help <command>\x02\n\
\n\
Available commands:\n\
\x02LIST SHUFFLE\x02\n\
\n\
License: GPL3 or any later\n\
***** End of Help *****";

const LIST_HELP: &str = "\x02LIST\x02: manages the user-shared list of items.\n\
SYNTAX:\n  \
list new|rm|len <listname>\n  \
list show <listname> [<from>:<to>]\n  \
list push <listname> [<item>][,<item>]...\n  \
list pop <listname> [<itemNumber>]\n  \
list";

const SHUFFLE_HELP: &str = "\x02SHUFFLE\x02: prints randomly shuffled list.\n\
SYNTAX:\n  \
shuffle <item>[,<item>]...";

/// A parsed bot command.
#[derive(Debug, PartialEq)]
pub enum ParsedCommand {
    Help { topic: Option<String> },
    List(ListOp),
    Shuffle { items: String },
}

/// Subcommands of `list`.
#[derive(Debug, PartialEq)]
pub enum ListOp {
    Names,
    New(String),
    Rm(String),
    Len(String),
    Show { name: String, range: Option<String> },
    Push { name: String, items: String },
    Pop { name: String, index: Option<String> },
    Unknown(String),
}

impl ParsedCommand {
    /// `help` is private-only; everything else works in both places.
    fn allowed(&self, private: bool) -> bool {
        match self {
            ParsedCommand::Help { .. } => private,
            ParsedCommand::List(_) | ParsedCommand::Shuffle { .. } => true,
        }
    }
}

/// Split off the first whitespace-delimited token.
fn next_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (input, ""),
    }
}

fn non_empty(token: &str) -> Option<String> {
    (!token.is_empty()).then(|| token.to_string())
}

/// Parse command text (without the leading `!`). Command names are
/// case-insensitive. Returns `None` for unknown commands.
pub fn parse_command(input: &str) -> Option<ParsedCommand> {
    let (cmd, rest) = next_token(input);
    match cmd.to_lowercase().as_str() {
        "help" => Some(ParsedCommand::Help {
            topic: non_empty(next_token(rest).0),
        }),
        "list" => Some(ParsedCommand::List(parse_list(rest))),
        "shuffle" => Some(ParsedCommand::Shuffle {
            items: rest.trim().to_string(),
        }),
        _ => None,
    }
}

fn parse_list(input: &str) -> ListOp {
    if input.trim().is_empty() {
        return ListOp::Names;
    }
    let (subcommand, rest) = next_token(input);
    let (name, rest) = next_token(rest);
    let name = name.to_string();
    match subcommand.to_lowercase().as_str() {
        "new" => ListOp::New(name),
        "rm" => ListOp::Rm(name),
        "len" => ListOp::Len(name),
        "show" => ListOp::Show {
            name,
            range: non_empty(next_token(rest).0),
        },
        "push" => ListOp::Push {
            name,
            items: rest.to_string(),
        },
        "pop" => ListOp::Pop {
            name,
            index: non_empty(next_token(rest).0),
        },
        other => ListOp::Unknown(other.to_string()),
    }
}

/// Problems with a `list` request. Only reported back in private.
#[derive(Debug, Error, PartialEq)]
pub enum ListError {
    #[error("List '{0}' exists!")]
    Exists(String),
    #[error("List '{0}' doesn't exist")]
    Missing(String),
    #[error("Unknown subcommand: '{0}'")]
    UnknownSubcommand(String),
    #[error("Incorrect sublist format")]
    BadRange,
    #[error("Push failed")]
    PushFailed,
    #[error("Incorrect number: {0}")]
    BadIndex(String),
    #[error("Pop failed: no list '{0}'")]
    PopMissing(String),
    #[error("Pop failed")]
    PopFailed,
}

/// Named lists shared by everyone talking to the bot.
#[derive(Debug, Default)]
pub struct ListStore {
    lists: BTreeMap<String, Vec<String>>,
    size_limit: usize,
}

impl ListStore {
    /// `size_limit` of zero means unlimited.
    pub fn new(size_limit: usize) -> Self {
        Self {
            lists: BTreeMap::new(),
            size_limit,
        }
    }

    pub fn apply(&mut self, op: ListOp) -> Result<Option<String>, ListError> {
        match op {
            ListOp::Names => Ok(self.names()),
            ListOp::New(name) => {
                if self.lists.contains_key(&name) {
                    return Err(ListError::Exists(name));
                }
                self.lists.insert(name, Vec::new());
                Ok(None)
            }
            ListOp::Rm(name) => match self.lists.remove(&name) {
                Some(_) => Ok(None),
                None => Err(ListError::Missing(name)),
            },
            ListOp::Len(name) => match self.lists.get(&name) {
                Some(items) => Ok(Some(items.len().to_string())),
                None => Err(ListError::Missing(name)),
            },
            ListOp::Show { name, range } => self.show(&name, range.as_deref()),
            ListOp::Push { name, items } => self.push(&name, &items),
            ListOp::Pop { name, index } => self.pop(name, index),
            ListOp::Unknown(sub) => Err(ListError::UnknownSubcommand(sub)),
        }
    }

    fn names(&self) -> Option<String> {
        if self.lists.is_empty() {
            return None;
        }
        Some(self.lists.keys().cloned().collect::<Vec<_>>().join("; "))
    }

    fn show(&self, name: &str, range: Option<&str>) -> Result<Option<String>, ListError> {
        let Some(items) = self.lists.get(name) else {
            return Ok(None);
        };
        if items.is_empty() {
            return Ok(Some("<empty list>".to_string()));
        }

        let len = items.len() as i64;
        let (mut from, mut to) = (0, len);
        if let Some((f, t)) = range.and_then(|r| r.split_once(':')) {
            from = f.parse().map_err(|_| ListError::BadRange)?;
            to = t.parse().map_err(|_| ListError::BadRange)?;
        }
        if from < 0 {
            from += len;
        }
        let from = clamp_index(from, len);
        let to = clamp_index(to, len);
        if from >= to {
            return Ok(None);
        }

        let lines: Vec<String> = items[from..to]
            .iter()
            .enumerate()
            .map(|(no, item)| format!("{}: {}", from + no, item))
            .collect();
        Ok(Some(lines.join("\n")))
    }

    fn push(&mut self, name: &str, items: &str) -> Result<Option<String>, ListError> {
        let list = self.lists.get_mut(name).ok_or(ListError::PushFailed)?;
        if self.size_limit > 0 && list.len() >= self.size_limit {
            return Ok(Some(format!(
                "'{}' reached its maximum size: {}",
                name, self.size_limit
            )));
        }
        let room = if self.size_limit > 0 {
            self.size_limit - list.len()
        } else {
            usize::MAX
        };
        list.extend(
            items
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .take(room)
                .map(str::to_string),
        );
        Ok(None)
    }

    fn pop(&mut self, name: String, index: Option<String>) -> Result<Option<String>, ListError> {
        let index: i64 = match index {
            Some(raw) => raw.parse().map_err(|_| ListError::BadIndex(raw))?,
            None => 0,
        };
        let list = self
            .lists
            .get_mut(&name)
            .ok_or(ListError::PopMissing(name))?;
        let len = list.len() as i64;
        let index = if index < 0 { index + len } else { index };
        if index < 0 || index >= len {
            return Err(ListError::PopFailed);
        }
        Ok(Some(list.remove(index as usize)))
    }
}

/// Python-style slice bound: negative counts from the end, then clamp.
fn clamp_index(index: i64, len: i64) -> usize {
    let index = if index < 0 { (index + len).max(0) } else { index };
    index.min(len) as usize
}

/// No items still gets an answer: an empty line.
fn shuffle_items(items: &str) -> String {
    let mut parts: Vec<&str> = items.split(',').collect();
    parts.shuffle(&mut rand::rng());
    parts.join(",")
}

fn help_text(topic: Option<&str>) -> String {
    match topic.map(str::to_lowercase).as_deref() {
        None | Some("help") => HELP.to_string(),
        Some("list") => LIST_HELP.to_string(),
        Some("shuffle") => SHUFFLE_HELP.to_string(),
        Some(_) => format!(
            "No help for command: {BOLD}{}{BOLD}",
            topic.unwrap_or_default()
        ),
    }
}

fn expand(template: &str, sender: &str, ctx: &HandlerContext) -> String {
    template
        .replace("{sendernick}", sender)
        .replace("{botnick}", &ctx.nickname)
        .replace("{botname}", &ctx.realname)
}

/// One `PRIVMSG` per reply line. Empty lines become a single space so the
/// server does not reject them.
fn to_privmsgs(target: &str, text: &str) -> Vec<ProtocolMessage> {
    text.split('\n')
        .map(|line| if line.is_empty() { " " } else { line })
        .map(|line| ProtocolMessage::privmsg(target, line))
        .collect()
}

/// The bot's default [`MessageHandler`]: `help`, `list` and `shuffle`.
pub struct CommandHandler {
    lists: ListStore,
}

impl CommandHandler {
    pub fn new(list_size_limit: usize) -> Self {
        Self {
            lists: ListStore::new(list_size_limit),
        }
    }

    fn respond(
        &mut self,
        sender: &str,
        text: &str,
        private: bool,
        ctx: &HandlerContext,
    ) -> Option<String> {
        let name = next_token(text).0;
        let Some(command) = parse_command(text) else {
            return private.then(|| format!("Unknown command: {BOLD}{}{BOLD}", name));
        };
        if !command.allowed(private) {
            return None;
        }
        debug!(sender, command = name, private, "Running command");

        match command {
            ParsedCommand::Help { topic } => Some(expand(&help_text(topic.as_deref()), sender, ctx)),
            ParsedCommand::List(op) => match self.lists.apply(op) {
                Ok(reply) => reply,
                Err(e) => private.then(|| e.to_string()),
            },
            ParsedCommand::Shuffle { items } => Some(shuffle_items(&items)),
        }
    }
}

impl MessageHandler for CommandHandler {
    fn handle(
        &mut self,
        msg: &ProtocolMessage,
        ctx: &HandlerContext,
    ) -> Result<Reply, HandlerError> {
        if !msg.is("PRIVMSG") {
            return Ok(None);
        }
        let Some(sender) = msg.source_nick() else {
            return Ok(None);
        };
        let (text, targets) = match msg.args.split_last() {
            Some((text, targets)) if !targets.is_empty() => (text.trim(), targets),
            _ => {
                return Err(HandlerError::Malformed {
                    command: msg.command.clone(),
                    reason: "expected a target and a text".into(),
                })
            }
        };

        let (respond_to, text, private) = if targets.iter().any(|t| ctx.is_channel(t)) {
            let Some(command) = text.strip_prefix('!') else {
                return Ok(None);
            };
            (ctx.channel.as_str(), command, false)
        } else if targets.iter().any(|t| ctx.is_me(t)) {
            (sender, text, true)
        } else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        Ok(self
            .respond(sender, text, private, ctx)
            .map(|reply| to_privmsgs(respond_to, &reply)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> HandlerContext {
        HandlerContext::new("teamer", "#bbconf", "BBConf Teamer Bot")
    }

    fn privmsg(from: &str, target: &str, text: &str) -> ProtocolMessage {
        ProtocolMessage::privmsg(target, text).with_prefix(format!("{}!user@host", from))
    }

    fn texts(reply: Reply) -> Vec<String> {
        reply
            .unwrap_or_default()
            .into_iter()
            .map(|m| m.trailing().unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("HELP list"),
            Some(ParsedCommand::Help { topic: Some("list".into()) })
        );
        assert_eq!(
            parse_command("list push groceries milk,eggs"),
            Some(ParsedCommand::List(ListOp::Push {
                name: "groceries".into(),
                items: "milk,eggs".into()
            }))
        );
        assert_eq!(parse_command("list"), Some(ParsedCommand::List(ListOp::Names)));
        assert_eq!(
            parse_command("list frobnicate x"),
            Some(ParsedCommand::List(ListOp::Unknown("frobnicate".into())))
        );
        assert_eq!(parse_command("dance"), None);
    }

    #[test]
    fn test_channel_requires_bang() {
        let mut handler = CommandHandler::new(15);
        let reply = handler
            .handle(&privmsg("alice", "#bbconf", "shuffle a"), &ctx())
            .unwrap();
        assert_eq!(reply, None);

        let reply = handler
            .handle(&privmsg("alice", "#bbconf", "!shuffle a"), &ctx())
            .unwrap();
        assert_eq!(reply, Some(vec![ProtocolMessage::privmsg("#bbconf", "a")]));
    }

    #[test]
    fn test_help_is_private_only() {
        let mut handler = CommandHandler::new(15);
        let public = handler
            .handle(&privmsg("alice", "#bbconf", "!help"), &ctx())
            .unwrap();
        assert_eq!(public, None);

        let private = handler
            .handle(&privmsg("alice", "teamer", "help"), &ctx())
            .unwrap()
            .unwrap();
        assert!(private.iter().all(|m| m.arg(0) == Some("alice")));
        assert!(private[0].trailing().unwrap().contains("BBConf Teamer Bot Help"));
        assert!(private.iter().any(|m| m.trailing() == Some(" ")));

        let topic = texts(handler.handle(&privmsg("alice", "teamer", "help dance"), &ctx()).unwrap());
        assert_eq!(topic, vec!["No help for command: \x02dance\x02"]);
    }

    #[test]
    fn test_unknown_command_only_reported_in_private() {
        let mut handler = CommandHandler::new(15);
        let public = handler
            .handle(&privmsg("alice", "#bbconf", "!dance"), &ctx())
            .unwrap();
        assert_eq!(public, None);

        let private = texts(handler.handle(&privmsg("alice", "teamer", "dance"), &ctx()).unwrap());
        assert_eq!(private, vec!["Unknown command: \x02dance\x02"]);
    }

    #[test]
    fn test_list_lifecycle() {
        let mut handler = CommandHandler::new(3);
        let ctx = ctx();
        let mut say = |text: &str| texts(handler.handle(&privmsg("bob", "teamer", text), &ctx).unwrap());

        assert!(say("list").is_empty());
        assert!(say("list new team").is_empty());
        assert_eq!(say("list new team"), vec!["List 'team' exists!"]);
        assert_eq!(say("list show team"), vec!["<empty list>"]);
        assert!(say("list push team alice, bob,carol,dave").is_empty());
        assert_eq!(say("list len team"), vec!["3"]);
        assert_eq!(say("list push team erin"), vec!["'team' reached its maximum size: 3"]);
        assert_eq!(say("list show team"), vec!["0: alice", "1: bob", "2: carol"]);
        assert_eq!(say("list show team -2:3"), vec!["1: bob", "2: carol"]);
        assert_eq!(say("list show team x:1"), vec!["Incorrect sublist format"]);
        assert_eq!(say("list pop team"), vec!["alice"]);
        assert_eq!(say("list pop team -1"), vec!["carol"]);
        assert_eq!(say("list pop team 7"), vec!["Pop failed"]);
        assert_eq!(say("list pop team one"), vec!["Incorrect number: one"]);
        assert_eq!(say("list pop other"), vec!["Pop failed: no list 'other'"]);
        assert_eq!(say("list"), vec!["team"]);
        assert!(say("list rm team").is_empty());
        assert_eq!(say("list len team"), vec!["List 'team' doesn't exist"]);
    }

    #[test]
    fn test_list_errors_hidden_on_channel() {
        let mut handler = CommandHandler::new(15);
        let reply = handler
            .handle(&privmsg("bob", "#bbconf", "!list rm nothing"), &ctx())
            .unwrap();
        assert_eq!(reply, None);
    }

    #[test]
    fn test_shuffle_keeps_items() {
        let shuffled = shuffle_items("a,b,c,d");
        let mut parts: Vec<&str> = shuffled.split(',').collect();
        parts.sort();
        assert_eq!(parts, vec!["a", "b", "c", "d"]);
        assert_eq!(shuffle_items(""), "");
    }

    #[test]
    fn test_shuffle_without_items_answers_blank_line() {
        let mut handler = CommandHandler::new(15);
        let reply = handler
            .handle(&privmsg("bob", "#bbconf", "!shuffle"), &ctx())
            .unwrap();
        assert_eq!(reply, Some(vec![ProtocolMessage::privmsg("#bbconf", " ")]));
    }

    #[test]
    fn test_malformed_privmsg_is_an_error() {
        let mut handler = CommandHandler::new(15);
        let msg = ProtocolMessage::new("PRIVMSG", ["lonely"]).with_prefix("bob!u@h");
        assert!(matches!(
            handler.handle(&msg, &ctx()),
            Err(HandlerError::Malformed { .. })
        ));
    }

    #[test]
    fn test_ignores_other_targets_and_commands() {
        let mut handler = CommandHandler::new(15);
        let elsewhere = handler
            .handle(&privmsg("bob", "#other", "!shuffle a,b"), &ctx())
            .unwrap();
        assert_eq!(elsewhere, None);

        let join = ProtocolMessage::join("#bbconf").with_prefix("bob!u@h");
        assert_eq!(handler.handle(&join, &ctx()).unwrap(), None);
    }
}
