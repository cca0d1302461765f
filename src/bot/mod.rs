//! Reply logic: the handler interface the session calls and the bundled
//! chat commands.

pub mod commands;
pub mod handler;
