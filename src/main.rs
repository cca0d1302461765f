mod bot;
mod config;
mod irc;
mod logging;

use crate::bot::commands::CommandHandler;
use crate::irc::error::ExitStatus;
use crate::irc::session::Session;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Optional config path as the only argument
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let cfg = match config::load_config(path.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(ExitStatus::BadConfig.code());
        }
    };
    if let Err(e) = logging::init(&cfg.logging) {
        eprintln!("Error: {:#}", e);
        std::process::exit(ExitStatus::BadConfig.code());
    }

    let handler = CommandHandler::new(cfg.commands.list_size_limit);
    let mut session = Session::new(cfg.session_config(), Box::new(handler));

    let outcome = tokio::select! {
        result = async {
            session.connect().await?;
            session.run().await
        } => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let status = match outcome {
        Some(Ok(())) => {
            info!("Session ended");
            ExitStatus::Ok
        }
        Some(Err(e)) => {
            error!("{}", e);
            e.exit_status()
        }
        None => {
            info!("Interrupted");
            ExitStatus::Interrupt
        }
    };
    session.quit().await;

    std::process::exit(status.code());
}
