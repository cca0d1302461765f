//! Connection lifecycle and the receive loop.
//!
//! `connect` opens the transport and identifies, `run` joins the channel and
//! dispatches inbound messages until the server ends the session, and `quit`
//! says goodbye. Content replies go through the paced [`OutboundQueue`];
//! protocol control messages are written straight away.

use crate::bot::handler::{self, HandlerContext, MessageHandler};
use crate::irc::codec;
use crate::irc::connection::{connect_transport, BoxedReader, BoxedWriter, LineReader, LineWriter};
use crate::irc::error::SessionError;
use crate::irc::message::ProtocolMessage;
use crate::irc::queue::{OutboundQueue, Pacing};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    /// Identified with the server but not (or no longer) on the channel.
    Connected,
    OnChannel,
    Terminated,
}

/// Everything the session needs to know about where and who it is.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub nickname: String,
    pub ident: String,
    pub realname: String,
    pub channel: String,
    pub timeout: Duration,
    pub quit_message: Option<String>,
    pub pacing: Pacing,
}

/// Whether the receive loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    reader: Option<LineReader>,
    writer: Option<Arc<LineWriter>>,
    queue: Arc<OutboundQueue>,
    sender: Option<JoinHandle<()>>,
    handler: Box<dyn MessageHandler>,
    context: HandlerContext,
}

impl Session {
    pub fn new(config: SessionConfig, handler: Box<dyn MessageHandler>) -> Self {
        let context = HandlerContext::new(&config.nickname, &config.channel, &config.realname);
        let queue = Arc::new(OutboundQueue::new(config.pacing));
        Self {
            config,
            state: ConnectionState::Disconnected,
            reader: None,
            writer: None,
            queue,
            sender: None,
            handler,
            context,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Session state changed");
            self.state = state;
        }
    }

    /// Open a TCP connection to the configured server and identify.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}:{}", self.config.host, self.config.port);

        let (reader, writer) =
            match connect_transport(&self.config.host, self.config.port, self.config.timeout).await {
                Ok(halves) => halves,
                Err(e) => {
                    error!("{}", e);
                    self.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
            };
        self.attach(reader, writer).await
    }

    /// Identify over an already open transport: optional `PASS`, then `NICK`
    /// and `USER`. Each of these is critical.
    pub async fn attach(&mut self, reader: BoxedReader, writer: BoxedWriter) -> Result<(), SessionError> {
        self.reader = Some(LineReader::new(reader));
        self.writer = Some(Arc::new(LineWriter::new(writer, self.config.timeout)));
        self.set_state(ConnectionState::Authenticating);

        if let Err(e) = self.identify().await {
            error!("Handshake with {} failed: {}", self.config.host, e);
            self.teardown().await;
            return Err(e);
        }

        self.set_state(ConnectionState::Connected);
        info!("Connected to {} as {}", self.config.host, self.config.nickname);
        Ok(())
    }

    async fn identify(&mut self) -> Result<(), SessionError> {
        let mut handshake = Vec::with_capacity(3);
        if let Some(password) = &self.config.password {
            handshake.push(ProtocolMessage::pass(password));
        }
        handshake.push(ProtocolMessage::nick(&self.config.nickname));
        handshake.push(ProtocolMessage::user(
            &self.config.ident,
            &self.config.host,
            &self.config.realname,
        ));
        for msg in &handshake {
            self.send_now(msg, true).await?;
        }
        Ok(())
    }

    /// Start the sender task, join the channel and process inbound messages
    /// until the server ends the session or the connection drops.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        if self.state != ConnectionState::Connected && self.state != ConnectionState::OnChannel {
            return Err(SessionError::NotConnected);
        }

        self.start_sender();
        let join = ProtocolMessage::join(&self.config.channel);
        let result = match self.send_now(&join, true).await {
            Ok(()) => self.receive_loop().await,
            Err(e) => Err(e),
        };
        self.teardown().await;
        result
    }

    /// Say goodbye (best effort) and release everything.
    pub async fn quit(&mut self) {
        let open = match &self.writer {
            Some(writer) => writer.is_open().await,
            None => false,
        };
        if open {
            info!("Quitting");
            let quit = ProtocolMessage::quit(self.config.quit_message.as_deref());
            if let Err(e) = self.send_now(&quit, false).await {
                warn!("Could not send QUIT: {}", e);
            }
        }
        self.teardown().await;
    }

    pub(crate) fn start_sender(&mut self) {
        if self.sender.is_some() {
            return;
        }
        if let Some(writer) = &self.writer {
            self.sender = Some(self.queue.spawn_sender(Arc::clone(writer)));
        }
    }

    async fn receive_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let reader = self.reader.as_mut().ok_or(SessionError::NotConnected)?;
            let Some(line) = reader.next_line().await? else {
                info!("Server closed the connection");
                return Ok(());
            };

            debug!("<< {}", line);
            let Some(msg) = codec::parse_line(&line) else {
                continue;
            };
            if self.dispatch(msg).await? == Flow::Stop {
                return Ok(());
            }
        }
    }

    /// React to one inbound message.
    pub(crate) async fn dispatch(&mut self, msg: ProtocolMessage) -> Result<Flow, SessionError> {
        if msg.is("PING") {
            self.send_now(&ProtocolMessage::pong(&msg), false).await?;
            return Ok(Flow::Continue);
        }

        if msg.is("KILL") || msg.is("ERROR") {
            info!(
                command = %msg.command,
                reason = msg.trailing().unwrap_or_default(),
                "Disconnected by server"
            );
            self.teardown().await;
            return Ok(Flow::Stop);
        }

        if msg.is("JOIN") && self.is_from_me(&msg) && self.is_my_channel(msg.arg(0)) {
            info!("Joined {}", self.config.channel);
            self.set_state(ConnectionState::OnChannel);
            return Ok(Flow::Continue);
        }

        if msg.is("KICK") && self.is_my_channel(msg.arg(0)) && self.is_me(msg.arg(1)) {
            warn!(
                by = msg.source_nick().unwrap_or_default(),
                reason = msg.arg(2).unwrap_or_default(),
                "Kicked from {}, rejoining",
                self.config.channel
            );
            self.set_state(ConnectionState::Connected);
            let join = ProtocolMessage::join(&self.config.channel);
            self.send_now(&join, false).await?;
            return Ok(Flow::Continue);
        }

        if self.state == ConnectionState::OnChannel {
            let replies = handler::invoke(self.handler.as_mut(), &msg, &self.context);
            self.route(replies).await?;
        }
        Ok(Flow::Continue)
    }

    /// Content replies are queued; everything else is written immediately.
    async fn route(&mut self, replies: Vec<ProtocolMessage>) -> Result<(), SessionError> {
        let mut content = Vec::new();
        for reply in replies {
            if reply.is_content() {
                content.push(reply);
            } else {
                self.send_now(&reply, false).await?;
            }
        }
        if !content.is_empty() {
            self.queue.enqueue(content).await;
        }
        Ok(())
    }

    async fn send_now(&mut self, msg: &ProtocolMessage, critical: bool) -> Result<(), SessionError> {
        let writer = self.writer.as_ref().ok_or(SessionError::NotConnected)?;
        writer.send(msg, critical).await
    }

    /// Stop the sender, flush the queue and close the transport.
    async fn teardown(&mut self) {
        self.queue.shutdown().await;
        if let Some(sender) = self.sender.take() {
            if let Err(e) = sender.await {
                warn!("Outbound sender task failed: {}", e);
            }
        }
        if let Some(writer) = self.writer.take() {
            writer.close().await;
        }
        self.reader = None;
        self.set_state(ConnectionState::Terminated);
    }

    fn is_me(&self, nick: Option<&str>) -> bool {
        nick.is_some_and(|nick| self.context.is_me(nick))
    }

    fn is_from_me(&self, msg: &ProtocolMessage) -> bool {
        self.is_me(msg.source_nick())
    }

    fn is_my_channel(&self, channel: Option<&str>) -> bool {
        channel.is_some_and(|channel| self.context.is_channel(channel))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::handler::{HandlerError, Reply};
    use crate::irc::error::ExitStatus;
    use tokio::io::{
        duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
        WriteHalf,
    };

    /// The far end of an in-memory connection.
    struct FakeServer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeServer {
        async fn expect(&mut self, line: &str) {
            let got = self.lines.next_line().await.unwrap();
            assert_eq!(got.as_deref(), Some(line));
        }

        async fn say(&mut self, raw: &str) {
            self.writer.write_all(raw.as_bytes()).await.unwrap();
        }

        async fn expect_closed(&mut self) {
            assert_eq!(self.lines.next_line().await.unwrap(), None);
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            host: "irc.test".into(),
            port: 6667,
            password: Some("secret".into()),
            nickname: "teamer".into(),
            ident: "bbconf-teamer".into(),
            realname: "BBConf Teamer Bot".into(),
            channel: "#bbconf".into(),
            timeout: Duration::from_secs(5),
            quit_message: None,
            pacing: Pacing::default(),
        }
    }

    /// Echoes channel text back (queued) and voices the speaker (immediate).
    /// `boom` returns an error and `panic` panics.
    fn echo_handler() -> Box<dyn MessageHandler> {
        Box::new(
            |msg: &ProtocolMessage, ctx: &HandlerContext| -> Result<Reply, HandlerError> {
                match msg.trailing() {
                    _ if !msg.is("PRIVMSG") => Ok(None),
                    Some("boom") => Err(HandlerError::Malformed {
                        command: msg.command.clone(),
                        reason: "boom".into(),
                    }),
                    Some("panic") => panic!("handler bug"),
                    Some(text) => Ok(Some(vec![
                        ProtocolMessage::privmsg(&ctx.channel, &format!("echo {}", text)),
                        ProtocolMessage::new(
                            "MODE",
                            [ctx.channel.as_str(), "+v", msg.source_nick().unwrap_or_default()],
                        ),
                    ])),
                    None => Ok(None),
                }
            },
        )
    }

    async fn attached(config: SessionConfig, capacity: usize) -> (Session, FakeServer) {
        let (client, server) = duplex(capacity);
        let (client_read, client_write) = split(client);
        let (server_read, server_write) = split(server);
        let mut fake = FakeServer {
            lines: BufReader::new(server_read).lines(),
            writer: server_write,
        };

        let mut session = Session::new(config, echo_handler());
        session
            .attach(Box::new(client_read), Box::new(client_write))
            .await
            .unwrap();
        fake.expect("PASS secret").await;
        fake.expect("NICK teamer").await;
        fake.expect("USER bbconf-teamer irc.test * :BBConf Teamer Bot").await;
        (session, fake)
    }

    #[tokio::test]
    async fn test_handshake_reaches_connected() {
        let (session, _server) = attached(config(), 4096).await;
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_handshake_without_password() {
        let (client, server) = duplex(4096);
        let (client_read, client_write) = split(client);
        let mut lines = BufReader::new(server).lines();

        let mut session = Session::new(SessionConfig { password: None, ..config() }, echo_handler());
        session
            .attach(Box::new(client_read), Box::new(client_write))
            .await
            .unwrap();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("NICK teamer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout_is_fatal() {
        // A tiny pipe nobody drains: the first critical write cannot finish.
        let (client, _server) = duplex(4);
        let (client_read, client_write) = split(client);
        let mut session = Session::new(config(), echo_handler());

        let err = session
            .attach(Box::new(client_read), Box::new(client_write))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CriticalTimeout { .. }));
        assert_eq!(session.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn test_run_requires_connection() {
        let mut session = Session::new(config(), echo_handler());
        assert!(matches!(session.run().await, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_kick_returns_to_connected_and_rejoins_once() {
        let (mut session, mut server) = attached(config(), 4096).await;

        let joined = codec::parse_line(":teamer!b@host JOIN #bbconf").unwrap();
        session.dispatch(joined.clone()).await.unwrap();
        assert_eq!(session.state(), ConnectionState::OnChannel);

        // Someone else being kicked is just channel traffic.
        let other = codec::parse_line(":op!o@host KICK #bbconf alice :spam").unwrap();
        session.dispatch(other).await.unwrap();
        assert_eq!(session.state(), ConnectionState::OnChannel);

        let kick = codec::parse_line(":op!o@host KICK #BBConf Teamer :bye").unwrap();
        assert_eq!(session.dispatch(kick).await.unwrap(), Flow::Continue);
        assert_eq!(session.state(), ConnectionState::Connected);
        server.expect("JOIN #bbconf").await;

        let ping = codec::parse_line("PING :irc.test").unwrap();
        session.dispatch(ping).await.unwrap();
        server.expect("PONG irc.test").await;

        session.dispatch(joined).await.unwrap();
        assert_eq!(session.state(), ConnectionState::OnChannel);
    }

    #[tokio::test]
    async fn test_join_by_someone_else_keeps_state() {
        let (mut session, _server) = attached(config(), 4096).await;
        let join = codec::parse_line(":alice!a@host JOIN #bbconf").unwrap();
        session.dispatch(join).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_dispatches_until_killed() {
        let (mut session, mut server) = attached(config(), 4096).await;
        let running = tokio::spawn(async move {
            let result = session.run().await;
            (session, result)
        });

        server.expect("JOIN #bbconf").await;

        server.say("PING :irc.test\r\n").await;
        server.expect("PONG irc.test").await;

        // Not on the channel yet: nobody answers this one.
        server.say(":alice!a@h PRIVMSG #bbconf :too early\r\n").await;
        server.say(":teamer!b@h JOIN #bbconf\r\n").await;

        // A failing handler does not stop the loop; the next line still works.
        server
            .say(":alice!a@h PRIVMSG #bbconf :boom\r\n:alice!a@h PRIVMSG #bbconf :panic\r\n:alice!a@h PRIVMSG #bbconf :hi\r\n")
            .await;
        server.expect("MODE #bbconf +v alice").await;
        server.expect("PRIVMSG #bbconf :echo hi").await;

        server.say(":op!o@h KICK #bbconf teamer :bye\r\n").await;
        server.expect("JOIN #bbconf").await;
        server.say(":alice!a@h PRIVMSG #bbconf :ignored\r\n").await;
        server.say(":teamer!b@h JOIN #bbconf\r\n").await;
        server.say(":alice!a@h PRIVMSG #bbconf :back\r\n").await;
        server.expect("MODE #bbconf +v alice").await;
        server.expect("PRIVMSG #bbconf :echo back").await;

        server.say("KILL teamer :Killed (nope)\r\n").await;
        let (session, result) = running.await.unwrap();
        result.unwrap();
        assert_eq!(session.state(), ConnectionState::Terminated);
        server.expect_closed().await;
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_failure() {
        // Grab a free port, then close it so nothing is listening there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = SessionConfig {
            host: "127.0.0.1".into(),
            port,
            ..config()
        };
        let mut session = Session::new(config, echo_handler());
        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }), "{}", err);
        assert_eq!(err.exit_status(), ExitStatus::ConnectionFailure);
        assert_eq!(err.exit_status().code(), 11);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_ends_on_eof() {
        let (mut session, server) = attached(config(), 4096).await;
        let FakeServer {
            mut lines,
            mut writer,
        } = server;
        writer.shutdown().await.unwrap();

        // The JOIN still goes out; then the closed read side ends the loop.
        let running = tokio::spawn(async move {
            let result = session.run().await;
            (session, result)
        });
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("JOIN #bbconf"));

        let (session, result) = running.await.unwrap();
        result.unwrap();
        assert_eq!(session.state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn test_quit_sends_notice_and_terminates() {
        let config = SessionConfig {
            quit_message: Some("see you all".into()),
            ..config()
        };
        let (mut session, mut server) = attached(config, 4096).await;
        session.quit().await;
        server.expect("QUIT :see you all").await;
        server.expect_closed().await;
        assert_eq!(session.state(), ConnectionState::Terminated);

        // A second quit has nothing left to close.
        session.quit().await;
        assert_eq!(session.state(), ConnectionState::Terminated);
    }
}
