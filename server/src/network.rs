//! Connection acceptance, event dispatch, and command handling
//!
//! All mutable server state lives in one [`Server`] value driven by a
//! single task: the name registry, the group directory, the session
//! manager, and the listener. Per-session reader tasks are pure readiness
//! adapters: they decode nothing and own no shared state, they only
//! forward framed payloads (or the stream's end) into the loop's channel.
//! Every registry mutation, every fan-out write, and every lifecycle
//! transition happens on the loop task, so no locking is needed anywhere.
//!
//! Each loop iteration services one event, polled in a fixed priority
//! order: operator console first, listener second, client traffic last.
//!
//! Two kinds of output leave this module. Operator-contract lines (client
//! lifecycle announcements, command logs, the shutdown line) go through
//! [`OperatorLog`] to stdout verbatim, since they are part of the observable
//! interface; integration tests swap in a capture channel via
//! [`Server::capture_operator_log`] and assert on them byte-for-byte.
//! Diagnostics go through `log` and are controlled by `RUST_LOG`.

use std::io::{self, Write as _};
use std::net::SocketAddr;

use log::{debug, error, info, warn};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_shared::frame::{self, FrameError, FrameReader};
use parley_shared::protocol::{
    self, HandshakeStatus, ProtocolError, Request, Tag, LOGOUT_ACK,
};

use crate::groups::{member_roster, Group, GroupDirectory, MIN_GROUP_MEMBERS};
use crate::registry::{EntityKind, NameRegistry, RegistryError};
use crate::session::{ClientSession, SessionManager};

/// The only recognized operator command.
const EXIT_COMMAND: &str = "EXIT";

/// Final operator line, emitted without a trailing newline.
const SHUTDOWN_MSG: &str = "EXIT command is typed: server is shutting down";

const SEND_OK_MSG: &str = "Sent successfully.";
const SEND_ERR_MSG: &str = "ERROR: failed to send.";

/// Destination of the operator-contract output
///
/// Production servers print to the process stdout. Integration tests
/// install a capture channel instead, so the announced lines can be
/// asserted byte-for-byte, including the unterminated shutdown message.
enum OperatorLog {
    Stdout,
    Capture(mpsc::UnboundedSender<Vec<u8>>),
}

impl OperatorLog {
    /// Writes one terminated operator line.
    fn line(&mut self, line: &str) {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write(&bytes);
    }

    /// Writes raw text with no terminator (the final shutdown message).
    fn raw(&mut self, text: &str) {
        self.write(text.as_bytes());
    }

    fn write(&mut self, bytes: &[u8]) {
        match self {
            OperatorLog::Stdout => {
                let mut out = io::stdout();
                let _ = out.write_all(bytes);
                let _ = out.flush();
            }
            OperatorLog::Capture(tx) => {
                let _ = tx.send(bytes.to_vec());
            }
        }
    }
}

/// Events funneled from session reader tasks into the main loop
#[derive(Debug)]
enum SessionEvent {
    /// One framed payload arrived from a client.
    Frame {
        session: u64,
        name: String,
        payload: Vec<u8>,
    },
    /// The client's stream ended, cleanly or not.
    Closed {
        session: u64,
        name: String,
        reason: FrameError,
    },
}

/// The whole server: listener, registries, sessions, and the event funnel
pub struct Server {
    listener: TcpListener,
    registry: NameRegistry,
    groups: GroupDirectory,
    sessions: SessionManager,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    next_session_id: u64,
    operator_log: OperatorLog,
}

impl Server {
    /// Binds the listener and assembles an empty server.
    pub async fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        info!("listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Server {
            listener,
            registry: NameRegistry::new(),
            groups: GroupDirectory::new(),
            sessions: SessionManager::new(),
            events_tx,
            events_rx,
            next_session_id: 0,
            operator_log: OperatorLog::Stdout,
        })
    }

    /// The bound address, for callers that asked for an ephemeral port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Redirects the operator-contract output away from stdout and returns
    /// the receiving end. Each received chunk is exactly what stdout would
    /// have been given. Integration tests assert on these.
    pub fn capture_operator_log(&mut self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.operator_log = OperatorLog::Capture(tx);
        rx
    }

    /// Runs the event loop with the process's stdin as the operator console.
    /// Returns `Ok(())` after an orderly `EXIT` shutdown.
    pub async fn run(&mut self) -> io::Result<()> {
        let console = BufReader::new(tokio::io::stdin()).lines();
        self.run_with_console(console).await
    }

    /// Runs the event loop against an arbitrary operator line source.
    pub async fn run_with_console<R>(&mut self, mut console: Lines<R>) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut console_open = true;
        loop {
            tokio::select! {
                biased;

                line = console.next_line(), if console_open => match line {
                    Ok(Some(line)) => {
                        if self.handle_operator_line(&line).await {
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        debug!("operator console closed");
                        console_open = false;
                    }
                    Err(e) => {
                        error!("operator console read failed: {}", e);
                        console_open = false;
                    }
                },

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.handle_join(stream, addr).await,
                    Err(e) => error!("accept failed: {}", e),
                },

                event = self.events_rx.recv() => {
                    // recv cannot yield None: the server holds a sender.
                    if let Some(event) = event {
                        self.handle_session_event(event).await;
                    }
                }
            }
        }
    }

    /// Returns true when the server should shut down.
    async fn handle_operator_line(&mut self, line: &str) -> bool {
        if line != EXIT_COMMAND {
            debug!("ignoring operator input {:?}", line);
            return false;
        }

        self.shutdown().await;
        self.operator_log.raw(SHUTDOWN_MSG);
        true
    }

    /// Notifies every client with a server-exit frame, then closes every
    /// stream. The listener closes when the server value is dropped.
    async fn shutdown(&mut self) {
        let notice = protocol::tagged(Tag::ServerExit, "");
        for (name, mut session) in self.sessions.drain() {
            if let Err(e) = frame::write_frame(&mut session.writer, &notice).await {
                debug!("server-exit notice to {} failed: {}", name, e);
            }
            session.reader.abort();
        }
        self.groups.clear();
        self.registry.clear();
    }

    /// Performs one join handshake, inline on the loop task: read the
    /// proposed name as a frame, answer with a single raw status byte, and
    /// only on acceptance promote the stream to a session.
    async fn handle_join(&mut self, stream: TcpStream, addr: SocketAddr) {
        debug!("new connection from {}", addr);
        let (read_half, mut writer) = stream.into_split();
        let mut frames = FrameReader::new(read_half);

        let proposed = match frames.read_frame().await {
            Ok(payload) => payload,
            Err(e) => {
                // No name was read; close silently.
                debug!("handshake aborted by {}: {}", addr, e);
                return;
            }
        };
        let name = String::from_utf8_lossy(&proposed).into_owned();

        let status = match std::str::from_utf8(&proposed) {
            Ok(proposed) => match self.registry.reserve(proposed, EntityKind::Client) {
                Ok(()) => HandshakeStatus::Accepted,
                Err(RegistryError::InUse) => HandshakeStatus::NameTaken,
                Err(RegistryError::InvalidName) => HandshakeStatus::Rejected,
            },
            Err(_) => HandshakeStatus::Rejected,
        };

        if let Err(e) = frame::write_byte(&mut writer, status.byte()).await {
            debug!("handshake status write to {} failed: {}", addr, e);
            if status == HandshakeStatus::Accepted {
                self.registry.release(&name);
            }
            self.operator_log.line(&format!("{} failed to connect.", name));
            return;
        }

        if status != HandshakeStatus::Accepted {
            self.operator_log.line(&format!("{} failed to connect.", name));
            return;
        }

        let id = self.next_session_id;
        self.next_session_id += 1;
        let reader = self.spawn_session_reader(id, name.clone(), frames);
        self.sessions
            .insert(name.clone(), ClientSession { id, writer, reader });
        self.operator_log.line(&format!("{} connected.", name));
    }

    /// Spawns the readiness adapter for one session. It reuses the
    /// handshake frame reader, so bytes the client pipelined behind its
    /// name are not lost.
    fn spawn_session_reader(
        &self,
        session: u64,
        name: String,
        mut frames: FrameReader<OwnedReadHalf>,
    ) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                match frames.read_frame().await {
                    Ok(payload) => {
                        let event = SessionEvent::Frame {
                            session,
                            name: name.clone(),
                            payload,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(reason) => {
                        let _ = events.send(SessionEvent::Closed {
                            session,
                            name,
                            reason,
                        });
                        break;
                    }
                }
            }
        })
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Frame {
                session,
                name,
                payload,
            } => {
                if !self.sessions.is_current(&name, session) {
                    debug!("dropping frame from stale session of {}", name);
                    return;
                }
                match Request::decode(&payload) {
                    Ok(request) => self.handle_request(&name, request).await,
                    Err(error) => self.handle_protocol_error(&name, error).await,
                }
            }
            SessionEvent::Closed {
                session,
                name,
                reason,
            } => {
                if self.sessions.is_current(&name, session) {
                    self.dirty_leave(&name, reason).await;
                }
            }
        }
    }

    async fn handle_request(&mut self, sender: &str, request: Request) {
        match request {
            Request::CreateGroup { group, members } => {
                self.handle_create_group(sender, &group, &members).await
            }
            Request::Send { to, text } => self.handle_send(sender, &to, &text).await,
            Request::Who => self.handle_who(sender).await,
            Request::Exit => self.clean_leave(sender).await,
        }
    }

    /// A protocol error is fatal for the offending frame only: answer with
    /// the closest matching negative response and keep the session alive.
    async fn handle_protocol_error(&mut self, sender: &str, error: ProtocolError) {
        match error {
            ProtocolError::MalformedSend => {
                self.reply(sender, Tag::Send, SEND_ERR_MSG).await;
            }
            ProtocolError::MalformedCreateGroup { group } => {
                let reply = format!("ERROR: failed to create group \"{}\".", group);
                self.operator_log.line(&reply);
                self.reply(sender, Tag::CreateGroup, &reply).await;
            }
            ProtocolError::Empty
            | ProtocolError::UnknownTag(_)
            | ProtocolError::Unexpected(_) => {
                warn!("{}: unintelligible frame ignored: {}", sender, error);
            }
        }
    }

    async fn handle_create_group(&mut self, creator: &str, group: &str, requested: &[String]) {
        let reply = if self.try_create_group(creator, group, requested) {
            format!("Group \"{}\" was created successfully.", group)
        } else {
            format!("ERROR: failed to create group \"{}\".", group)
        };
        self.operator_log.line(&reply);
        self.reply(creator, Tag::CreateGroup, &reply).await;
    }

    fn try_create_group(&mut self, creator: &str, group: &str, requested: &[String]) -> bool {
        // Every requested member must be an online client; a group name in
        // the list fails the whole request.
        let all_online = requested
            .iter()
            .all(|member| self.registry.lookup(member) == Some(EntityKind::Client));
        if !all_online {
            return false;
        }

        let roster = member_roster(creator, requested);
        if roster.len() < MIN_GROUP_MEMBERS {
            return false;
        }

        if self.registry.reserve(group, EntityKind::Group).is_err() {
            return false;
        }
        self.groups.insert(Group::new(group.to_owned(), roster));
        info!("group {} created by {}", group, creator);
        true
    }

    async fn handle_send(&mut self, sender: &str, to: &str, text: &[u8]) {
        let delivered = if to == sender {
            false
        } else {
            match self.registry.lookup(to) {
                Some(EntityKind::Client) => self.relay_to_client(sender, to, text).await,
                Some(EntityKind::Group) => self.relay_to_group(sender, to, text).await,
                None => false,
            }
        };

        if delivered {
            self.operator_log.line(&format!(
                "{}: \"{}\" was sent successfully to {}.",
                sender,
                String::from_utf8_lossy(text),
                to
            ));
            self.reply(sender, Tag::Send, SEND_OK_MSG).await;
        } else {
            self.reply(sender, Tag::Send, SEND_ERR_MSG).await;
        }
    }

    async fn relay_to_client(&mut self, sender: &str, to: &str, text: &[u8]) -> bool {
        let payload = protocol::relay_frame(sender, text);
        let result = match self.sessions.writer_mut(to) {
            Some(writer) => frame::write_frame(writer, &payload).await,
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                // A failed delivery is the recipient's stream failing.
                self.dirty_leave(to, FrameError::Io(e)).await;
                false
            }
        }
    }

    /// Fans one message out to every group member except the sender, in the
    /// group's insertion order.
    async fn relay_to_group(&mut self, sender: &str, to: &str, text: &[u8]) -> bool {
        if !self.groups.is_member(to, sender) {
            return false;
        }

        let recipients: Vec<String> = self
            .groups
            .members(to)
            .unwrap_or_default()
            .iter()
            .filter(|member| member.as_str() != sender)
            .cloned()
            .collect();

        let payload = protocol::relay_frame(sender, text);
        let mut failed = Vec::new();
        for recipient in &recipients {
            let result = match self.sessions.writer_mut(recipient) {
                Some(writer) => frame::write_frame(writer, &payload).await,
                None => continue,
            };
            if let Err(e) = result {
                failed.push((recipient.clone(), e));
            }
        }
        for (recipient, e) in failed {
            self.dirty_leave(&recipient, FrameError::Io(e)).await;
        }
        true
    }

    async fn handle_who(&mut self, sender: &str) {
        let roster = who_roster(&self.sessions.names_sorted());

        self.operator_log
            .line(&format!("{}: Requests the currently connected client names.", sender));
        self.reply(sender, Tag::Who, &roster).await;
    }

    /// Tag-3 logout: purge, release, detach, ack with the raw byte, close.
    async fn clean_leave(&mut self, name: &str) {
        self.purge_memberships(name);
        self.registry.release(name);
        if let Some(mut session) = self.sessions.remove(name) {
            session.reader.abort();
            if let Err(e) = frame::write_byte(&mut session.writer, LOGOUT_ACK).await {
                debug!("logout ack to {} failed: {}", name, e);
            }
        }
        self.operator_log
            .line(&format!("{}: Unregistered successfully.", name));
    }

    /// Stream failure or EOF: same cleanup as a clean leave, no ack.
    async fn dirty_leave(&mut self, name: &str, reason: FrameError) {
        self.purge_memberships(name);
        self.registry.release(name);
        if let Some(session) = self.sessions.remove(name) {
            session.reader.abort();
        }
        warn!("{}: session ended abnormally: {}", name, reason);
        self.operator_log
            .line(&format!("{}: Unregistered after connection error.", name));
    }

    fn purge_memberships(&mut self, name: &str) {
        for dissolved in self.groups.purge_client(name) {
            info!("group {} dissolved", dissolved);
            self.registry.release(&dissolved);
        }
    }

    /// Writes one tagged response frame. A write failure is the client's
    /// stream failing and turns into a dirty leave.
    async fn reply(&mut self, name: &str, tag: Tag, body: &str) {
        let payload = protocol::tagged(tag, body);
        let result = match self.sessions.writer_mut(name) {
            Some(writer) => frame::write_frame(writer, &payload).await,
            None => return,
        };
        if let Err(e) = result {
            self.dirty_leave(name, FrameError::Io(e)).await;
        }
    }
}

/// Formats the who response body: sorted names, comma-joined, closed by `.`.
fn who_roster(names: &[String]) -> String {
    let mut roster = names.join(",");
    roster.push('.');
    roster
}
