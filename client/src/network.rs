//! Client-side connection handling and the interactive loop
//!
//! The client is a passive terminal front-end: it frames stdin commands
//! with the protocol tag byte, writes them to the server, and prints what
//! comes back. Replies to its own commands arrive tagged; messages relayed
//! from other users arrive untagged, so the loop keeps an awaiting-reply
//! flag and only interprets a leading digit as a tag while a reply is
//! outstanding. The server-exit notification (tag `4`) is always honored.

use std::io;

use log::debug;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use parley_shared::frame::{self, FrameError, FrameReader};
use parley_shared::protocol::{validate_name, HandshakeStatus, Request, Tag, LOGOUT_ACK};

/// A connected client session
pub struct Client {
    frames: FrameReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    /// Connects and performs the raw-byte handshake: the proposed name goes
    /// out as one frame, the verdict comes back as a single unframed byte.
    ///
    /// Prints the user-facing handshake outcome. Returns `Ok(None)` when
    /// the server refused the name.
    pub async fn connect(name: &str, address: &str, port: u16) -> io::Result<Option<Self>> {
        let stream = TcpStream::connect((address, port)).await?;
        let (read_half, mut writer) = stream.into_split();
        let mut frames = FrameReader::new(read_half);

        frame::write_frame(&mut writer, name.as_bytes()).await?;
        let status = match frames.read_byte().await {
            Ok(byte) => HandshakeStatus::from_byte(byte),
            Err(FrameError::Io(e)) => return Err(e),
            Err(_) => None,
        };

        match status {
            Some(HandshakeStatus::Accepted) => {
                println!("Connected Successfully.");
                Ok(Some(Client { frames, writer }))
            }
            Some(HandshakeStatus::NameTaken) => {
                println!("Client name is already in use.");
                Ok(None)
            }
            _ => {
                println!("Failed to connect the server");
                Ok(None)
            }
        }
    }

    /// The interactive loop: stdin commands out, server frames in.
    /// Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let mut console = BufReader::new(tokio::io::stdin()).lines();
        let mut console_open = true;
        let mut awaiting_reply = false;

        loop {
            tokio::select! {
                line = console.next_line(), if console_open => match line {
                    Ok(Some(line)) => {
                        match self.handle_input(&line, &mut awaiting_reply).await {
                            Ok(Some(code)) => return code,
                            Ok(None) => {}
                            Err(e) => {
                                eprintln!("ERROR: write {}.", e);
                                return 1;
                            }
                        }
                    }
                    Ok(None) => console_open = false,
                    Err(e) => {
                        eprintln!("ERROR: read {}.", e);
                        console_open = false;
                    }
                },

                payload = self.frames.read_frame() => match payload {
                    Ok(payload) => {
                        if let Some(code) = handle_server_frame(&payload, &mut awaiting_reply) {
                            return code;
                        }
                    }
                    Err(FrameError::Io(e)) => {
                        eprintln!("ERROR: read {}.", e);
                        return 1;
                    }
                    Err(_) => {
                        debug!("server closed the stream");
                        return 1;
                    }
                },
            }
        }
    }

    /// Handles one stdin line. Returns an exit code when the session ends.
    async fn handle_input(
        &mut self,
        line: &str,
        awaiting_reply: &mut bool,
    ) -> io::Result<Option<i32>> {
        let request = match parse_command(line) {
            Some(request) => request,
            None => {
                println!("ERROR: Invalid input.");
                return Ok(None);
            }
        };

        frame::write_frame(&mut self.writer, &request.encode()).await?;

        if request == Request::Exit {
            // The logout verdict is a single raw byte, not a frame.
            return match self.frames.read_byte().await {
                Ok(byte) if byte == LOGOUT_ACK => {
                    println!("Unregistered successfully.");
                    Ok(Some(0))
                }
                _ => Ok(Some(1)),
            };
        }

        *awaiting_reply = true;
        Ok(None)
    }
}

/// Handles one server frame. Returns an exit code when the server is gone.
fn handle_server_frame(payload: &[u8], awaiting_reply: &mut bool) -> Option<i32> {
    if payload.len() == 1 && payload[0] == Tag::ServerExit.byte() {
        debug!("server exit notification");
        return Some(1);
    }

    if *awaiting_reply {
        if let Some((&tag, body)) = payload.split_first() {
            if Tag::from_byte(tag).is_some() {
                println!("{}", String::from_utf8_lossy(body));
                *awaiting_reply = false;
                return None;
            }
        }
    }

    // Untagged: a message relayed from another user, printed verbatim.
    println!("{}", String::from_utf8_lossy(payload));
    None
}

/// Parses one stdin line into a request.
///
/// Grammar (whole line, case-sensitive):
/// `exit` | `who` | `send <dest> <text>` |
/// `create_group <group> <member>[,<member>]*`
pub fn parse_command(line: &str) -> Option<Request> {
    if line == "exit" {
        return Some(Request::Exit);
    }
    if line == "who" {
        return Some(Request::Who);
    }

    if let Some(rest) = line.strip_prefix("send ") {
        let (to, text) = rest.split_once(' ')?;
        if !validate_name(to) {
            return None;
        }
        return Some(Request::Send {
            to: to.to_owned(),
            text: text.as_bytes().to_vec(),
        });
    }

    if let Some(rest) = line.strip_prefix("create_group ") {
        let (group, list) = rest.split_once(' ')?;
        if !validate_name(group) {
            return None;
        }
        let members: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_owned)
            .collect();
        if members.is_empty() || !members.iter().all(|member| validate_name(member)) {
            return None;
        }
        return Some(Request::CreateGroup {
            group: group.to_owned(),
            members,
        });
    }

    None
}
