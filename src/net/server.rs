use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::net::frame::{self, FrameError, Opcode};
use crate::net::handshake;
use crate::protocol::MAX_COMMAND_PAYLOAD;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Bounds how long a half-sent client frame can stall the loop.
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);
/// Frames read per `poll`, so a chatty client cannot hold up capture.
const MAX_FRAMES_PER_POLL: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Listening,
    Handshaking,
    Connected,
}

/// Single-client WebSocket endpoint driven by `poll`.
///
/// Text frames from the client are forwarded untouched to the command queue;
/// the caller drains it between polls.
pub struct WsServer {
    listener: TcpListener,
    client: Option<TcpStream>,
    /// Client bytes that arrived together with the upgrade request.
    pending: Vec<u8>,
    state: ConnectionState,
    commands: Sender<String>,
}

impl WsServer {
    pub fn bind(addr: &str, port: u16, commands: Sender<String>) -> io::Result<Self> {
        // std sets SO_REUSEADDR on Unix listeners.
        let listener = TcpListener::bind((addr, port))?;
        listener.set_nonblocking(true)?;
        log::info!("listening on ws://{}", listener.local_addr()?);
        Ok(Self {
            listener,
            client: None,
            pending: Vec::new(),
            state: ConnectionState::Listening,
            commands,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_client(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Accepts a pending client, or reads whatever the current one sent.
    /// Never waits for data that has not arrived.
    pub fn poll(&mut self) {
        if self.client.is_some() {
            self.poll_incoming();
        } else {
            self.poll_accept();
        }
    }

    fn poll_accept(&mut self) {
        let (mut stream, peer) = match self.listener.accept() {
            Ok(pair) => pair,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return,
            Err(e) => {
                log::warn!("accept failed: {e}");
                return;
            }
        };

        self.state = ConnectionState::Handshaking;
        let result = configure(&stream)
            .map_err(handshake::HandshakeError::from)
            .and_then(|()| handshake::perform(&mut stream));
        match result {
            Ok(rest) => {
                self.pending = rest;
                if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                    log::warn!("client {peer}: {e}");
                }
                log::info!("client connected: {peer}");
                self.client = Some(stream);
                self.state = ConnectionState::Connected;
            }
            Err(e) => {
                log::info!("handshake with {peer} failed: {e}");
                let _ = stream.shutdown(Shutdown::Both);
                self.state = ConnectionState::Listening;
            }
        }
    }

    fn poll_incoming(&mut self) {
        for _ in 0..MAX_FRAMES_PER_POLL {
            let Some(stream) = self.client.as_mut() else {
                return;
            };
            if self.pending.is_empty() {
                match data_available(stream) {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        self.disconnect(&format!("connection lost: {e}"));
                        return;
                    }
                }
            }

            let mut head: &[u8] = &self.pending;
            let read = frame::read_frame(&mut (&mut head).chain(&mut *stream), MAX_COMMAND_PAYLOAD);
            let consumed = self.pending.len() - head.len();
            self.pending.drain(..consumed);

            let frame = match read {
                Ok(frame) => frame,
                Err(FrameError::Closed) => {
                    self.disconnect("closed by peer");
                    return;
                }
                Err(e) => {
                    self.disconnect(&e.to_string());
                    return;
                }
            };

            match frame.opcode {
                Opcode::Text => match String::from_utf8(frame.payload) {
                    Ok(text) => {
                        log::debug!("command: {text}");
                        let _ = self.commands.send(text);
                    }
                    Err(_) => {
                        self.disconnect("text frame is not UTF-8");
                        return;
                    }
                },
                Opcode::Close => {
                    let _ = frame::write_frame(stream, Opcode::Close, &[]);
                    self.disconnect("close frame");
                    return;
                }
                other => log::debug!("ignoring {other:?} frame"),
            }
        }
    }

    pub fn send_binary(&mut self, payload: &[u8]) -> bool {
        self.send(Opcode::Binary, payload)
    }

    pub fn send_text(&mut self, text: &str) -> bool {
        self.send(Opcode::Text, text.as_bytes())
    }

    fn send(&mut self, opcode: Opcode, payload: &[u8]) -> bool {
        let Some(stream) = self.client.as_mut() else {
            return false;
        };
        match frame::write_frame(stream, opcode, payload) {
            Ok(()) => true,
            Err(e) => {
                self.disconnect(&format!("write failed: {e}"));
                false
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if let Some(stream) = self.client.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::info!("client disconnected ({reason})");
        }
        self.pending.clear();
        self.state = ConnectionState::Listening;
    }
}

/// Accepted sockets inherit the listener's non-blocking flag; frames must be
/// written whole, so switch back to blocking with timeouts.
fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    Ok(())
}

/// Non-blocking probe. `Ok(true)` also covers an orderly shutdown by the
/// peer, which the following read reports as closed.
fn data_available(stream: &TcpStream) -> io::Result<bool> {
    stream.set_nonblocking(true)?;
    let mut probe = [0u8; 1];
    let res = stream.peek(&mut probe);
    stream.set_nonblocking(false)?;
    match res {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}
