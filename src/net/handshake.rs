use base64::Engine;
use sha1::{Digest, Sha1};
use std::io::{self, Read, Write};
use thiserror::Error;

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_REQUEST: usize = 8192;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("upgrade request has no Sec-WebSocket-Key header")]
    MissingKey,
    #[error("upgrade request is not valid UTF-8")]
    Encoding,
    #[error("upgrade request is too large")]
    TooLarge,
    #[error("connection closed during handshake")]
    Closed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// `base64(SHA1(key + GUID))`, the value of `Sec-WebSocket-Accept`.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Value of the `Sec-WebSocket-Key` header. Header names are case-insensitive.
pub fn extract_key(request: &str) -> Option<&str> {
    request.lines().skip(1).find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("sec-websocket-key") {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    })
}

/// Header block up to the blank line, plus whatever arrived after it.
fn read_request<R: Read>(stream: &mut R) -> Result<(String, Vec<u8>), HandshakeError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let end = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(HandshakeError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > MAX_REQUEST {
            return Err(HandshakeError::TooLarge);
        }
    };
    let rest = buf.split_off(end);
    let head = String::from_utf8(buf).map_err(|_| HandshakeError::Encoding)?;
    Ok((head, rest))
}

fn response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Reads the client's upgrade request and answers with `101 Switching Protocols`.
///
/// Returns bytes the client sent past the request; they start the frame stream.
pub fn perform<S: Read + Write>(stream: &mut S) -> Result<Vec<u8>, HandshakeError> {
    let (request, rest) = read_request(stream)?;
    let key = extract_key(&request).ok_or(HandshakeError::MissingKey)?;
    stream.write_all(response(&accept_key(key)).as_bytes())?;
    stream.flush()?;
    Ok(rest)
}
