use std::io::{self, Read, Write};
use thiserror::Error;

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Reserved(u8),
}

impl Opcode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x0f {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xa => Opcode::Pong,
            other => Opcode::Reserved(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xa,
            Opcode::Reserved(b) => b & 0x0f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("peer closed the connection")]
    Closed,
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: u64, max: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Unmasked single-fragment header. Returns the buffer and how much of it is used.
fn header(opcode: Opcode, len: usize) -> ([u8; 10], usize) {
    let mut hdr = [0u8; 10];
    hdr[0] = FIN | opcode.bits();
    if len < 126 {
        hdr[1] = len as u8;
        (hdr, 2)
    } else if len < 65_536 {
        hdr[1] = 126;
        hdr[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        (hdr, 4)
    } else {
        hdr[1] = 127;
        hdr[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        (hdr, 10)
    }
}

/// Writes one server frame; `write_all` keeps going on short writes.
pub fn write_frame<W: Write>(w: &mut W, opcode: Opcode, payload: &[u8]) -> io::Result<()> {
    let (hdr, used) = header(opcode, payload.len());
    w.write_all(&hdr[..used])?;
    w.write_all(payload)?;
    w.flush()
}

/// One little-endian `f32` per bar.
pub fn encode_bars(bars: &[f32]) -> Vec<u8> {
    bars.iter().flat_map(|b| b.to_le_bytes()).collect()
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::Closed,
        _ => FrameError::Io(e),
    })
}

/// Reads one frame, unmasking it if the mask bit is set.
pub fn read_frame<R: Read>(r: &mut R, max_payload: usize) -> Result<Frame, FrameError> {
    let mut hdr = [0u8; 2];
    read_exact(r, &mut hdr)?;
    let opcode = Opcode::from_bits(hdr[0]);
    let masked = hdr[1] & MASK != 0;

    let len = match hdr[1] & 0x7f {
        126 => {
            let mut ext = [0u8; 2];
            read_exact(r, &mut ext)?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            read_exact(r, &mut ext)?;
            u64::from_be_bytes(ext)
        }
        short => short as u64,
    };
    if len > max_payload as u64 {
        return Err(FrameError::TooLarge { len, max: max_payload });
    }

    let mut key = [0u8; 4];
    if masked {
        read_exact(r, &mut key)?;
    }

    let mut payload = vec![0u8; len as usize];
    read_exact(r, &mut payload)?;
    if masked {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Frame { opcode, payload })
}

/// What a browser sends: masked, FIN set.
#[cfg(test)]
pub(crate) fn client_frame(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Vec<u8> {
    let (hdr, used) = header(opcode, payload.len());
    let mut out = hdr[..used].to_vec();
    out[1] |= MASK;
    out.extend_from_slice(&key);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
    out
}
