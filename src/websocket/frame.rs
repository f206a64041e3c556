#![warn(missing_docs)]

//! RFC 6455 frame codec for the server side of an upgraded connection.
//! Client-to-server frames must be masked; server-to-client frames are
//! written unmasked. Control frames must fit in a single unfragmented frame
//! of at most 125 payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 1000: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// 1001: endpoint going away (used for ping timeouts and shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// 1002: protocol error (unmasked client frame, bad opcode, reserved bits).
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// 1007: payload is not valid for the frame type (non-UTF-8 text).
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
/// 1009: message too big.
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub(crate) fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) fin: bool,
    pub(crate) opcode: Opcode,
    pub(crate) payload: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum FrameError {
    /// The underlying stream failed or closed mid-frame.
    Io(std::io::Error),
    /// A violation that warrants close code 1002.
    Protocol(&'static str),
    /// The frame exceeded the configured maximum (close code 1009).
    TooLarge,
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err)
    }
}

/// Reads and unmasks one client frame.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Frame, FrameError> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;

    let fin = head[0] & 0x80 != 0;
    if head[0] & 0x70 != 0 {
        return Err(FrameError::Protocol("reserved bits set"));
    }
    let opcode =
        Opcode::from_bits(head[0] & 0x0F).ok_or(FrameError::Protocol("unknown opcode"))?;

    let masked = head[1] & 0x80 != 0;
    if !masked {
        return Err(FrameError::Protocol("client frame is not masked"));
    }

    let short_len = (head[1] & 0x7F) as u64;
    if opcode.is_control() && (!fin || short_len > 125) {
        return Err(FrameError::Protocol("fragmented or oversized control frame"));
    }

    let len = match short_len {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await?;
            u16::from_be_bytes(ext) as u64
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await?;
            u64::from_be_bytes(ext)
        }
        n => n,
    };

    if len > max_payload as u64 {
        return Err(FrameError::TooLarge);
    }

    let mut mask = [0u8; 4];
    reader.read_exact(&mut mask).await?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }

    Ok(Frame {
        fin,
        opcode,
        payload,
    })
}

/// Writes one unmasked server frame with FIN set.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    opcode: Opcode,
    payload: &[u8],
) -> std::io::Result<()> {
    let mut header = Vec::with_capacity(10);
    header.push(0x80 | opcode.bits());

    match payload.len() {
        n if n <= 125 => header.push(n as u8),
        n if n <= u16::MAX as usize => {
            header.push(126);
            header.extend_from_slice(&(n as u16).to_be_bytes());
        }
        n => {
            header.push(127);
            header.extend_from_slice(&(n as u64).to_be_bytes());
        }
    }

    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Builds a close frame payload: a big-endian code followed by a UTF-8 reason.
pub(crate) fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    // Control frames cap at 125 payload bytes.
    payload.extend_from_slice(&reason.as_bytes()[..reason.len().min(123)]);
    payload
}

/// Parses a close frame payload into a code and reason. An empty payload
/// means a normal closure with no reason.
pub(crate) fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (CLOSE_NORMAL, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (code, reason)
}
