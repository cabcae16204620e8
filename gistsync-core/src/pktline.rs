//! pkt-line framing used by the Git wire protocol
//!
//! Each packet is a four hex digit length (including the prefix itself)
//! followed by the payload. `0000` is a flush packet.

/// Largest payload a single packet may carry
pub const MAX_PKT_DATA: usize = 65516;

const SIDEBAND_DATA: u8 = 1;
const SIDEBAND_PROGRESS: u8 = 2;
const SIDEBAND_ERROR: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PktLineError {
    #[error("Truncated packet at offset {0}")]
    Truncated(usize),

    #[error("Invalid packet length {0:?}")]
    InvalidLength(String),

    #[error("Packet payload of {0} bytes exceeds the protocol limit")]
    TooLong(usize),

    #[error("Unknown side-band channel {0}")]
    UnknownBand(u8),
}

/// One decoded packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Flush,
    Delim,
    ResponseEnd,
    Data(&'a [u8]),
}

impl<'a> Packet<'a> {
    /// Payload as text with the trailing newline removed
    pub fn as_text(&self) -> Option<&'a str> {
        match *self {
            Packet::Data(data) => std::str::from_utf8(data)
                .ok()
                .map(|s| s.strip_suffix('\n').unwrap_or(s)),
            _ => None,
        }
    }
}

/// Accumulates packets into a request body
#[derive(Debug, Default)]
pub struct PktWriter {
    buf: Vec<u8>,
}

impl PktWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&mut self, payload: &[u8]) -> Result<&mut Self, PktLineError> {
        if payload.len() > MAX_PKT_DATA {
            return Err(PktLineError::TooLong(payload.len()));
        }
        self.buf
            .extend_from_slice(format!("{:04x}", payload.len() + 4).as_bytes());
        self.buf.extend_from_slice(payload);
        Ok(self)
    }

    /// Text packet, newline-terminated
    pub fn line(&mut self, text: &str) -> Result<&mut Self, PktLineError> {
        if text.ends_with('\n') {
            self.data(text.as_bytes())
        } else {
            self.data(format!("{}\n", text).as_bytes())
        }
    }

    pub fn flush(&mut self) -> &mut Self {
        self.buf.extend_from_slice(b"0000");
        self
    }

    /// Append bytes verbatim (e.g. a pack after the command list)
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Sequential packet reader over a response body
#[derive(Debug)]
pub struct PktReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Next packet, or `None` at end of input
    pub fn next_packet(&mut self) -> Result<Option<Packet<'a>>, PktLineError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        let start = self.pos;
        let prefix = self
            .data
            .get(start..start + 4)
            .ok_or(PktLineError::Truncated(start))?;
        let prefix = std::str::from_utf8(prefix)
            .map_err(|_| PktLineError::InvalidLength(String::from_utf8_lossy(prefix).into_owned()))?;
        let len = usize::from_str_radix(prefix, 16)
            .map_err(|_| PktLineError::InvalidLength(prefix.to_string()))?;

        let packet = match len {
            0 => Packet::Flush,
            1 => Packet::Delim,
            2 => Packet::ResponseEnd,
            3 => return Err(PktLineError::InvalidLength(prefix.to_string())),
            _ => {
                let payload = self
                    .data
                    .get(start + 4..start + len)
                    .ok_or(PktLineError::Truncated(start))?;
                self.pos = start + len;
                return Ok(Some(Packet::Data(payload)));
            }
        };
        self.pos = start + 4;
        Ok(Some(packet))
    }

    /// Unconsumed input
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// Output of a side-band multiplexed stream
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Demuxed {
    /// Concatenated band 1 payload
    pub data: Vec<u8>,
    /// Band 2 messages
    pub progress: Vec<String>,
    /// Band 3 message, if the remote aborted
    pub error: Option<String>,
}

/// Split side-band packets until a flush or end of input
pub fn demux_sideband(reader: &mut PktReader<'_>) -> Result<Demuxed, PktLineError> {
    let mut out = Demuxed::default();
    while let Some(packet) = reader.next_packet()? {
        let payload = match packet {
            Packet::Flush => break,
            Packet::Data(payload) if !payload.is_empty() => payload,
            _ => continue,
        };
        let text = || String::from_utf8_lossy(&payload[1..]).trim_end().to_string();
        match payload[0] {
            SIDEBAND_DATA => out.data.extend_from_slice(&payload[1..]),
            SIDEBAND_PROGRESS => out.progress.push(text()),
            SIDEBAND_ERROR => {
                out.error = Some(text());
                break;
            }
            band => return Err(PktLineError::UnknownBand(band)),
        }
    }
    Ok(out)
}
