//! Wire types shared by the lobby server and its tests.
//!
//! Every message on the wire is a [`Record`]: a short command token, an
//! optional four character status suffix and an ordered list of
//! `KEY=VALUE` fields. Legacy clients parse some fields positionally, so the
//! field order is preserved exactly as it was built or received.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header: command, status, total length.
pub const HEADER_LEN: usize = 12;
/// Largest frame the codec accepts, header included.
pub const MAX_FRAME_LEN: usize = 16 * 1024;

/// Command tokens handled by the lobby core.
pub mod commands {
    pub const AUTH: &str = "auth";
    pub const PERSONA_SELECT: &str = "pers";
    pub const GAME_SEARCH: &str = "gqwk";
    pub const GAME_LIST: &str = "gsea";
    pub const GAME_CREATE: &str = "gcre";
    pub const GAME_JOIN: &str = "gjoi";
    pub const GAME_SPAWN_CREATE: &str = "gpsc";
    pub const GAME_SPAWN_STATUS: &str = "gpss";
    pub const GAME_START: &str = "gsta";
    pub const GAME_SET_PARAMS: &str = "gset";
    pub const GAME_LEAVE: &str = "glea";
    pub const GAME_DELETE: &str = "gdel";
    pub const GAME_GET_INFO: &str = "gget";
    pub const ROOM_MOVE: &str = "move";
    pub const ROOM_CATEGORY: &str = "rcat";
    pub const ROOM_INFO: &str = "rom";
    pub const CHAT_MESSAGE: &str = "mesg";
    pub const RANK_REPORT: &str = "rank";
    pub const PING: &str = "~png";
}

/// Unsolicited records pushed by the server.
pub mod broadcasts {
    pub const GAME_ADDED: &str = "+agm";
    pub const GAME_MEMBERS: &str = "+mgm";
    pub const GAME_SESSION_STARTED: &str = "+ses";
    pub const GAME_REMOVED: &str = "+agmugam";
    pub const GAME_MEMBERS_REMOVED: &str = "+mgmugam";
    pub const GAME_ROW: &str = "+gam";
    pub const ROOM_POPULATION: &str = "+pop";
    pub const ROOM_INFO: &str = "+rom";
    pub const SERVER_STATUS: &str = "+sst";
    pub const USER_PRESENCE: &str = "+usr";
    pub const WHO: &str = "+who";
    pub const CHAT_DELIVERED: &str = "+msg";
    pub const SPAWN_CREATE: &str = "$cre";
}

/// Separator written between fields.
///
/// Chat delivery uses tabs; everything else uses newlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminator {
    #[default]
    Newline,
    Tab,
}

impl Terminator {
    pub fn as_byte(self) -> u8 {
        match self {
            Terminator::Newline => b'\n',
            Terminator::Tab => b'\t',
        }
    }
}

/// A parsed command or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    /// Command token, optionally followed by a four character status.
    pub id: String,
    /// Fields in wire order.
    pub fields: Vec<(String, String)>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Builds `<command><status>`, e.g. `gjoi` + `full` = `gjoifull`.
    pub fn with_status(command: &str, status: &str) -> Self {
        Self::new(format!("{}{}", command, status))
    }

    /// Appends a field, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Sets a field, replacing the value in place if the key already exists.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn extend(&mut self, fields: impl IntoIterator<Item = (String, String)>) {
        for (k, v) in fields {
            self.push(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Like [`Record::get`], but treats an empty value as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// The leading command token (first four characters).
    pub fn command(&self) -> &str {
        match self.id.char_indices().nth(4) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// The status suffix, if any.
    pub fn status(&self) -> Option<&str> {
        match self.id.char_indices().nth(4) {
            Some((idx, _)) => Some(&self.id[idx..]),
            None => None,
        }
    }
}

/// A record paired with the terminator it must be written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub record: Record,
    pub terminator: Terminator,
}

impl Frame {
    pub fn new(record: Record) -> Self {
        Self {
            record,
            terminator: Terminator::Newline,
        }
    }

    pub fn tabbed(record: Record) -> Self {
        Self {
            record,
            terminator: Terminator::Tab,
        }
    }
}

impl From<Record> for Frame {
    fn from(record: Record) -> Self {
        Frame::new(record)
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame length {0} out of bounds")]
    BadLength(usize),

    #[error("record id {0:?} does not fit the header")]
    BadId(String),

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Frame codec for the lobby protocol.
///
/// Header: 4 byte command, 4 byte status (zero filled when absent), 4 byte
/// big-endian total length. Body: `KEY=VALUE` pairs separated by the
/// terminator and ended by a NUL byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct LobbyCodec;

impl Decoder for LobbyCodec {
    type Item = Record;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>, CodecError> {
        let Some(len) = peek_frame_len(src) else {
            return Ok(None);
        };
        if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
            return Err(CodecError::BadLength(len));
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len);
        let header = &frame[..8];
        let id_bytes: Vec<u8> = header.iter().copied().filter(|b| *b != 0).collect();
        let id = String::from_utf8(id_bytes).map_err(|_| CodecError::InvalidUtf8)?;

        let mut body = &frame[HEADER_LEN..];
        while let Some((&0, rest)) = body.split_last() {
            body = rest;
        }
        let body = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;

        let mut record = Record::new(id);
        for piece in body.split(['\n', '\t']) {
            let piece = piece.trim_end_matches('\r');
            if piece.is_empty() {
                continue;
            }
            match piece.split_once('=') {
                Some((k, v)) => record.fields.push((k.to_string(), v.to_string())),
                None => record.fields.push((piece.to_string(), String::new())),
            }
        }
        Ok(Some(record))
    }
}

impl Encoder<Frame> for LobbyCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let id = frame.record.id.as_bytes();
        if id.is_empty() || id.len() > 8 {
            return Err(CodecError::BadId(frame.record.id.clone()));
        }

        let sep = frame.terminator.as_byte();
        let mut body = Vec::new();
        for (k, v) in &frame.record.fields {
            body.extend_from_slice(k.as_bytes());
            body.push(b'=');
            body.extend_from_slice(v.as_bytes());
            body.push(sep);
        }
        body.push(0);

        let total = HEADER_LEN + body.len();
        if total > MAX_FRAME_LEN {
            return Err(CodecError::BadLength(total));
        }

        dst.reserve(total);
        let mut header = [0u8; 8];
        header[..id.len()].copy_from_slice(id);
        dst.put_slice(&header);
        dst.put_u32(total as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

/// Reads the declared length of a buffered frame without consuming it.
pub fn peek_frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let mut len = &buf[8..12];
    Some(len.get_u32() as usize)
}
