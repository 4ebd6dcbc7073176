use std::io;

use anyhow::anyhow;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec};

/// The three frames a simulated client ever puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Login(String),
    Text(String),
    Logout,
}

impl ChatMessage {
    const LOGIN: &'static str = "LOGIN";
    const TEXT: &'static str = "MESSAGE";
    const LOGOUT: &'static str = "LOGOUT";

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login(_) => Self::LOGIN,
            Self::Text(_) => Self::TEXT,
            Self::Logout => Self::LOGOUT,
        }
    }

    fn to_line(&self) -> io::Result<String> {
        let line = match self {
            Self::Login(username) if username.is_empty() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "username must not be empty",
                ))
            }
            Self::Login(username) => format!("{} {}", Self::LOGIN, username),
            Self::Text(body) => format!("{} {}", Self::TEXT, body),
            Self::Logout => Self::LOGOUT.to_string(),
        };
        // A line break inside a field would split it into two frames.
        if line.contains(['\n', '\r']) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} frame must fit on a single line", self.kind()),
            ));
        }
        Ok(line)
    }
}

impl TryFrom<&str> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let (tag, rest) = match line.split_once(' ') {
            Some((tag, rest)) => (tag, Some(rest)),
            None => (line, None),
        };
        match (tag, rest) {
            (Self::LOGIN, Some(username)) if !username.is_empty() => {
                Ok(Self::Login(username.to_string()))
            }
            (Self::TEXT, body) => Ok(Self::Text(body.unwrap_or_default().to_string())),
            (Self::LOGOUT, None) => Ok(Self::Logout),
            _ => Err(anyhow!("Unrecognized chat frame: {:?}", line)),
        }
    }
}

/// Newline-delimited framing for [`ChatMessage`], layered on [`LinesCodec`].
#[derive(Debug, Default)]
pub struct ChatCodec {
    lines: LinesCodec,
}

impl Encoder<ChatMessage> for ChatCodec {
    type Error = io::Error;

    fn encode(&mut self, message: ChatMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = message.to_line()?;
        self.lines.encode(line, dst).map_err(into_io)
    }
}

impl Decoder for ChatCodec {
    type Item = ChatMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode(src).map_err(into_io)? {
            Some(line) => ChatMessage::try_from(line.as_str())
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string())),
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.lines.decode_eof(src).map_err(into_io)? {
            Some(line) => ChatMessage::try_from(line.as_str())
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string())),
            None => Ok(None),
        }
    }
}

fn into_io(err: tokio_util::codec::LinesCodecError) -> io::Error {
    match err {
        tokio_util::codec::LinesCodecError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
