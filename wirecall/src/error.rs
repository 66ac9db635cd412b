use serde::{Deserialize, Serialize};

use crate::msg::ErrorInfo;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotConnected,
    ParsingError,
    UnhandledMethod,
    Timeout,
    InvalidRequest,
    InvalidParams,
    InvalidArgument,
    SerdeJsonError,
    FrameTooLong,
    TcpConnectFailed,
    TcpBindFailed,
    TcpSendMsgFailed,
    TcpRecvMsgFailed,
    HttpBuildReqFailed,
    HttpSendReqFailed,
    HttpWaitRspFailed,
    HttpStatus(u16),
    HandlerPanicked,
    /// The peer answered with an error object.
    Remote(ErrorInfo),
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// Wraps an error object received from the peer.
    #[must_use]
    pub fn remote(info: ErrorInfo) -> Self {
        Self {
            msg: info.message.clone(),
            kind: ErrorKind::Remote(info),
        }
    }

    /// Returns the peer's error object if this error came from the wire.
    #[must_use]
    pub fn remote_info(&self) -> Option<&ErrorInfo> {
        match &self.kind {
            ErrorKind::Remote(info) => Some(info),
            _ => None,
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(value: std::num::TryFromIntError) -> Self {
        Self {
            kind: ErrorKind::InvalidArgument,
            msg: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::SerdeJsonError,
            msg: value.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ErrorKind::Remote(info) => write!(f, "Remote({}): {}", info.code, info.message),
            kind if self.msg.is_empty() => write!(f, "{kind:?}"),
            kind => write!(f, "{kind:?}: {}", self.msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
