use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ErrorKind, Result};

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The payload is JSON but not a valid message.
pub const INVALID_REQUEST: i64 = -32600;
/// No handler is registered for the method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// The params could not be decoded into the handler's arguments.
pub const INVALID_PARAMS: i64 = -32602;
/// Any other failure while handling a request.
pub const INTERNAL_ERROR: i64 = -32603;

/// Correlation identifier of a request and its response.
///
/// `Null` is what a response carries when the failure happened before an
/// id could be recovered from the input.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Id {
    Num(i64),
    Str(String),
    Null,
}

impl Id {
    pub(crate) fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::new(ErrorKind::InvalidRequest, format!("invalid id: {e}")))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Num(n) => write!(f, "{n}"),
            Id::Str(s) => write!(f, "{s:?}"),
            Id::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Num(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_owned())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

/// Error object carried by a failed response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Default rendering of a local failure into a wire error object.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match &error.kind {
            ErrorKind::Remote(info) => info.clone(),
            ErrorKind::ParsingError => Self::new(PARSE_ERROR, format!("parse error: {}", error.msg)),
            ErrorKind::InvalidRequest => {
                Self::new(INVALID_REQUEST, format!("invalid request: {}", error.msg))
            }
            ErrorKind::UnhandledMethod => {
                Self::new(METHOD_NOT_FOUND, format!("method not found: {}", error.msg))
            }
            ErrorKind::InvalidParams => {
                Self::new(INVALID_PARAMS, format!("invalid params: {}", error.msg))
            }
            _ => Self::new(INTERNAL_ERROR, error.to_string()),
        }
    }
}

/// An outbound or inbound call.
///
/// A request without an id is a notification: the peer must not reply to
/// it on success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub id: Option<Id>,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request whose id is filled in by the client when sent.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: None,
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outcome of a request. Exactly one of `result` and `error` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub id: Id,
    pub result: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl Response {
    #[must_use]
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn failure(id: Id, error: ErrorInfo) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts the response into the carried value or the peer's error.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Remote`] when the response carries an error object.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(info) => Err(Error::remote(info)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A single decoded wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl From<Request> for Message {
    fn from(value: Request) -> Self {
        Message::Request(value)
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Message::Response(value)
    }
}

/// A decoded payload: either one message or an ordered batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    Single(Message),
    Batch(Vec<Message>),
}

impl Incoming {
    /// Flattens the payload into its messages in wire order.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Incoming::Single(msg) => vec![msg],
            Incoming::Batch(msgs) => msgs,
        }
    }
}
