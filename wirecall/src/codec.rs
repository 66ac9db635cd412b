use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{Error, ErrorKind, Result},
    msg::{ErrorInfo, Id, Incoming, Message, Request, Response},
};

const JSONRPC_VERSION: &str = "2.0";

/// Wire encoding profile.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Copy, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// `{"jsonrpc":"2.0","method":..,"params":..,"id":..}`
    Standard,
    /// Mining-pool style: no version tag, `id` written first.
    Minimal,
}

#[derive(Serialize)]
struct StandardRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
}

#[derive(Serialize)]
struct MinimalRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct StandardResponse<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorInfo>,
    id: &'a Id,
}

#[derive(Serialize)]
struct MinimalResponse<'a> {
    id: &'a Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorInfo>,
}

/// Encodes and decodes messages and splits byte streams into frames.
///
/// Encoded messages never contain the separator: JSON escapes control
/// characters inside strings and the encoder emits no whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    profile: Profile,
    separator: Bytes,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(Profile::Standard, "\n")
    }
}

impl Codec {
    /// Creates a codec. An empty separator falls back to `"\n"`.
    pub fn new(profile: Profile, separator: &str) -> Self {
        let separator = if separator.is_empty() { "\n" } else { separator };
        Self {
            profile,
            separator: Bytes::copy_from_slice(separator.as_bytes()),
        }
    }

    #[must_use]
    pub fn profile(&self) -> Profile {
        self.profile
    }

    #[must_use]
    pub fn separator(&self) -> &[u8] {
        &self.separator
    }

    /// # Errors
    pub fn encode_request(&self, req: &Request) -> Result<Bytes> {
        let bytes = match self.profile {
            Profile::Standard => serde_json::to_vec(&StandardRequest {
                jsonrpc: JSONRPC_VERSION,
                method: &req.method,
                params: req.params.as_ref(),
                id: req.id.as_ref(),
            })?,
            Profile::Minimal => serde_json::to_vec(&MinimalRequest {
                id: req.id.as_ref(),
                method: &req.method,
                params: req.params.as_ref(),
            })?,
        };
        Ok(bytes.into())
    }

    /// # Errors
    pub fn encode_response(&self, rsp: &Response) -> Result<Bytes> {
        let bytes = match self.profile {
            Profile::Standard => serde_json::to_vec(&StandardResponse {
                jsonrpc: JSONRPC_VERSION,
                result: rsp.result.as_ref(),
                error: rsp.error.as_ref(),
                id: &rsp.id,
            })?,
            Profile::Minimal => serde_json::to_vec(&MinimalResponse {
                id: &rsp.id,
                result: rsp.result.as_ref(),
                error: rsp.error.as_ref(),
            })?,
        };
        Ok(bytes.into())
    }

    /// # Errors
    pub fn encode(&self, msg: &Message) -> Result<Bytes> {
        match msg {
            Message::Request(req) => self.encode_request(req),
            Message::Response(rsp) => self.encode_response(rsp),
        }
    }

    /// Encodes several messages as one batch array.
    ///
    /// # Errors
    pub fn encode_batch(&self, msgs: &[Message]) -> Result<Bytes> {
        let mut bytes = BytesMut::with_capacity(64 * msgs.len().max(1));
        bytes.put_u8(b'[');
        for (i, msg) in msgs.iter().enumerate() {
            if i > 0 {
                bytes.put_u8(b',');
            }
            bytes.extend_from_slice(&self.encode(msg)?);
        }
        bytes.put_u8(b']');
        Ok(bytes.freeze())
    }

    /// Appends the separator to an encoded message.
    #[must_use]
    pub fn frame(&self, encoded: &[u8]) -> Bytes {
        let mut bytes = BytesMut::with_capacity(encoded.len() + self.separator.len());
        bytes.extend_from_slice(encoded);
        bytes.extend_from_slice(&self.separator);
        bytes.freeze()
    }

    /// Splits a body holding zero or more frames, skipping blank ones.
    pub fn frames<'a>(&'a self, body: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        Frames {
            rest: body,
            separator: &self.separator,
        }
        .filter(|frame| !frame.trim_ascii().is_empty())
    }

    /// Decodes one frame into a single message or a batch.
    ///
    /// Both profiles are accepted regardless of the configured one.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ParsingError`] for malformed JSON and
    /// [`ErrorKind::InvalidRequest`] for JSON that is not a message.
    pub fn decode(&self, bytes: &[u8]) -> Result<Incoming> {
        match parse_value(bytes)? {
            Value::Array(items) => items
                .into_iter()
                .map(decode_message)
                .collect::<Result<Vec<_>>>()
                .map(Incoming::Batch),
            value => decode_message(value).map(Incoming::Single),
        }
    }
}

pub(crate) fn parse_value(bytes: &[u8]) -> Result<Value> {
    serde_json::from_slice(bytes.trim_ascii())
        .map_err(|e| Error::new(ErrorKind::ParsingError, e.to_string()))
}

/// Best-effort id recovery from a message that failed to decode.
pub(crate) fn recover_id(value: &Value) -> Id {
    value
        .get("id")
        .cloned()
        .and_then(|id| Id::from_value(id).ok())
        .unwrap_or(Id::Null)
}

pub(crate) fn decode_message(value: Value) -> Result<Message> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                format!("expected an object, got {other}"),
            ));
        }
    };

    let id = map.remove("id").map(Id::from_value).transpose()?;

    if let Some(method) = map.remove("method") {
        let Value::String(method) = method else {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                "field `method` must be a string".into(),
            ));
        };
        if method.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidRequest,
                "field `method` is empty".into(),
            ));
        }
        return Ok(Message::Request(Request {
            id,
            method,
            params: map.remove("params"),
        }));
    }

    let error = match map.remove("error") {
        None | Some(Value::Null) => None,
        Some(error) => Some(
            serde_json::from_value::<ErrorInfo>(error)
                .map_err(|e| Error::new(ErrorKind::InvalidRequest, format!("invalid error: {e}")))?,
        ),
    };
    let result = map.remove("result");
    if result.is_none() && error.is_none() {
        return Err(Error::new(
            ErrorKind::InvalidRequest,
            "missing field `method`".into(),
        ));
    }

    Ok(Message::Response(Response {
        id: id.unwrap_or(Id::Null),
        result: if error.is_some() { None } else { result },
        error,
    }))
}

struct Frames<'a> {
    rest: &'a [u8],
    separator: &'a [u8],
}

impl<'a> Iterator for Frames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        match find(self.rest, self.separator) {
            Some(pos) => {
                let frame = &self.rest[..pos];
                self.rest = &self.rest[pos + self.separator.len()..];
                Some(frame)
            }
            None => Some(std::mem::take(&mut self.rest)),
        }
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() == 1 {
        return haystack.iter().position(|b| *b == needle[0]);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
