use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::{Error, ErrorKind, Result, Settings};

/// Static description of one RPC method of an interface, emitted by
/// `#[wirecall::interface]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// The Rust function name.
    pub ident: &'static str,
    /// Explicit wire name from `#[rpc(name = "...")]`.
    pub rpc_name: Option<&'static str>,
    /// Wire names of the parameters, in declaration order.
    pub params: &'static [&'static str],
    /// Send params as an object keyed by name instead of an array.
    pub object_params: bool,
}

impl MethodDescriptor {
    /// The method name on the wire.
    #[must_use]
    pub fn name<'a>(&'a self, settings: &Settings) -> &'a str {
        match self.rpc_name {
            Some(name) => name,
            None => settings.resolve_method_name(self.ident),
        }
    }

    /// Builds the `params` member from already serialized arguments.
    ///
    /// # Errors
    ///
    /// Returns the first serialization failure.
    pub fn encode_params(&self, args: Vec<Result<Value>>) -> Result<Option<Value>> {
        if args.is_empty() {
            return Ok(None);
        }
        if self.object_params {
            let map = self
                .params
                .iter()
                .zip(args)
                .map(|(name, arg)| arg.map(|value| ((*name).to_string(), value)))
                .collect::<Result<Map<_, _>>>()?;
            Ok(Some(Value::Object(map)))
        } else {
            let list = args.into_iter().collect::<Result<Vec<_>>>()?;
            Ok(Some(Value::Array(list)))
        }
    }

    /// Starts decoding inbound params. Both positional and named forms are
    /// accepted whatever this method sends.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidParams`] when `params` is neither an
    /// array, an object nor absent.
    pub fn read_params(&self, params: Option<Value>) -> Result<ParamReader> {
        let source = match params {
            None | Some(Value::Null) => Source::Empty,
            Some(Value::Array(list)) => Source::Positional(list.into_iter()),
            Some(Value::Object(map)) => Source::Named(map),
            Some(other) => {
                return Err(Error::new(
                    ErrorKind::InvalidParams,
                    format!("expected an array or an object, got {other}"),
                ));
            }
        };
        Ok(ParamReader {
            source,
            names: self.params,
            index: 0,
        })
    }
}

#[derive(Debug)]
enum Source {
    Empty,
    Positional(std::vec::IntoIter<Value>),
    Named(Map<String, Value>),
}

/// Decodes handler arguments one at a time in declaration order.
///
/// A missing argument decodes from `null`, so `Option` parameters may be
/// omitted by the caller.
#[derive(Debug)]
pub struct ParamReader {
    source: Source,
    names: &'static [&'static str],
    index: usize,
}

impl ParamReader {
    /// # Errors
    ///
    /// Fails with [`ErrorKind::InvalidParams`] naming the argument that
    /// could not be decoded.
    pub fn arg<T: DeserializeOwned>(&mut self) -> Result<T> {
        let name = self.names.get(self.index).copied().unwrap_or("?");
        self.index += 1;

        let value = match &mut self.source {
            Source::Empty => None,
            Source::Positional(list) => list.next(),
            Source::Named(map) => map.remove(name),
        };
        serde_json::from_value(value.unwrap_or(Value::Null)).map_err(|e| {
            Error::new(
                ErrorKind::InvalidParams,
                format!("argument `{name}`: {e}"),
            )
        })
    }
}
