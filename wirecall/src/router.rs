use foldhash::fast::RandomState;
use std::{collections::HashMap, sync::Arc};

use serde_json::Value;

use crate::{
    Error, ErrorKind, Id, Message, OutputSink, Request, Responder, Response, Result, Settings,
    codec::{decode_message, parse_value, recover_id},
};

pub type Method = Box<dyn Fn(Request, Responder) -> Result<()> + Send + Sync>;

/// Method name to handler table, and the entry point for raw inbound
/// payloads on the serving side.
///
/// Handlers run on the caller's task and usually spawn the actual work; the
/// [`Responder`] they receive writes the reply whenever it is ready. An
/// `Err` returned synchronously is reported to the peer at once.
pub struct Router {
    methods: HashMap<String, Method, RandomState>,
    settings: Settings,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Router {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            methods: HashMap::default(),
            settings,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registers `handler` for `method`, replacing any previous one.
    pub fn register_handler<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(Request, Responder) -> Result<()> + Send + Sync + 'static,
    {
        let method = method.into();
        if self.methods.insert(method.clone(), Box::new(handler)).is_some() {
            tracing::warn!("handler for method {method} replaced");
        }
    }

    pub fn method_names(&self) -> impl Iterator<Item = &String> {
        self.methods.keys()
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Handles one raw frame: a single message or a batch.
    ///
    /// Every problem becomes an error response on `sink`. Batch elements
    /// are dispatched in order and answered independently.
    pub fn process(&self, raw: &[u8], sink: &Arc<dyn OutputSink>) {
        let value = match parse_value(raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("drop unparsable payload: {e}");
                self.reply_error(sink, Id::Null, &e);
                return;
            }
        };

        match value {
            Value::Array(items) if items.is_empty() => {
                let e = Error::new(ErrorKind::InvalidRequest, "empty batch".into());
                self.reply_error(sink, Id::Null, &e);
            }
            Value::Array(items) => {
                for item in items {
                    self.process_value(item, sink);
                }
            }
            value => self.process_value(value, sink),
        }
    }

    fn process_value(&self, value: Value, sink: &Arc<dyn OutputSink>) {
        let id = recover_id(&value);
        match decode_message(value) {
            Ok(Message::Request(req)) => self.handle_request(req, sink),
            Ok(Message::Response(rsp)) => {
                let e = Error::new(
                    ErrorKind::InvalidRequest,
                    "unexpected response on the serving side".into(),
                );
                self.reply_error(sink, rsp.id, &e);
            }
            Err(e) => self.reply_error(sink, id, &e),
        }
    }

    /// Routes a decoded request to its handler.
    pub fn handle_request(&self, req: Request, sink: &Arc<dyn OutputSink>) {
        let id = req.id.clone();
        let result = match self.methods.get(&req.method) {
            Some(handler) => {
                let responder =
                    Responder::new(id.clone(), sink.clone(), self.settings.error_handler.clone());
                handler(req, responder)
            }
            None => Err(Error::new(ErrorKind::UnhandledMethod, req.method)),
        };

        if let Err(e) = result {
            tracing::error!("dispatch request {id:?} failed: {e}");
            self.reply_error(sink, id.unwrap_or(Id::Null), &e);
        }
    }

    fn reply_error(&self, sink: &Arc<dyn OutputSink>, id: Id, error: &Error) {
        sink.send_response(Response::failure(id, self.settings.render_error(error)));
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.methods.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR};
    use serde_json::json;
    use std::sync::Mutex;

    fn echo_router() -> Router {
        let mut router = Router::default();
        router.register_handler("echo", |req, responder: Responder| {
            responder.send_value(req.params.unwrap_or(Value::Null));
            Ok(())
        });
        router.register_handler("strict", |_req, _responder| {
            Err(Error::new(ErrorKind::InvalidParams, "expect 2 numbers".into()))
        });
        router
    }

    fn run(router: &Router, raw: &str) -> Vec<Response> {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn OutputSink> = {
            let out = out.clone();
            Arc::new(move |rsp: Response| out.lock().unwrap().push(rsp))
        };
        router.process(raw.as_bytes(), &sink);
        let out = out.lock().unwrap();
        out.clone()
    }

    #[test]
    fn test_echo() {
        let router = echo_router();
        assert!(router.contains("echo"));
        let out = run(&router, r#"{"jsonrpc":"2.0","method":"echo","params":["hi"],"id":1}"#);
        assert_eq!(out, vec![Response::success(Id::Num(1), json!(["hi"]))]);
    }

    #[test]
    fn test_notification_has_no_reply() {
        let router = echo_router();
        let out = run(&router, r#"{"method":"echo","params":[1]}"#);
        assert!(out.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let out = run(&echo_router(), "not-json");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, Id::Null);
        let error = out[0].error.as_ref().unwrap();
        assert_eq!(error.code, PARSE_ERROR);
        assert!(error.message.contains("parse error"));
    }

    #[test]
    fn test_method_not_found() {
        let out = run(&echo_router(), r#"{"method":"nope","id":"a"}"#);
        assert_eq!(out[0].id, Id::from("a"));
        let error = out[0].error.as_ref().unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert!(error.message.contains("nope"));
    }

    #[test]
    fn test_handler_error() {
        let out = run(&echo_router(), r#"{"method":"strict","params":[],"id":5}"#);
        assert_eq!(out[0].id, Id::Num(5));
        assert_eq!(out[0].error.as_ref().unwrap().code, INVALID_PARAMS);
    }

    #[test]
    fn test_invalid_message_keeps_id() {
        let out = run(&echo_router(), r#"{"method":42,"id":9}"#);
        assert_eq!(out[0].id, Id::Num(9));
        assert_eq!(out[0].error.as_ref().unwrap().code, INVALID_REQUEST);

        let out = run(&echo_router(), r#"{"result":1,"id":3}"#);
        assert_eq!(out[0].id, Id::Num(3));
        assert_eq!(out[0].error.as_ref().unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn test_batch() {
        let out = run(
            &echo_router(),
            r#"[{"method":"echo","params":[1],"id":1},{"method":"echo","params":[2]},{"method":"nope","id":2}]"#,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Response::success(Id::Num(1), json!([1])));
        assert_eq!(out[1].id, Id::Num(2));
        assert!(!out[1].is_success());

        let out = run(&echo_router(), "[]");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].error.as_ref().unwrap().code, INVALID_REQUEST);
    }
}
