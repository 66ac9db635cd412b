use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{Codec, Error, ErrorHandler, ErrorInfo, ErrorKind, Id, Response, Result};

/// Where a router writes the responses it produces.
pub trait OutputSink: Send + Sync {
    fn send_response(&self, rsp: Response);
}

impl<F> OutputSink for F
where
    F: Fn(Response) + Send + Sync,
{
    fn send_response(&self, rsp: Response) {
        self(rsp);
    }
}

/// Encodes responses and queues them for a connection's send loop.
#[derive(Debug)]
pub struct ChannelSink {
    codec: Codec,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(codec: Codec, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { codec, tx }
    }
}

impl OutputSink for ChannelSink {
    fn send_response(&self, rsp: Response) {
        match self.codec.encode_response(&rsp) {
            Ok(bytes) => {
                if self.tx.send(bytes).is_err() {
                    tracing::warn!("connection closed before response {} was sent", rsp.id);
                }
            }
            Err(e) => tracing::error!("encode response {} failed: {e}", rsp.id),
        }
    }
}

/// Reply handle given to a method handler together with its request.
///
/// Exactly one response is written per responder. A notification's success
/// is swallowed; its failure is still reported with a null id.
pub struct Responder {
    id: Option<Id>,
    sink: Option<Arc<dyn OutputSink>>,
    error_handler: Option<ErrorHandler>,
}

impl Responder {
    pub fn new(
        id: Option<Id>,
        sink: Arc<dyn OutputSink>,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        Self {
            id,
            sink: Some(sink),
            error_handler,
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<&Id> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serializes the handler's outcome into the response.
    pub fn send_result<T, E>(self, result: std::result::Result<T, E>)
    where
        T: Serialize,
        E: Into<Error>,
    {
        let result = result
            .map_err(Into::into)
            .and_then(|value| serde_json::to_value(value).map_err(Error::from));
        self.send(result);
    }

    /// Runs `task` on its own tokio task and replies with its outcome.
    ///
    /// A panicking task is answered with [`ErrorKind::HandlerPanicked`],
    /// which renders as an internal error.
    pub fn spawn_reply<F, T, E>(self, task: F)
    where
        F: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize + Send + 'static,
        E: Into<Error> + Send + 'static,
    {
        tokio::spawn(async move {
            match tokio::spawn(task).await {
                Ok(result) => self.send_result(result),
                Err(e) if e.is_panic() => {
                    let msg = panic_message(e.into_panic());
                    self.send_error(Error::new(ErrorKind::HandlerPanicked, msg));
                }
                Err(e) => self.send_error(Error::new(ErrorKind::HandlerPanicked, e.to_string())),
            }
        });
    }

    pub fn send_value(self, value: serde_json::Value) {
        self.send(Ok(value));
    }

    pub fn send_error(self, error: Error) {
        self.send(Err(error));
    }

    fn render(&self, error: &Error) -> ErrorInfo {
        match &self.error_handler {
            Some(handler) => handler.render(error),
            None => ErrorInfo::from_error(error),
        }
    }

    fn send(mut self, result: Result<serde_json::Value>) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        let rsp = match (self.id.take(), result) {
            (None, Ok(_)) => return,
            (Some(id), Ok(value)) => Response::success(id, value),
            (id, Err(error)) => {
                tracing::error!("request {:?} failed: {error}", id);
                Response::failure(id.unwrap_or(Id::Null), self.render(&error))
            }
        };
        sink.send_response(rsp);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => match payload.downcast_ref::<&'static str>() {
            Some(msg) => (*msg).to_string(),
            None => "handler panicked".to_string(),
        },
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.sink.is_some()
            && let Some(id) = &self.id
        {
            tracing::warn!("responder for request {id} dropped without a reply");
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, msg::INTERNAL_ERROR};
    use serde_json::json;
    use std::sync::Mutex;

    fn collector() -> (Arc<dyn OutputSink>, Arc<Mutex<Vec<Response>>>) {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let out = out.clone();
            move |rsp: Response| out.lock().unwrap().push(rsp)
        };
        (Arc::new(sink), out)
    }

    #[test]
    fn test_send_result() {
        let (sink, out) = collector();

        Responder::new(Some(Id::Num(1)), sink.clone(), None).send_result(Ok::<_, Error>(5));
        Responder::new(Some(Id::Num(2)), sink.clone(), None)
            .send_result(Err::<(), _>(ErrorKind::Timeout));
        Responder::new(None, sink.clone(), None).send_result(Ok::<_, Error>("ignored"));
        Responder::new(None, sink, None).send_error(Error::new(
            ErrorKind::Unknown("db".into()),
            "down".into(),
        ));

        let out = out.lock().unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], Response::success(Id::Num(1), json!(5)));
        assert_eq!(out[1].id, Id::Num(2));
        assert_eq!(out[1].error.as_ref().unwrap().code, INTERNAL_ERROR);
        assert_eq!(out[2].id, Id::Null);
    }

    #[test]
    fn test_custom_error_handler() {
        let (sink, out) = collector();
        let handler = ErrorHandler::new(|e| ErrorInfo::new(7, e.msg.clone()));
        Responder::new(Some(Id::from("x")), sink, Some(handler))
            .send_error(Error::new(ErrorKind::InvalidArgument, "bad".into()));

        let out = out.lock().unwrap();
        assert_eq!(out[0], Response::failure(Id::from("x"), ErrorInfo::new(7, "bad")));
    }

    #[tokio::test]
    async fn test_spawn_reply_panic() {
        let (sink, out) = collector();
        Responder::new(Some(Id::Num(1)), sink.clone(), None)
            .spawn_reply(async { Ok::<_, Error>(42) });
        Responder::new(Some(Id::Num(2)), sink, None).spawn_reply(async {
            if Id::Num(2) != Id::Null {
                panic!("division by zero");
            }
            Ok::<i32, Error>(0)
        });

        for _ in 0..100 {
            if out.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let mut out = out.lock().unwrap().clone();
        out.sort_by_key(|rsp| rsp.id.to_string());
        assert_eq!(out[0], Response::success(Id::Num(1), json!(42)));
        let err = out[1].error.as_ref().unwrap();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("division by zero"));
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(Codec::default(), tx);
        sink.send_response(Response::success(Id::Num(3), json!(null)));
        let bytes = rx.recv().await.unwrap();
        assert_eq!(bytes, &br#"{"jsonrpc":"2.0","result":null,"id":3}"#[..]);
    }
}
