use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::Instant,
};

use crate::{
    Codec, Error, ErrorKind, HttpTransport, IdGenerator, Message, OutputSink, Receiver, Request,
    Response, Result, Router, Settings, SocketTransport, StreamTransport, Transport, Waiter,
};

/// Correlates outbound requests with inbound responses over one transport.
///
/// There is no background reader: a caller waiting for its response drives
/// [`Client::tick`] itself, and whatever it reads is routed to the caller
/// that owns the id. Several callers may wait concurrently.
///
/// Each request gets a fresh id from the client's [`IdGenerator`]. Its
/// deadline starts when the request is sent and covers the send itself,
/// which for HTTP is the whole round trip.
///
/// # Examples
///
/// ```rust,no_run
/// # use wirecall::{Client, Request, Settings};
/// # #[tokio::main]
/// # async fn main() -> wirecall::Result<()> {
/// let client = Client::over_socket("127.0.0.1:8000", Settings::default());
/// client.connect().await?;
/// let rsp = client
///     .send_request_and_wait(Request::new("ping", None), None)
///     .await?;
/// println!("{:?}", rsp.into_result()?);
/// # Ok(())
/// # }
/// ```
pub struct Client<T> {
    transport: Arc<T>,
    codec: Codec,
    /// Id source for outbound requests.
    ids: IdGenerator,
    /// Requests waiting for a response.
    waiter: Waiter,
    settings: Settings,
    /// Handles requests initiated by the peer.
    router: Option<Arc<Router>>,
}

impl<T: Transport> Client<T> {
    /// Creates a client over `transport` with ids and framing taken from
    /// `settings`.
    pub fn new(transport: T, settings: Settings) -> Self {
        Self {
            transport: Arc::new(transport),
            codec: settings.codec(),
            ids: IdGenerator::new(settings.id_kind),
            waiter: Waiter::default(),
            settings,
            router: None,
        }
    }

    /// Serves requests and notifications initiated by the peer with `router`.
    #[must_use]
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(Arc::new(router));
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// # Errors
    pub async fn connect(&self) -> Result<bool> {
        self.transport.connect().await
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.waiter.len()
    }

    /// Reads and handles one inbound frame.
    ///
    /// Returns `false` when the transport has no inbound stream.
    ///
    /// # Errors
    ///
    /// Fails when the transport does. Undecodable frames are logged and
    /// skipped.
    pub async fn tick(&self) -> Result<bool> {
        match self.transport.receive().await? {
            Some(frame) => {
                self.handle_frame(&frame);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sends `req` with a fresh id and waits for the matching response.
    ///
    /// The deadline starts when the request is sent; `None` uses
    /// [`Settings::response_timeout`].
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotConnected`] before sending or when the stream closes
    /// while waiting, [`ErrorKind::Timeout`] when no response arrived in
    /// time, or the transport's own error.
    pub async fn send_request_and_wait(
        &self,
        mut req: Request,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        if !self.connected() {
            return Err(Error::new(
                ErrorKind::NotConnected,
                format!("cannot send {}: transport is not connected", req.method),
            ));
        }

        let id = self.ids.next();
        req.id = Some(id.clone());
        let bytes = self.codec.encode_request(&req)?;
        let receiver = self.waiter.alloc(id.clone());

        let deadline = Instant::now() + timeout.unwrap_or(self.settings.response_timeout);
        self.send_before(bytes, &req.method, deadline).await?;

        self.wait(receiver, &req, deadline).await
    }

    /// Sends one frame, handling any reply body the transport returns.
    /// Request/response transports do the whole round trip here, so the
    /// deadline covers it too.
    async fn send_before(&self, bytes: Bytes, method: &str, deadline: Instant) -> Result<()> {
        match tokio::time::timeout_at(deadline, self.transport.send(bytes)).await {
            Ok(Ok(Some(body))) => {
                self.handle_body(&body);
                Ok(())
            }
            Ok(Ok(None)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::debug!("sending {method} timed out");
                Err(Error::new(
                    ErrorKind::Timeout,
                    format!("sending {method} timed out"),
                ))
            }
        }
    }

    async fn wait(&self, receiver: Receiver<'_>, req: &Request, deadline: Instant) -> Result<Response> {
        let recv = receiver.recv();
        tokio::pin!(recv);
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        let mut ticking = true;
        loop {
            tokio::select! {
                biased;
                rsp = &mut recv => return rsp,
                () = &mut sleep => {
                    let id = req.id.as_ref().map(ToString::to_string).unwrap_or_default();
                    tracing::debug!("request {id} ({}) timed out", req.method);
                    return Err(Error::new(
                        ErrorKind::Timeout,
                        format!("no response to {} ({id})", req.method),
                    ));
                }
                ticked = self.tick(), if ticking => {
                    if !ticked? {
                        ticking = false;
                    }
                }
            }
        }
    }

    /// Sends a notification. No response is expected, but the send itself
    /// is bounded by [`Settings::response_timeout`].
    ///
    /// # Errors
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if !self.connected() {
            return Err(Error::new(
                ErrorKind::NotConnected,
                format!("cannot send {method}: transport is not connected"),
            ));
        }
        let bytes = self.codec.encode_request(&Request::new(method, params))?;
        let deadline = Instant::now() + self.settings.response_timeout;
        self.send_before(bytes, method, deadline).await
    }

    /// Typed request used by generated proxies.
    ///
    /// # Errors
    ///
    /// An error object in the response becomes [`ErrorKind::Remote`].
    pub async fn call<Rsp, E>(
        &self,
        method: &str,
        params: Result<Option<Value>>,
        timeout: Duration,
    ) -> std::result::Result<Rsp, E>
    where
        Rsp: DeserializeOwned,
        E: From<Error>,
    {
        let params = params?;
        let rsp = self
            .send_request_and_wait(Request::new(method, params), Some(timeout))
            .await?;
        let value = rsp.into_result()?;
        serde_json::from_value(value).map_err(|e| E::from(Error::from(e)))
    }

    fn handle_body(&self, body: &[u8]) {
        for frame in self.codec.frames(body) {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&self, frame: &[u8]) {
        match self.codec.decode(frame) {
            Ok(incoming) => {
                for msg in incoming.into_messages() {
                    self.handle_message(msg);
                }
            }
            Err(e) => tracing::warn!("drop undecodable frame: {e}"),
        }
    }

    fn handle_message(&self, msg: Message) {
        match msg {
            Message::Response(rsp) => self.waiter.post(rsp),
            Message::Request(req) => match &self.router {
                Some(router) => {
                    let sink: Arc<dyn OutputSink> = Arc::new(TransportSink {
                        transport: self.transport.clone(),
                        codec: self.codec.clone(),
                    });
                    router.handle_request(req, &sink);
                }
                None => tracing::warn!("drop inbound request {}: no router", req.method),
            },
        }
    }
}

impl<R, W> Client<StreamTransport<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn over_stream(reader: R, writer: W, settings: Settings) -> Self {
        let transport = StreamTransport::new(reader, writer, settings.codec().separator());
        Self::new(transport, settings)
    }
}

impl Client<HttpTransport> {
    /// # Errors
    ///
    /// Fails when `url` is not an `http://` URL.
    pub fn over_http(url: &str, settings: Settings) -> Result<Self> {
        Ok(Self::new(HttpTransport::new(url)?, settings))
    }
}

impl Client<SocketTransport> {
    /// Creates a client for `host:port`. Call [`Client::connect`] first.
    pub fn over_socket(addr: impl Into<String>, settings: Settings) -> Self {
        let transport = SocketTransport::new(addr, settings.codec().separator());
        Self::new(transport, settings)
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("waiter", &self.waiter)
            .field("settings", &self.settings)
            .finish()
    }
}

/// Replies to peer-initiated requests through the client's own transport.
struct TransportSink<T> {
    transport: Arc<T>,
    codec: Codec,
}

impl<T: Transport> OutputSink for TransportSink<T> {
    fn send_response(&self, rsp: Response) {
        let bytes = match self.codec.encode_response(&rsp) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("encode response {} failed: {e}", rsp.id);
                return;
            }
        };
        let transport = self.transport.clone();
        let id = rsp.id;
        tokio::spawn(async move {
            if let Err(e) = transport.send(bytes).await {
                tracing::error!("send response {id} failed: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameReader, Id, IdKind, Responder};
    use serde_json::json;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type Peer = (FrameReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>);

    fn pair(settings: Settings) -> (Client<StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>>, Peer) {
        let (local, remote) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        let client = Client::over_stream(reader, writer, settings);
        let (reader, writer) = tokio::io::split(remote);
        (client, (FrameReader::new(reader, b"\n"), writer))
    }

    async fn read_request(peer: &mut Peer) -> Value {
        let frame = peer.0.next_frame().await.unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_request_and_response() {
        let (client, mut peer) = pair(Settings::default());

        let serve = async {
            let req = read_request(&mut peer).await;
            assert_eq!(req, json!({"jsonrpc": "2.0", "method": "add", "params": [2, 3], "id": 1}));
            peer.1
                .write_all(b"{\"jsonrpc\":\"2.0\",\"result\":5,\"id\":1}\n")
                .await
                .unwrap();
        };
        let call = client.call::<i64, Error>("add", Ok(Some(json!([2, 3]))), Duration::from_secs(1));
        let (sum, ()) = tokio::join!(call, serve);
        assert_eq!(sum.unwrap(), 5);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_timeout_and_late_response() {
        let (client, mut peer) = pair(Settings::default());

        let err = client
            .send_request_and_wait(Request::new("slow", None), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(client.pending(), 0);

        let req = read_request(&mut peer).await;
        assert_eq!(req["id"], json!(1));
        peer.1
            .write_all(b"{\"jsonrpc\":\"2.0\",\"result\":\"late\",\"id\":1}\n")
            .await
            .unwrap();

        let serve = async {
            let req = read_request(&mut peer).await;
            assert_eq!(req["id"], json!(2));
            peer.1
                .write_all(b"{\"jsonrpc\":\"2.0\",\"result\":\"ok\",\"id\":2}\n")
                .await
                .unwrap();
        };
        let call = client.send_request_and_wait(Request::new("fast", None), None);
        let (rsp, ()) = tokio::join!(call, serve);
        assert_eq!(rsp.unwrap().result, Some(json!("ok")));
    }

    #[tokio::test]
    async fn test_blocked_send_times_out() {
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let client = Client::over_stream(reader, writer, Settings::default());

        // the peer never reads, so the write cannot complete.
        let req = Request::new("echo", Some(json!(["x".repeat(1024)])));
        let err = client
            .send_request_and_wait(req, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(client.pending(), 0);

        let err = client
            .notify("echo", Some(json!(["y".repeat(1024)])))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (client, mut peer) = pair(Settings::default());

        let serve = async {
            read_request(&mut peer).await;
            peer.1
                .write_all(b"{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32601,\"message\":\"method not found: nope\"},\"id\":1}\n")
                .await
                .unwrap();
        };
        let call = client.call::<Value, Error>("nope", Ok(None), Duration::from_secs(1));
        let (result, ()) = tokio::join!(call, serve);
        let err = result.unwrap_err();
        assert_eq!(err.remote_info().unwrap().code, crate::msg::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_closed_stream_fails_wait() {
        let (client, mut peer) = pair(Settings::default());
        peer.1.shutdown().await.unwrap();
        let err = client
            .send_request_and_wait(Request::new("any", None), Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let client = Client::over_socket("127.0.0.1:1", Settings::default());
        assert!(!client.connected());
        let err = client
            .send_request_and_wait(Request::new("any", None), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConnected);
        let err = client.notify("any", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn test_lexical_ids_and_notify() {
        let settings = Settings {
            id_kind: IdKind::Lexical,
            ..Settings::default()
        };
        let (client, mut peer) = pair(settings);

        client.notify("hello", Some(json!(["x"]))).await.unwrap();
        let note = read_request(&mut peer).await;
        assert!(note.get("id").is_none());

        let serve = async {
            let req = read_request(&mut peer).await;
            assert_eq!(req["id"], json!("0"));
            peer.1
                .write_all(b"{\"jsonrpc\":\"2.0\",\"result\":true,\"id\":\"0\"}\n")
                .await
                .unwrap();
        };
        let call = client.send_request_and_wait(Request::new("ping", None), None);
        let (rsp, ()) = tokio::join!(call, serve);
        assert_eq!(rsp.unwrap().id, Id::from("0"));
    }

    #[tokio::test]
    async fn test_peer_initiated_request() {
        let mut router = Router::default();
        router.register_handler("ping", |_req, responder: Responder| {
            responder.send_value(json!("pong"));
            Ok(())
        });
        let (client, mut peer) = pair(Settings::default());
        let client = client.with_router(router);

        peer.1
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":\"s1\"}\n")
            .await
            .unwrap();
        assert!(client.tick().await.unwrap());

        let rsp = read_request(&mut peer).await;
        assert_eq!(rsp, json!({"jsonrpc": "2.0", "result": "pong", "id": "s1"}));
    }
}
