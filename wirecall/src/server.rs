use std::{convert::Infallible, io::IoSlice, net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use http_body_util::{BodyExt, Full};
use hyper::{
    StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1::Builder,
};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::sync::DropGuard;

use crate::{
    ChannelSink, Codec, Error, ErrorKind, FrameReader, Id, Listener, OutputSink, Response, Result,
    Router, TaskSupervisor,
};

/// Serves a [`Router`] over line-framed TCP, HTTP POST or any byte stream.
///
/// Every connection gets a receive loop that feeds frames to
/// [`Router::process`] and a send loop that writes the responses back,
/// each terminated by the configured separator. All loops are tracked by
/// a [`TaskSupervisor`], so [`Server::stop`] followed by [`Server::join`]
/// shuts everything down. Dropping the server stops it as well.
///
/// # Examples
///
/// ```rust,no_run
/// # use wirecall::{Router, Server, Settings};
/// # #[tokio::main]
/// # async fn main() {
/// let router = Router::new(Settings::default());
/// let server = Server::create(router);
/// let addr = server.listen_socket("127.0.0.1:0".parse().unwrap()).await.unwrap();
/// println!("listening on {addr}");
/// server.join().await;
/// # }
/// ```
pub struct Server {
    /// State shared with every connection task.
    state: Arc<ServerState>,
    /// Accept loops for socket and HTTP listeners.
    listener: Listener,
    /// Stops the connection tasks when the server is dropped.
    _drop_guard: DropGuard,
}

struct ServerState {
    router: Router,
    codec: Codec,
    /// HTTP/1 connection settings.
    http: Builder,
    task_supervisor: TaskSupervisor,
}

impl Server {
    /// Creates a server using the router's settings for framing and errors.
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn create(router: Router) -> Self {
        let mut http = Builder::new();
        http.keep_alive(true);

        let task_supervisor = TaskSupervisor::create();
        let drop_guard = task_supervisor.drop_guard();
        let state = Arc::new(ServerState {
            codec: router.settings().codec(),
            router,
            http,
            task_supervisor,
        });

        Self {
            state,
            listener: Listener::default(),
            _drop_guard: drop_guard,
        }
    }

    /// The router requests are dispatched to.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.state.router
    }

    /// Accepts line-framed connections on `addr`.
    ///
    /// A frame longer than 64 MiB is answered with a null-id error and
    /// closes its connection.
    ///
    /// # Arguments
    ///
    /// * `addr` - The address to bind; port 0 picks a free port
    ///
    /// # Returns
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::ErrorKind::TcpBindFailed`] when `addr` cannot be bound.
    pub async fn listen_socket(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let state = self.state.clone();
        self.listener
            .start_listen(addr, move |stream, peer| {
                let (reader, writer) = stream.into_split();
                state.serve_connection(reader, writer, peer.to_string());
            })
            .await
    }

    /// Accepts HTTP/1 connections on `addr`. Each POST body is processed as
    /// one or more frames and the responses are returned in the reply body.
    ///
    /// Replies are `200` with every response frame, `204` when only
    /// notifications were posted, and `405` for methods other than POST.
    ///
    /// # Returns
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::ErrorKind::TcpBindFailed`] when `addr` cannot be bound.
    pub async fn listen_http(&self, addr: SocketAddr) -> Result<SocketAddr> {
        let state = self.state.clone();
        self.listener
            .start_listen(addr, move |stream, peer| {
                state.serve_http_connection(stream, peer);
            })
            .await
    }

    /// Serves one already established byte stream, e.g. stdin/stdout.
    pub fn serve_stream<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.state
            .serve_connection(reader, writer, "stream".to_string());
    }

    /// Stops accepting and cancels every connection task.
    pub fn stop(&self) {
        self.listener.stop();
        self.state.task_supervisor.stop();
    }

    /// Waits until the tasks have finished after [`Server::stop`].
    pub async fn join(&self) {
        self.listener.join().await;
        self.state.task_supervisor.all_stopped().await;
    }
}

impl ServerState {
    fn serve_connection<R, W>(self: &Arc<Self>, reader: R, writer: W, peer: String)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(self.codec.clone(), tx));

        let separator = Bytes::copy_from_slice(self.codec.separator());
        self.task_supervisor.spawn(
            format!("send loop for {peer}"),
            Self::start_send_loop(writer, rx, separator),
        );

        let this = self.clone();
        self.task_supervisor
            .spawn(format!("recv loop for {peer}"), async move {
                this.start_recv_loop(reader, sink).await
            });
    }

    async fn start_recv_loop<R: AsyncRead + Unpin>(
        &self,
        reader: R,
        sink: Arc<dyn OutputSink>,
    ) -> Result<()> {
        let mut frames = FrameReader::new(reader, self.codec.separator());
        loop {
            match frames.next_frame().await {
                Ok(Some(frame)) => self.router.process(&frame, &sink),
                Ok(None) => return Ok(()),
                Err(e) => {
                    if e.kind == ErrorKind::FrameTooLong {
                        let info = self.router.settings().render_error(&e);
                        sink.send_response(Response::failure(Id::Null, info));
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn start_send_loop<W: AsyncWrite + Unpin>(
        mut writer: W,
        mut receiver: mpsc::UnboundedReceiver<Bytes>,
        separator: Bytes,
    ) -> Result<()> {
        const LIMIT: usize = 64;
        let mut msgs = Vec::with_capacity(LIMIT);
        loop {
            let n = receiver.recv_many(&mut msgs, LIMIT).await;
            if n == 0 {
                return Ok(());
            }

            {
                let mut bufs = Vec::with_capacity(msgs.len() * 2);
                for msg in &msgs {
                    bufs.push(IoSlice::new(msg));
                    bufs.push(IoSlice::new(&separator));
                }

                let mut slices = &mut bufs[..];
                while !slices.is_empty() {
                    let n = writer
                        .write_vectored(slices)
                        .await
                        .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))?;
                    if n == 0 {
                        return Err(Error::new(
                            ErrorKind::TcpSendMsgFailed,
                            "write zero".to_string(),
                        ));
                    }
                    IoSlice::advance_slices(&mut slices, n);
                }
            }
            writer
                .flush()
                .await
                .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))?;
            msgs.clear();
        }
    }

    fn serve_http_connection(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let this = self.clone();
        let connection = self.http.serve_connection(
            TokioIo::new(stream),
            hyper::service::service_fn(move |req: hyper::Request<Incoming>| {
                this.clone().handle_http_request(req)
            }),
        );

        self.task_supervisor
            .spawn(format!("http connection {peer}"), async move {
                connection
                    .await
                    .map_err(|e| Error::new(ErrorKind::HttpWaitRspFailed, e.to_string()))
            });
    }

    async fn handle_http_request(
        self: Arc<Self>,
        req: hyper::Request<Incoming>,
    ) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
        if req.method() != hyper::Method::POST {
            return Ok(plain_response(
                StatusCode::METHOD_NOT_ALLOWED,
                Bytes::from_static(b"expect POST"),
            ));
        }
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Ok(plain_response(StatusCode::BAD_REQUEST, e.to_string().into()));
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let sink: Arc<dyn OutputSink> = Arc::new(ChannelSink::new(self.codec.clone(), tx));
            let mut frames = self.codec.frames(&body).peekable();
            if frames.peek().is_none() {
                // let the router report the blank body.
                self.router.process(&body, &sink);
            }
            for frame in frames {
                self.router.process(frame, &sink);
            }
        }

        // completes once every responder has replied or been dropped.
        let mut out = BytesMut::new();
        while let Some(bytes) = rx.recv().await {
            out.extend_from_slice(&bytes);
            out.extend_from_slice(self.codec.separator());
        }

        if out.is_empty() {
            return Ok(plain_response(StatusCode::NO_CONTENT, Bytes::new()));
        }
        let mut rsp = hyper::Response::new(Full::new(out.freeze()));
        rsp.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(rsp)
    }
}

fn plain_response(status: StatusCode, body: Bytes) -> hyper::Response<Full<Bytes>> {
    let mut rsp = hyper::Response::new(Full::new(body));
    *rsp.status_mut() = status;
    rsp
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("router", &self.state.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Responder, Settings};
    use serde_json::{Value, json};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_serve_stream() {
        let mut router = Router::new(Settings::default());
        router.register_handler("echo", |req, responder: Responder| {
            responder.send_value(req.params.unwrap_or(Value::Null));
            Ok(())
        });
        let server = Server::create(router);

        let (local, remote) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(remote);
        server.serve_stream(reader, writer);

        let (reader, mut writer) = tokio::io::split(local);
        let mut frames = FrameReader::new(reader, b"\n");
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"echo\",\"params\":[1],\"id\":1}\nnot-json\n")
            .await
            .unwrap();

        let frame = frames.next_frame().await.unwrap().unwrap();
        let rsp: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(rsp, json!({"jsonrpc": "2.0", "result": [1], "id": 1}));

        let frame = frames.next_frame().await.unwrap().unwrap();
        let rsp: Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(rsp["id"], Value::Null);
        assert_eq!(rsp["error"]["code"], json!(crate::msg::PARSE_ERROR));

        server.stop();
        server.join().await;
    }
}
