use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Uri, client::conn::http1::SendRequest, header};
use hyper_util::rt::TokioIo;
use tokio::{net::TcpStream, sync::Mutex};

use super::Transport;
use crate::{Error, ErrorKind, Result};

/// One HTTP POST per outbound message; the reply arrives as the response
/// body. Keep-alive connections are pooled and reused.
pub struct HttpTransport {
    uri: Uri,
    authority: String,
    path: String,
    connections: Mutex<Vec<SendRequest<Full<Bytes>>>>,
}

impl HttpTransport {
    /// Creates a transport posting to `url`, e.g. `http://127.0.0.1:8080/rpc`.
    ///
    /// # Errors
    ///
    /// Fails unless `url` is an absolute `http://` URL.
    pub fn new(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, format!("invalid url {url}: {e}")))?;
        if uri.scheme_str() != Some("http") {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("unsupported url {url}: expect http://"),
            ));
        }
        let Some(authority) = uri.authority() else {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("url {url} has no host"),
            ));
        };
        let authority = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
        let path = uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), |p| p.as_str().to_string());

        Ok(Self {
            uri,
            authority,
            path,
            connections: Mutex::default(),
        })
    }

    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    async fn acquire(&self) -> Result<SendRequest<Full<Bytes>>> {
        loop {
            let idle = self.connections.lock().await.pop();
            match idle {
                Some(mut sender) => {
                    if sender.ready().await.is_ok() {
                        return Ok(sender);
                    }
                }
                None => break,
            }
        }

        let stream = TcpStream::connect(&self.authority)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, e.to_string()))?;
        let (sender, conn) =
            hyper::client::conn::http1::handshake::<TokioIo<_>, Full<Bytes>>(TokioIo::new(stream))
                .await
                .map_err(|e| Error::new(ErrorKind::HttpWaitRspFailed, e.to_string()))?;
        tokio::spawn(conn);
        Ok(sender)
    }
}

impl Transport for HttpTransport {
    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<bool> {
        Ok(true)
    }

    async fn send(&self, msg: Bytes) -> Result<Option<Bytes>> {
        // 1. acquire connection.
        let mut sender = self.acquire().await?;

        // 2. build request.
        let req = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(self.path.as_str())
            .header(header::HOST, self.authority.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(msg))
            .map_err(|e| Error::new(ErrorKind::HttpBuildReqFailed, e.to_string()))?;

        // 3. send request.
        let rsp = sender
            .send_request(req)
            .await
            .map_err(|e| Error::new(ErrorKind::HttpSendReqFailed, e.to_string()))?;
        let status = rsp.status();

        // 4. collect body bytes.
        let body = rsp
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::new(ErrorKind::HttpWaitRspFailed, e.to_string()))?
            .to_bytes();

        // 5. restore connection.
        self.connections.lock().await.push(sender);

        if !status.is_success() {
            return Err(Error::new(
                ErrorKind::HttpStatus(status.as_u16()),
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }
        Ok(Some(body))
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").field("uri", &self.uri).finish()
    }
}
