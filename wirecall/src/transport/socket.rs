use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::RwLock,
};

use super::{StreamTransport, Transport};
use crate::{Error, ErrorKind, Result};

type TcpStreamTransport = StreamTransport<OwnedReadHalf, OwnedWriteHalf>;

/// Line-framed messages over a TCP connection to `host:port`.
///
/// The transport starts disconnected. Any I/O failure marks it disconnected
/// again until the next [`Transport::connect`].
pub struct SocketTransport {
    addr: String,
    separator: Bytes,
    stream: RwLock<Option<Arc<TcpStreamTransport>>>,
    connected: AtomicBool,
}

impl SocketTransport {
    pub fn new(addr: impl Into<String>, separator: &[u8]) -> Self {
        Self {
            addr: addr.into(),
            separator: Bytes::copy_from_slice(separator),
            stream: RwLock::default(),
            connected: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn current(&self) -> Result<Arc<TcpStreamTransport>> {
        if self.is_connected()
            && let Some(stream) = self.stream.read().await.as_ref()
        {
            return Ok(stream.clone());
        }
        Err(Error::new(
            ErrorKind::NotConnected,
            format!("socket {} is not connected", self.addr),
        ))
    }

    fn disconnected(&self, error: Error) -> Error {
        if self.connected.swap(false, Ordering::AcqRel) {
            tracing::warn!("socket {} disconnected: {error}", self.addr);
        }
        error
    }
}

impl Transport for SocketTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<bool> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpConnectFailed, format!("{}: {e}", self.addr)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set nodelay for {} failed: {e}", self.addr);
        }
        let (reader, writer) = stream.into_split();

        *self.stream.write().await =
            Some(Arc::new(StreamTransport::new(reader, writer, &self.separator)));
        self.connected.store(true, Ordering::Release);
        tracing::info!("socket connected to {}", self.addr);
        Ok(true)
    }

    async fn send(&self, msg: Bytes) -> Result<Option<Bytes>> {
        let stream = self.current().await?;
        stream.send(msg).await.map_err(|e| self.disconnected(e))
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        let stream = self.current().await?;
        match stream.receive().await {
            Ok(frame) => Ok(frame),
            Err(e) if e.kind == ErrorKind::FrameTooLong => Err(self.disconnected(e)),
            Err(e) => Err(self.disconnected(Error::new(ErrorKind::NotConnected, e.to_string()))),
        }
    }
}

impl std::fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketTransport")
            .field("addr", &self.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
