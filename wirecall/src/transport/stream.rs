use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use super::{FrameReader, Transport};
use crate::{Error, ErrorKind, Result};

/// Separator-framed messages over any async byte stream pair, e.g. the
/// stdin/stdout of a child process or one side of [`tokio::io::duplex`].
///
/// A stream transport is always connected; the end of the input surfaces as
/// [`ErrorKind::NotConnected`] from [`Transport::receive`].
pub struct StreamTransport<R, W> {
    reader: Mutex<FrameReader<R>>,
    writer: Mutex<W>,
    separator: Bytes,
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, separator: &[u8]) -> Self {
        Self {
            reader: Mutex::new(FrameReader::new(reader, separator)),
            writer: Mutex::new(writer),
            separator: Bytes::copy_from_slice(separator),
        }
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn is_connected(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<bool> {
        Ok(true)
    }

    async fn send(&self, msg: Bytes) -> Result<Option<Bytes>> {
        let mut frame = BytesMut::with_capacity(msg.len() + self.separator.len());
        frame.put_slice(&msg);
        frame.put_slice(&self.separator);

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::new(ErrorKind::TcpSendMsgFailed, e.to_string()))?;
        Ok(None)
    }

    async fn receive(&self) -> Result<Option<Bytes>> {
        match self.reader.lock().await.next_frame().await? {
            Some(frame) => Ok(Some(frame)),
            None => Err(Error::new(ErrorKind::NotConnected, "stream eof".into())),
        }
    }
}

impl<R, W> std::fmt::Debug for StreamTransport<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_stream_transport() {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::new(reader, writer, b"\n");
        assert!(transport.is_connected());
        assert!(transport.connect().await.unwrap());

        let (mut remote_reader, mut remote_writer) = tokio::io::split(remote);
        assert!(transport.send(Bytes::from_static(b"{}")).await.unwrap().is_none());
        let mut buf = [0u8; 3];
        remote_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"{}\n");

        remote_writer.write_all(b"[1]\n").await.unwrap();
        let frame = transport.receive().await.unwrap().unwrap();
        assert_eq!(frame, &b"[1]"[..]);

        drop(remote_writer);
        drop(remote_reader);
        let err = transport.receive().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotConnected);
    }
}
