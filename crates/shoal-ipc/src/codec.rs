use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::frame::Frame;

/// Upper bound on a single frame. Bodies are capped well below this by the
/// per-app body limit; the codec bound exists so a corrupt length prefix
/// cannot ask for an absurd allocation.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("ipc channel i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame encoding failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("frame decoding failed: {0}")]
    Decode(#[source] bincode::Error),
}

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

/// Reading half of a frame channel.
pub struct FrameSource<R> {
    inner: FramedRead<R, LengthDelimitedCodec>,
}

impl<R: AsyncRead + Unpin> FrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
        }
    }

    /// Next frame, or `None` once the peer closed the channel.
    pub async fn next(&mut self) -> Result<Option<Frame>, IpcError> {
        match self.inner.next().await {
            Some(Ok(bytes)) => {
                let frame = bincode::deserialize(&bytes).map_err(IpcError::Decode)?;
                Ok(Some(frame))
            }
            Some(Err(e)) => Err(IpcError::Io(e)),
            None => Ok(None),
        }
    }
}

/// Writing half of a frame channel.
pub struct FrameSink<W> {
    inner: FramedWrite<W, LengthDelimitedCodec>,
}

impl<W: AsyncWrite + Unpin> FrameSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
        }
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), IpcError> {
        let bytes = bincode::serialize(frame).map_err(IpcError::Encode)?;
        self.inner.send(Bytes::from(bytes)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{IpcResponse, Frame};
    use uuid::Uuid;

    #[tokio::test]
    async fn frames_survive_a_duplex_channel() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read_half, _w) = tokio::io::split(server);
        let (_r, write_half) = tokio::io::split(client);

        let mut sink = FrameSink::new(write_half);
        let mut source = FrameSource::new(read_half);

        let req_id = Uuid::new_v4();
        let sent = Frame::Response {
            req_id,
            res: IpcResponse {
                status: 200,
                headers: vec![("content-type".into(), "text/plain".into())],
                body: b"hello".to_vec(),
            },
        };
        sink.send(&sent).await.unwrap();
        sink.send(&Frame::Idle).await.unwrap();

        assert_eq!(source.next().await.unwrap(), Some(sent));
        assert_eq!(source.next().await.unwrap(), Some(Frame::Idle));
    }

    #[tokio::test]
    async fn eof_yields_none() {
        let (client, server) = tokio::io::duplex(1024);
        drop(client);
        let (read_half, _w) = tokio::io::split(server);
        let mut source = FrameSource::new(read_half);
        assert_eq!(source.next().await.unwrap(), None);
    }
}
