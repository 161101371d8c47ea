use std::fmt::{self, Debug, Formatter};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_BUFFER: usize = 64 * 1024;

/// Forward-only byte stream returned by `read`.
///
/// The stream owns its source exclusively (buffer, file, response body or
/// S3 object body) and can be consumed once. Dropping it closes the source.
pub struct BlobStream {
    inner: BoxStream<'static, io::Result<Bytes>>,
    size: Option<u64>,
}

impl BlobStream {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = Some(data.len() as u64);
        Self { inner: stream::once(async move { Ok(data) }).boxed(), size }
    }

    pub fn from_stream<S>(source: S, size: Option<u64>) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self { inner: source.boxed(), size }
    }

    /// Streams an owned reader, e.g. an open file, in fixed-size chunks.
    pub fn from_reader<R>(reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let chunks = stream::try_unfold(reader, |mut reader| async move {
            let mut buf = vec![0u8; READ_BUFFER];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok::<_, io::Error>(Some((Bytes::from(buf), reader)))
        });
        Self::from_stream(chunks, size)
    }

    /// Length announced by the backend, when it knows it up front.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    /// Collects the whole stream. The announced size only seeds the buffer,
    /// up to one read buffer, since remote backends take it from a header.
    pub async fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let capacity = self.size.unwrap_or(0).min(READ_BUFFER as u64) as usize;
        let mut data = Vec::with_capacity(capacity);
        while let Some(chunk) = self.inner.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// Drains the stream into `writer` and returns the number of bytes copied.
    pub async fn copy_to<W>(mut self, writer: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut copied = 0u64;
        while let Some(chunk) = self.inner.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            copied += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(copied)
    }
}

impl Stream for BlobStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Debug for BlobStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream").field("size", &self.size).finish_non_exhaustive()
    }
}
