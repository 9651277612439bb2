use bytes::{Bytes, BytesMut};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Chat lines are short; anything past this is a misbehaving peer.
pub const MAX_LINE_LEN: usize = 1024;

/// Reads LF- or CRLF-delimited lines from an `AsyncRead`.
///
/// The terminator is stripped. A peer that streams more than
/// `max_line_len` bytes without a newline gets an `InvalidData` error,
/// which callers treat as connection-fatal.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: R,
    buf: BytesMut,
    max_line_len: usize,
}

impl<R> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_LINE_LEN),
            max_line_len: MAX_LINE_LEN,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Read the next line (may be empty).
    ///
    /// Returns `Ok(None)` on clean EOF with no buffered data; EOF in the
    /// middle of a line is an `UnexpectedEof` error.
    pub async fn next_line(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let mut line = self.buf.split_to(i + 1).freeze();
                let mut end = line.len() - 1;
                if end > 0 && line[end - 1] == b'\r' {
                    end -= 1;
                }
                line.truncate(end);
                return Ok(Some(line));
            }

            if self.buf.len() > self.max_line_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "line too long",
                ));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "eof while reading line",
                ));
            }
        }
    }
}

/// Encode one outbound line, CRLF-terminated.
pub fn encode_line(text: &str) -> Bytes {
    let mut b = BytesMut::with_capacity(text.len() + 2);
    b.extend_from_slice(text.as_bytes());
    b.extend_from_slice(b"\r\n");
    b.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn reads_lf_and_crlf() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"hello\r\nworld\n\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        assert_eq!(&lr.next_line().await.unwrap().unwrap()[..], b"hello");
        assert_eq!(&lr.next_line().await.unwrap().unwrap()[..], b"world");
        assert_eq!(&lr.next_line().await.unwrap().unwrap()[..], b"");
        assert!(lr.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_split_across_reads() {
        let (a, b) = tokio::io::duplex(4);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"alice > hi there\n").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let line = lr.next_line().await.unwrap().unwrap();
        assert_eq!(&line[..], b"alice > hi there");
    }

    #[tokio::test]
    async fn overlong_line_is_an_error() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            let _ = b.write_all(&[b'x'; 64]).await;
        });

        let mut lr = LineReader::new(a).max_line_len(16);
        let err = lr.next_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn eof_mid_line_is_an_error() {
        let (a, b) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut b = b;
            b.write_all(b"no newline").await.unwrap();
        });

        let mut lr = LineReader::new(a);
        let err = lr.next_line().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn encode_appends_crlf() {
        assert_eq!(&encode_line("bob > hi")[..], b"bob > hi\r\n");
        assert_eq!(&encode_line("")[..], b"\r\n");
    }
}
