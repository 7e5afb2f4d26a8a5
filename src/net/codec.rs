//! Big-endian "data stream" framing
//!
//! Single-byte `u8`/`bool`, big-endian `i32`/`i64`, and strings as a big-endian `u16` byte
//! length followed by modified UTF-8 (NUL as `C0 80`, supplementary characters as surrogate
//! pairs of three bytes each).

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode a string as modified UTF-8.
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Decode modified UTF-8 bytes.
pub fn decode_modified_utf8(bytes: &[u8]) -> io::Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b2 = continuation(bytes, i + 1)?;
            units.push((u16::from(b & 0x1F) << 6) | u16::from(b2 & 0x3F));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b2 = continuation(bytes, i + 1)?;
            let b3 = continuation(bytes, i + 2)?;
            units.push(
                (u16::from(b & 0x0F) << 12) | (u16::from(b2 & 0x3F) << 6) | u16::from(b3 & 0x3F),
            );
            i += 3;
        } else {
            return Err(malformed(i));
        }
    }
    String::from_utf16(&units).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn continuation(bytes: &[u8], at: usize) -> io::Result<u8> {
    match bytes.get(at) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b),
        _ => Err(malformed(at)),
    }
}

fn malformed(at: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed modified UTF-8 at byte {}", at),
    )
}

async fn bounded<T>(limit: Option<Duration>, op: impl Future<Output = io::Result<T>>) -> io::Result<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
        None => op.await,
    }
}

/// Framed reader with an optional per-read timeout
pub struct WireReader<R> {
    inner: R,
    timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `None` blocks indefinitely on every read.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub async fn read_u8(&mut self) -> io::Result<u8> {
        bounded(self.timeout, self.inner.read_u8()).await
    }

    pub async fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8().await? != 0)
    }

    pub async fn read_i32(&mut self) -> io::Result<i32> {
        bounded(self.timeout, self.inner.read_i32()).await
    }

    pub async fn read_i64(&mut self) -> io::Result<i64> {
        bounded(self.timeout, self.inner.read_i64()).await
    }

    pub async fn read_utf(&mut self) -> io::Result<String> {
        let timeout = self.timeout;
        let inner = &mut self.inner;
        bounded(timeout, async move {
            let len = inner.read_u16().await?;
            let mut buf = vec![0u8; usize::from(len)];
            inner.read_exact(&mut buf).await?;
            decode_modified_utf8(&buf)
        })
        .await
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Framed writer. Callers flush once per logical message.
pub struct WireWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_u8(&mut self, value: u8) -> io::Result<()> {
        self.inner.write_u8(value).await
    }

    pub async fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.inner.write_u8(u8::from(value)).await
    }

    pub async fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.inner.write_i32(value).await
    }

    pub async fn write_i64(&mut self, value: i64) -> io::Result<()> {
        self.inner.write_i64(value).await
    }

    pub async fn write_utf(&mut self, value: &str) -> io::Result<()> {
        let encoded = encode_modified_utf8(value);
        let len = u16::try_from(encoded.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("string of {} encoded bytes is too long to frame", encoded.len()),
            )
        })?;
        self.inner.write_u16(len).await?;
        self.inner.write_all(&encoded).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_utf8_ascii() {
        assert_eq!(encode_modified_utf8("abc"), b"abc");
    }

    #[test]
    fn test_modified_utf8_nul_and_two_byte() {
        assert_eq!(encode_modified_utf8("\0"), vec![0xC0, 0x80]);
        assert_eq!(encode_modified_utf8("é"), vec![0xC3, 0xA9]);
        assert_eq!(decode_modified_utf8(&[0xC0, 0x80]).unwrap(), "\0");
    }

    #[test]
    fn test_modified_utf8_supplementary() {
        let encoded = encode_modified_utf8("😀");
        assert_eq!(encoded, vec![0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80]);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), "😀");
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert!(decode_modified_utf8(&[0xE2, 0x82]).is_err());
        assert!(decode_modified_utf8(&[0xFF]).is_err());
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let mut writer = WireWriter::new(Vec::new());
        writer.write_i64(1).await.unwrap();
        writer.write_i32(-2).await.unwrap();
        writer.write_bool(true).await.unwrap();
        writer.write_utf("Essentials").await.unwrap();
        let bytes = writer.into_inner();

        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..12], &[0xFF, 0xFF, 0xFF, 0xFE]);
        assert_eq!(bytes[12], 1);
        assert_eq!(&bytes[13..15], &[0, 10]);
        assert_eq!(&bytes[15..], b"Essentials");

        let mut reader = WireReader::new(bytes.as_slice());
        assert_eq!(reader.read_i64().await.unwrap(), 1);
        assert_eq!(reader.read_i32().await.unwrap(), -2);
        assert!(reader.read_bool().await.unwrap());
        assert_eq!(reader.read_utf().await.unwrap(), "Essentials");
        assert_eq!(
            reader.read_u8().await.unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[tokio::test]
    async fn test_write_utf_rejects_oversized() {
        let mut writer = WireWriter::new(Vec::new());
        let long = "x".repeat(70_000);
        let err = writer.write_utf(&long).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut reader = WireReader::new(client).with_timeout(Some(Duration::from_secs(5)));
        let err = reader.read_i64().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
