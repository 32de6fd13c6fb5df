//! Wire format for a single file transfer.
//!
//! Every connection carries exactly one file:
//!
//! ```text
//! +----------------------+-------------------+---------------------------+
//! | name (260 bytes)     | size (8 bytes)    | payload (until EOF)       |
//! | zero padded, UTF-8   | i64 little endian | raw bytes, unframed       |
//! +----------------------+-------------------+---------------------------+
//! ```
//!
//! The field widths and byte order are fixed; changing them breaks every
//! existing peer. The declared size is advisory: the receiver only compares
//! it against the bytes it actually saw once the sender closes the stream.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the zero-padded name field.
pub const NAME_FIELD_LEN: usize = 260;

/// Width of the little-endian size field.
pub const SIZE_FIELD_LEN: usize = 8;

/// Total header length on the wire.
pub const HEADER_LEN: usize = NAME_FIELD_LEN + SIZE_FIELD_LEN;

/// Transfer header: the file name and its declared size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub size: i64,
}

/// Header encoding and reading errors
#[derive(Debug)]
pub enum HeaderError {
    /// Peer closed the stream before a full header arrived
    Truncated { expected: usize, received: usize },
    /// Name contains a zero byte and would not survive decoding
    NameContainsNul,
    /// Transport failure while reading or writing the header
    Io(io::Error),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::Truncated { expected, received } => write!(
                f,
                "Header truncated: expected {} bytes, received {}",
                expected, received
            ),
            HeaderError::NameContainsNul => write!(f, "File name contains a zero byte"),
            HeaderError::Io(e) => write!(f, "Header I/O error: {}", e),
        }
    }
}

impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeaderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HeaderError {
    fn from(e: io::Error) -> Self {
        HeaderError::Io(e)
    }
}

impl Header {
    /// Build a header, rejecting names with an embedded zero byte.
    pub fn new(name: impl Into<String>, size: i64) -> Result<Self, HeaderError> {
        let name = name.into();
        if name.as_bytes().contains(&0) {
            return Err(HeaderError::NameContainsNul);
        }
        Ok(Header { name, size })
    }

    /// Encode into the fixed wire layout.
    ///
    /// Names wider than the field are cut at the last character boundary
    /// that fits, so the encoded name is always valid UTF-8.
    pub fn encode(&self) -> BytesMut {
        let name = truncate_to_field(&self.name);

        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(name.as_bytes());
        buf.put_bytes(0, NAME_FIELD_LEN - name.len());
        buf.put_i64_le(self.size);
        buf
    }

    /// Decode from exactly `HEADER_LEN` bytes.
    ///
    /// Only trailing zero bytes are stripped from the name; the size is taken
    /// as-is, negative or not.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let (name_field, size_field) = buf.split_at(NAME_FIELD_LEN);

        let end = name_field
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1);
        let name = String::from_utf8_lossy(&name_field[..end]).into_owned();

        let mut size_bytes = [0u8; SIZE_FIELD_LEN];
        size_bytes.copy_from_slice(size_field);

        Header {
            name,
            size: i64::from_le_bytes(size_bytes),
        }
    }
}

fn truncate_to_field(name: &str) -> &str {
    if name.len() <= NAME_FIELD_LEN {
        return name;
    }
    let mut end = NAME_FIELD_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Read a complete header from the stream.
///
/// Unlike `read_exact`, a short read reports how many bytes did arrive.
pub async fn read_header<R>(reader: &mut R) -> Result<Header, HeaderError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_LEN];
    let mut filled = 0;

    while filled < HEADER_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(HeaderError::Truncated {
                expected: HEADER_LEN,
                received: filled,
            });
        }
        filled += n;
    }

    Ok(Header::decode(&buf))
}

/// Write an encoded header to the stream.
pub async fn write_header<W>(writer: &mut W, header: &Header) -> Result<(), HeaderError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&header.encode()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn test_encode_layout() {
        let header = Header::new("test.dat", 1040).unwrap();
        let buf = header.encode();

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..8], b"test.dat");
        assert!(buf[8..NAME_FIELD_LEN].iter().all(|&b| b == 0));
        assert_eq!(&buf[NAME_FIELD_LEN..], &1040i64.to_le_bytes());
    }

    #[test]
    fn test_decode_roundtrip() {
        for (name, size) in [("a", 0i64), ("2024_01_02_03_04_05.dat_10001", 1_144_000)] {
            let header = Header::new(name, size).unwrap();
            let encoded: [u8; HEADER_LEN] = header.encode()[..].try_into().unwrap();
            assert_eq!(Header::decode(&encoded), header);
        }
    }

    #[test]
    fn test_decode_keeps_negative_size() {
        let mut buf = [0u8; HEADER_LEN];
        buf[..1].copy_from_slice(b"x");
        buf[NAME_FIELD_LEN..].copy_from_slice(&(-5i64).to_le_bytes());

        let header = Header::decode(&buf);
        assert_eq!(header.name, "x");
        assert_eq!(header.size, -5);
    }

    #[test]
    fn test_decode_strips_only_trailing_zeros() {
        let mut buf = [0u8; HEADER_LEN];
        buf[..5].copy_from_slice(b"ab\0cd");

        assert_eq!(Header::decode(&buf).name, "ab\0cd");
    }

    #[test]
    fn test_name_with_nul_rejected() {
        assert!(matches!(
            Header::new("bad\0name", 1),
            Err(HeaderError::NameContainsNul)
        ));
    }

    #[test]
    fn test_long_name_truncated_on_char_boundary() {
        // 'é' is two bytes; 131 of them straddle the 260 byte boundary
        let name: String = std::iter::repeat('é').take(131).collect();
        let header = Header::new(name, 7).unwrap();
        let encoded: [u8; HEADER_LEN] = header.encode()[..].try_into().unwrap();

        let decoded = Header::decode(&encoded);
        assert_eq!(decoded.name.chars().count(), 130);
        assert_eq!(decoded.size, 7);
    }

    #[tokio::test]
    async fn test_read_header_across_chunks() {
        let encoded = Header::new("chunked.dat", 42).unwrap().encode();
        let mut reader = Builder::new()
            .read(&encoded[..100])
            .read(&encoded[100..263])
            .read(&encoded[263..])
            .build();

        let header = read_header(&mut reader).await.unwrap();
        assert_eq!(header.name, "chunked.dat");
        assert_eq!(header.size, 42);
    }

    #[tokio::test]
    async fn test_read_header_truncated() {
        let encoded = Header::new("short.dat", 42).unwrap().encode();
        let mut reader = Builder::new().read(&encoded[..200]).build();

        match read_header(&mut reader).await {
            Err(HeaderError::Truncated { expected, received }) => {
                assert_eq!(expected, HEADER_LEN);
                assert_eq!(received, 200);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_write_header() {
        let header = Header::new("out.dat", 9).unwrap();
        let expected = header.encode();
        let mut writer = Builder::new().write(&expected).build();

        write_header(&mut writer, &header).await.unwrap();
    }
}
