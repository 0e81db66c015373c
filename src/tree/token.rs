//! Apply token: the generation tag attached to nodes a compiled view produced.
//!
//! The token persists with the tree between requests, so it has a fixed
//! binary layout: the alias as a u16-length-prefixed UTF-8 string, then the
//! expiry as a big-endian i64.

use std::io::{self, Read, Write};

use crate::core::Millis;

/// Which compiled view produced a node, and until when that application is
/// considered current.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApplyToken {
    pub alias: String,
    pub expires_at: Millis,
}

impl ApplyToken {
    pub fn new(alias: impl Into<String>, expires_at: Millis) -> Self {
        Self {
            alias: alias.into(),
            expires_at,
        }
    }

    /// A node is stale for `alias` if it was applied by that alias and its
    /// token ran out before the view applying now was compiled.
    #[inline]
    pub fn is_stale_for(&self, alias: &str, created_at: Millis) -> bool {
        self.expires_at < created_at && self.alias == alias
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let bytes = self.alias.as_bytes();
        let len = u16::try_from(bytes.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "alias longer than 65535 bytes")
        })?;
        out.write_all(&len.to_be_bytes())?;
        out.write_all(bytes)?;
        out.write_all(&self.expires_at.to_be_bytes())
    }

    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let mut len = [0u8; 2];
        input.read_exact(&mut len)?;
        let mut alias = vec![0u8; usize::from(u16::from_be_bytes(len))];
        input.read_exact(&mut alias)?;
        let alias = String::from_utf8(alias)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut time = [0u8; 8];
        input.read_exact(&mut time)?;
        Ok(Self {
            alias,
            expires_at: i64::from_be_bytes(time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_layout() {
        let token = ApplyToken::new("/a.xhtml", 0x0102);
        let mut buf = Vec::new();
        token.write_to(&mut buf).unwrap();

        assert_eq!(&buf[..2], &[0, 8]);
        assert_eq!(&buf[2..10], b"/a.xhtml");
        assert_eq!(&buf[10..], &[0, 0, 0, 0, 0, 0, 1, 2]);

        let back = ApplyToken::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_truncated_input_fails() {
        let token = ApplyToken::new("/page.xhtml", 42);
        let mut buf = Vec::new();
        token.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        assert!(ApplyToken::read_from(&mut buf.as_slice()).is_err());
    }

    #[test]
    fn test_staleness() {
        let token = ApplyToken::new("/a.xhtml", 1_000);
        assert!(token.is_stale_for("/a.xhtml", 2_000));
        assert!(!token.is_stale_for("/a.xhtml", 1_000));
        assert!(!token.is_stale_for("/b.xhtml", 2_000));
    }
}
