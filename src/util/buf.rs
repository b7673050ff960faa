//! Helpers for application payload codecs: strings are written as UTF-8 with a u16 BE byte
//!  length prefix.

use anyhow::bail;
use bytes::{Buf, BufMut};

pub fn put_string(buf: &mut impl BufMut, s: &str) -> anyhow::Result<()> {
    let Ok(len) = u16::try_from(s.len()) else {
        bail!("string of {} bytes is too long", s.len());
    };
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let len = buf.try_get_u16()? as usize;
    if buf.remaining() < len {
        bail!("string length {} exceeds remaining buffer of {} bytes", len, buf.remaining());
    }

    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(String::from_utf8(raw)?)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::empty("", vec![0,0])]
    #[case::a("a", vec![0,1,97])]
    #[case::abc("abc", vec![0,3,97,98,99])]
    #[case::umlaut("ä", vec![0,2,0xc3,0xa4])]
    #[case::heart("❤️", vec![0,6, 226,157,164,239,184,143])]
    fn test_put_string(#[case] s: &str, #[case] expected: Vec<u8>) {
        let mut buf = BytesMut::new();
        put_string(&mut buf, s).unwrap();
        assert_eq!(buf.as_ref(), expected.as_slice());

        let mut b: &[u8] = &buf;
        assert_eq!(try_get_string(&mut b).unwrap(), s);
        assert!(b.is_empty());
    }

    #[test]
    fn test_put_string_too_long() {
        let s = "x".repeat(70_000);
        assert!(put_string(&mut BytesMut::new(), &s).is_err());
    }

    #[rstest]
    #[case::no_len(vec![0])]
    #[case::truncated(vec![0,3,97,98])]
    #[case::invalid_utf8(vec![0,1,0xff])]
    fn test_try_get_string_invalid(#[case] raw: Vec<u8>) {
        let mut b: &[u8] = &raw;
        assert!(try_get_string(&mut b).is_err());
    }
}
