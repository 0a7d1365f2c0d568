//! Payload decoding: gzip detection, decompression, UTF-8 decode.

use flate2::read::GzDecoder;
use std::io::Read;

use crate::error::FeedError;

/// Gzip magic bytes. The `.gz` extension upstream is not trustworthy: some
/// chains publish plain XML under a `.gz` name, so detection is by content.
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Decompress (when gzip) and decode raw file bytes to XML text.
///
/// A truncated or corrupt gzip stream and non-UTF-8 content both surface as
/// [`FeedError::Decode`]; the caller skips the file and keeps the run alive.
pub fn decode_payload(bytes: &[u8]) -> Result<String, FeedError> {
    let raw = if is_gzip(bytes) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| FeedError::Decode(format!("gzip: {e}")))?;
        out
    } else {
        bytes.to_vec()
    };

    let text = String::from_utf8(raw).map_err(|e| FeedError::Decode(format!("utf-8: {e}")))?;
    // Some chains emit a BOM; strip it so the XML reader sees the prolog.
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gz(data: &str) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data.as_bytes()).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn decompresses_gzip_payloads() {
        let xml = "<Root><Items/></Root>";
        assert_eq!(decode_payload(&gz(xml)).unwrap(), xml);
    }

    #[test]
    fn passes_plain_text_through_despite_gz_name() {
        // Detection is by magic bytes, not filename; plain XML is accepted.
        let xml = "<Root/>";
        assert_eq!(decode_payload(xml.as_bytes()).unwrap(), xml);
    }

    #[test]
    fn truncated_gzip_is_a_decode_error() {
        let mut bytes = gz("<Root>lots of content to make a few blocks</Root>");
        bytes.truncate(bytes.len() / 2);
        let err = decode_payload(&bytes).unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let err = decode_payload(&[0xff, 0xfe, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, FeedError::Decode(_)));
    }

    #[test]
    fn strips_leading_bom() {
        let with_bom = "\u{feff}<Root/>";
        assert_eq!(decode_payload(with_bom.as_bytes()).unwrap(), "<Root/>");
    }
}
