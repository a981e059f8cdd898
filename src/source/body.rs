//! Body accumulation and content decoding

use crate::source::CaptureError;
use bytes::{Bytes, BytesMut};
use derive_more::Display;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use http::header::CONTENT_ENCODING;
use http::HeaderMap;
use std::io::Read;

/// `content-encoding` values this crate decodes
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ContentEncoding {
    #[display("gzip")]
    Gzip,
    #[display("deflate")]
    Deflate,
    #[display("identity")]
    Identity,
}

impl ContentEncoding {
    /// Anything unrecognised (including `br`) is passed through as identity
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("gzip") | Some("x-gzip") => Self::Gzip,
            Some("deflate") => Self::Deflate,
            _ => Self::Identity,
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::from_header(
            headers
                .get(CONTENT_ENCODING)
                .and_then(|value| value.to_str().ok()),
        )
    }

    pub fn decode(self, data: Bytes) -> std::io::Result<Bytes> {
        if data.is_empty() {
            return Ok(data);
        }
        match self {
            Self::Identity => Ok(data),
            Self::Gzip => read_all(MultiGzDecoder::new(&data[..])),
            // Servers disagree on whether "deflate" carries the zlib wrapper
            Self::Deflate => read_all(ZlibDecoder::new(&data[..]))
                .or_else(|_| read_all(DeflateDecoder::new(&data[..]))),
        }
    }
}

fn read_all(mut reader: impl Read) -> std::io::Result<Bytes> {
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded)?;
    Ok(Bytes::from(decoded))
}

/// Collects the raw bytes of both bodies of one exchange
#[derive(Debug, Default)]
pub struct BodyAccumulator {
    request: BytesMut,
    response: BytesMut,
}

impl BodyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_request(&mut self, chunk: &[u8]) {
        self.request.extend_from_slice(chunk);
    }

    pub fn push_response(&mut self, chunk: &[u8]) {
        self.response.extend_from_slice(chunk);
    }

    pub fn request_len(&self) -> usize {
        self.request.len()
    }

    pub fn response_len(&self) -> usize {
        self.response.len()
    }

    /// Freeze both bodies, returning `(request, response)`.
    ///
    /// Only the response is decoded; the request is kept as captured.
    pub fn finish(
        self,
        response_encoding: ContentEncoding,
    ) -> Result<(Bytes, Bytes), CaptureError> {
        let response = response_encoding
            .decode(self.response.freeze())
            .map_err(|source| CaptureError::Decode {
                encoding: response_encoding,
                source,
            })?;
        Ok((self.request.freeze(), response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use rstest::rstest;
    use std::io::Write;

    const PAYLOAD: &[u8] = b"svc_res={\"api_result_msg\":\"ok\"}";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn raw_deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[rstest]
    #[case(Some("gzip"), ContentEncoding::Gzip)]
    #[case(Some("GZIP "), ContentEncoding::Gzip)]
    #[case(Some("x-gzip"), ContentEncoding::Gzip)]
    #[case(Some("deflate"), ContentEncoding::Deflate)]
    #[case(Some("br"), ContentEncoding::Identity)]
    #[case(Some("identity"), ContentEncoding::Identity)]
    #[case(None, ContentEncoding::Identity)]
    fn test_encoding_from_header(#[case] header: Option<&str>, #[case] expected: ContentEncoding) {
        assert_eq!(ContentEncoding::from_header(header), expected);
    }

    #[test]
    fn test_gzip_decodes() {
        let decoded = ContentEncoding::Gzip
            .decode(Bytes::from(gzip(PAYLOAD)))
            .unwrap();
        assert_eq!(&decoded[..], PAYLOAD);
    }

    #[test]
    fn test_deflate_accepts_zlib_and_raw_streams() {
        let wrapped = ContentEncoding::Deflate
            .decode(Bytes::from(zlib(PAYLOAD)))
            .unwrap();
        let raw = ContentEncoding::Deflate
            .decode(Bytes::from(raw_deflate(PAYLOAD)))
            .unwrap();
        assert_eq!(&wrapped[..], PAYLOAD);
        assert_eq!(&raw[..], PAYLOAD);
    }

    #[test]
    fn test_identity_passes_through() {
        let data = Bytes::from_static(b"\x1f\x8b not actually gzip");
        let decoded = ContentEncoding::Identity.decode(data.clone()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_malformed_gzip_is_an_error() {
        let result = ContentEncoding::Gzip.decode(Bytes::from_static(b"definitely not gzip"));
        assert!(result.is_err());
    }

    #[test]
    fn test_accumulator_concatenates_chunks() {
        let compressed = gzip(PAYLOAD);
        let (head, tail) = compressed.split_at(compressed.len() / 2);

        let mut accumulator = BodyAccumulator::new();
        accumulator.push_request(b"api_");
        accumulator.push_request(b"token=1");
        accumulator.push_response(head);
        accumulator.push_response(tail);
        assert_eq!(accumulator.request_len(), 11);

        let (request, response) = accumulator.finish(ContentEncoding::Gzip).unwrap();
        assert_eq!(&request[..], b"api_token=1");
        assert_eq!(&response[..], PAYLOAD);
    }

    #[test]
    fn test_decode_error_names_the_body() {
        let mut accumulator = BodyAccumulator::new();
        accumulator.push_response(b"garbage");
        let error = accumulator.finish(ContentEncoding::Gzip).unwrap_err();
        assert!(matches!(
            error,
            CaptureError::Decode {
                encoding: ContentEncoding::Gzip,
                ..
            }
        ));
    }

    #[test]
    fn test_request_body_is_kept_as_captured() {
        let mut accumulator = BodyAccumulator::new();
        accumulator.push_request(b"api_token=abc");
        accumulator.push_response(PAYLOAD);

        let (request, response) = accumulator.finish(ContentEncoding::Identity).unwrap();
        assert_eq!(&request[..], b"api_token=abc");
        assert_eq!(&response[..], PAYLOAD);
    }
}
