use async_compression::tokio::bufread::GzipDecoder;
use bytes::Bytes;
use std::io::Read;
use tokio::io::AsyncReadExt;

use crate::SourceError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Lz4,
    Plain,
}

/// Extension wins; payloads without a recognized extension are sniffed by
/// magic bytes so a mislabeled object still decodes.
fn detect(key: &str, payload: &[u8]) -> Codec {
    if key.ends_with(".gz") {
        return Codec::Gzip;
    }
    if key.ends_with(".lz4") {
        return Codec::Lz4;
    }
    if payload.starts_with(&GZIP_MAGIC) {
        return Codec::Gzip;
    }
    if payload.starts_with(&LZ4_MAGIC) {
        return Codec::Lz4;
    }
    Codec::Plain
}

/// Decompress one fetched object. Corrupt payloads surface as
/// `SourceError::Decode`; callers treat that as a per-block failure.
pub async fn decode_payload(key: &str, payload: Bytes) -> Result<Bytes, SourceError> {
    match detect(key, &payload) {
        Codec::Plain => Ok(payload),
        Codec::Gzip => {
            let mut decoder = GzipDecoder::new(&payload[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .await
                .map_err(|err| SourceError::Decode(format!("{key}: gzip: {err}")))?;
            Ok(Bytes::from(out))
        }
        Codec::Lz4 => {
            let mut decoder = lz4_flex::frame::FrameDecoder::new(&payload[..]);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|err| SourceError::Decode(format!("{key}: lz4: {err}")))?;
            Ok(Bytes::from(out))
        }
    }
}
