//! Rewrites the manifest of an encoded `InstallReleaseRequest` in place.
//!
//! The request is walked at the protobuf wire level rather than decoded into generated types:
//! every field other than the manifest is copied byte-for-byte, so chart, config and hook
//! payloads reach Rudder exactly as Tiller sent them.

use bytes::{Bytes, BytesMut};
use prost::encoding::{decode_key, decode_varint, encode_key, encode_varint, WireType};
use thiserror::Error;

/// `hapi.services.rudder.InstallReleaseRequest.release`
const RELEASE: u32 = 1;

/// `hapi.release.Release.manifest`
const MANIFEST: u32 = 5;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed release message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("malformed release message: field length exceeds message")]
    Truncated,

    #[error("malformed release message: groups are not supported")]
    Group,

    #[error("release manifest is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error(transparent)]
    Mutate(#[from] rudder_proxy_core::Error),
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        match error {
            Error::Mutate(e) if e.is_config() => Self::failed_precondition(e.to_string()),
            Error::Mutate(e) if e.is_decode() => Self::invalid_argument(e.to_string()),
            e => Self::internal(e.to_string()),
        }
    }
}

/// Applies `f` to the release manifest of an encoded `InstallReleaseRequest`.
///
/// A request without a release, or a release without a manifest, is returned unchanged.
pub fn map_manifest<F>(request: &[u8], mut f: F) -> Result<Bytes, Error>
where
    F: FnMut(&str) -> Result<String, rudder_proxy_core::Error>,
{
    let mut out = BytesMut::with_capacity(request.len());
    map_field(request, &[RELEASE, MANIFEST], &mut f, &mut out)?;
    Ok(out.freeze())
}

/// Copies `msg` into `out`, replacing each occurrence of the string field at `path`.
fn map_field<F>(msg: &[u8], path: &[u32], f: &mut F, out: &mut BytesMut) -> Result<(), Error>
where
    F: FnMut(&str) -> Result<String, rudder_proxy_core::Error>,
{
    let (tag, rest) = match path.split_first() {
        Some((tag, rest)) => (*tag, rest),
        None => {
            out.extend_from_slice(msg);
            return Ok(());
        }
    };

    let mut buf = msg;
    while !buf.is_empty() {
        let start = msg.len() - buf.len();
        let (field, wire_type) = decode_key(&mut buf)?;

        if field != tag || wire_type != WireType::LengthDelimited {
            skip(wire_type, &mut buf)?;
            let end = msg.len() - buf.len();
            out.extend_from_slice(&msg[start..end]);
            continue;
        }

        let value = length_delimited(&mut buf)?;
        let mapped = if rest.is_empty() {
            let value = std::str::from_utf8(value)?;
            Bytes::from(f(value)?)
        } else {
            let mut nested = BytesMut::with_capacity(value.len());
            map_field(value, rest, f, &mut nested)?;
            nested.freeze()
        };
        encode_key(field, WireType::LengthDelimited, out);
        encode_varint(mapped.len() as u64, out);
        out.extend_from_slice(&mapped);
    }

    Ok(())
}

fn length_delimited<'m>(buf: &mut &'m [u8]) -> Result<&'m [u8], Error> {
    let len = decode_varint(buf)?;
    let len = usize::try_from(len).map_err(|_| Error::Truncated)?;
    if len > buf.len() {
        return Err(Error::Truncated);
    }
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Ok(value)
}

fn skip(wire_type: WireType, buf: &mut &[u8]) -> Result<(), Error> {
    let len = match wire_type {
        WireType::Varint => {
            decode_varint(buf)?;
            return Ok(());
        }
        WireType::SixtyFourBit => 8,
        WireType::ThirtyTwoBit => 4,
        WireType::LengthDelimited => {
            length_delimited(buf)?;
            return Ok(());
        }
        WireType::StartGroup | WireType::EndGroup => return Err(Error::Group),
    };
    if len > buf.len() {
        return Err(Error::Truncated);
    }
    *buf = &buf[len..];
    Ok(())
}
