//! Binary wire encoding for documents and protocol packets.
//!
//! Documents travel as a compact, self-describing binary tree: every [`Value`] node is
//! written as a varint variant tag followed by its payload, using the
//! [`postcard`](https://docs.rs/postcard) format. Integers are zig-zag varints, strings
//! and containers are length-prefixed, so small sensor readings take only a few bytes.
//!
//! ## Functions
//!
//! - [`encode`] / [`decode`]: a value to/from an owned byte buffer
//! - [`encode_map`] / [`decode_map`]: the same for a map-rooted document
//! - [`encode_into`]: encodes into a fixed-capacity packet buffer
//! - [`encoded_len`]: measures a value without keeping the bytes
//!
//! ## Limitations
//!
//! - The decoder rejects trailing garbage only as far as the format can detect it; the
//!   link's own integrity checks are relied upon for bit errors.

use alloc::vec::Vec;

use heapless::Vec as PacketVec;

use crate::consts::MAX_PACKET_LEN_USIZE;
use crate::document::{Map, Value};
use crate::error::WireError;

/// A packet-sized, fixed-capacity byte buffer.
pub type PacketBuf = PacketVec<u8, MAX_PACKET_LEN_USIZE>;

/// Encodes a value into an owned buffer.
pub fn encode(value: &Value) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(value).map_err(WireError::Encode)
}

/// Encodes a map-rooted document into an owned buffer.
///
/// The output is byte-for-byte identical to encoding `Value::Map` of the same map, so a
/// peer can decode it with [`decode`] and inspect the root.
pub fn encode_map(map: &Map) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(&MapRef(map)).map_err(WireError::Encode)
}

/// Encodes a value into `buf`, replacing its contents.
///
/// Fails with [`WireError::Encode`] if the encoding does not fit in one packet.
pub fn encode_into(value: &Value, buf: &mut PacketBuf) -> Result<(), WireError> {
    buf.clear();
    buf.resize_default(MAX_PACKET_LEN_USIZE)
        .map_err(|_| WireError::Encode(postcard::Error::SerializeBufferFull))?;
    let used = postcard::to_slice(value, buf.as_mut_slice())
        .map_err(WireError::Encode)?
        .len();
    buf.truncate(used);
    Ok(())
}

/// Number of bytes `value` occupies on the wire.
pub fn encoded_len(value: &Value) -> Result<usize, WireError> {
    encode(value).map(|bytes| bytes.len())
}

/// Decodes a value.
pub fn decode(bytes: &[u8]) -> Result<Value, WireError> {
    postcard::from_bytes(bytes).map_err(WireError::Decode)
}

/// Decodes a map-rooted document.
pub fn decode_map(bytes: &[u8]) -> Result<Map, WireError> {
    match decode(bytes)? {
        Value::Map(m) => Ok(m),
        _ => Err(WireError::NotADocument),
    }
}

/// Serializes a borrowed map with the same tag `Value::Map` would use.
struct MapRef<'a>(&'a Map);

impl serde::Serialize for MapRef<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Variant index 6 is `Value::Map`.
        serializer.serialize_newtype_variant("Value", 6, "Map", self.0)
    }
}
