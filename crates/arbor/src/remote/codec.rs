//! Wire encoding.
//!
//! A frame on the wire is a big-endian `u32` length followed by that many bytes.
//! A zero length is the close sentinel. The body is:
//!
//! ```text
//! u16 target length | target | u16 sender length (0 = none) | sender | payload
//! ```
//!
//! Payload bytes come from a pluggable [`WireCodec`]. The default [`JsonCodec`]
//! writes `{"type": <tag>, "body": <value>}` for types registered under a tag.

use crate::error::{CodecError, TransportError};
use crate::message::{Message, Payload, PoisonPill, Terminated};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Turns payloads into bytes and back.
pub trait WireCodec: Send + Sync + 'static {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError>;
}

type EncodeFn = Arc<dyn Fn(&Payload) -> Result<serde_json::Value, CodecError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(serde_json::Value) -> Result<Payload, CodecError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_type: HashMap<TypeId, (String, EncodeFn)>,
    by_tag: HashMap<String, DecodeFn>,
}

#[derive(Serialize, Deserialize)]
struct Tagged {
    #[serde(rename = "type")]
    tag: String,
    body: serde_json::Value,
}

/// JSON payload codec with an explicit type registry.
///
/// ```rust
/// use arbor::{JsonCodec, Payload, WireCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, PartialEq, Serialize, Deserialize)]
/// struct Ping { seq: u32 }
///
/// let codec = JsonCodec::new().with_type::<Ping>("ping");
/// let bytes = codec.encode(&Payload::new(Ping { seq: 1 })).unwrap();
/// let back = codec.decode(&bytes).unwrap();
/// assert_eq!(back.downcast_ref::<Ping>(), Some(&Ping { seq: 1 }));
/// ```
pub struct JsonCodec {
    registry: RwLock<Registry>,
}

impl JsonCodec {
    /// A codec that already knows the runtime's own wire messages.
    pub fn new() -> Self {
        let codec = JsonCodec {
            registry: RwLock::new(Registry::default()),
        };
        codec.register::<PoisonPill>("arbor.PoisonPill");
        codec.register::<Terminated>("arbor.Terminated");
        codec
    }

    pub fn with_type<T>(self, tag: &str) -> Self
    where
        T: Message + Serialize + DeserializeOwned,
    {
        self.register::<T>(tag);
        self
    }

    pub fn register<T>(&self, tag: &str)
    where
        T: Message + Serialize + DeserializeOwned,
    {
        let encode: EncodeFn = Arc::new(|payload: &Payload| -> Result<serde_json::Value, CodecError> {
            let value = payload
                .downcast_ref::<T>()
                .ok_or(CodecError::UnregisteredType(payload.type_name()))?;
            Ok(serde_json::to_value(value)?)
        });
        let decode: DecodeFn = Arc::new(|value: serde_json::Value| -> Result<Payload, CodecError> {
            Ok(Payload::new(serde_json::from_value::<T>(value)?))
        });

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry
            .by_type
            .insert(TypeId::of::<T>(), (tag.to_string(), encode));
        registry.by_tag.insert(tag.to_string(), decode);
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl WireCodec for JsonCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>, CodecError> {
        let (tag, encode) = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .by_type
                .get(&payload.type_id())
                .cloned()
                .ok_or(CodecError::UnregisteredType(payload.type_name()))?
        };
        let body = encode(payload)?;
        Ok(serde_json::to_vec(&Tagged { tag, body })?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Payload, CodecError> {
        let Tagged { tag, body } = serde_json::from_slice(bytes)?;
        let decode = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry.by_tag.get(&tag).cloned()
        };
        match decode {
            Some(decode) => decode(body),
            None => Err(CodecError::UnknownTypeTag(tag)),
        }
    }
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WireEnvelope {
    pub(crate) target: String,
    pub(crate) sender: Option<String>,
    pub(crate) payload: Bytes,
}

/// Builds a complete frame, length prefix included.
pub(crate) fn encode_frame(
    target: &str,
    sender: Option<&str>,
    payload: &[u8],
    max_frame_size: usize,
) -> Result<Bytes, TransportError> {
    let sender = sender.unwrap_or("");
    if target.len() > u16::MAX as usize || sender.len() > u16::MAX as usize {
        return Err(CodecError::Malformed("path longer than 65535 bytes".to_string()).into());
    }
    let body_len = 2 + target.len() + 2 + sender.len() + payload.len();
    if body_len > max_frame_size || body_len > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge(body_len));
    }

    let mut frame = BytesMut::with_capacity(4 + body_len);
    frame.put_u32(body_len as u32);
    frame.put_u16(target.len() as u16);
    frame.put_slice(target.as_bytes());
    frame.put_u16(sender.len() as u16);
    frame.put_slice(sender.as_bytes());
    frame.put_slice(payload);
    Ok(frame.freeze())
}

/// The four-byte close sentinel.
pub(crate) fn close_frame() -> Bytes {
    Bytes::from_static(&[0, 0, 0, 0])
}

pub(crate) fn decode_body(mut body: Bytes) -> Result<WireEnvelope, CodecError> {
    let target = read_str(&mut body, "target")?;
    let sender = read_str(&mut body, "sender")?;
    Ok(WireEnvelope {
        target,
        sender: (!sender.is_empty()).then_some(sender),
        payload: body,
    })
}

fn read_str(body: &mut Bytes, field: &str) -> Result<String, CodecError> {
    if body.remaining() < 2 {
        return Err(CodecError::Malformed(format!("truncated {field} length")));
    }
    let len = body.get_u16() as usize;
    if body.remaining() < len {
        return Err(CodecError::Malformed(format!("truncated {field}")));
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::Malformed(format!("{field} is not UTF-8")))
}

/// Reads one frame body. `Ok(None)` is the close sentinel.
pub(crate) async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Bytes>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len == 0 {
        return Ok(None);
    }
    if len > max_frame_size {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Bytes::from(body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u64,
        item: String,
    }

    #[test]
    fn json_codec_uses_tagged_documents() {
        let codec = JsonCodec::new().with_type::<Order>("shop.Order");
        let bytes = codec
            .encode(&Payload::new(Order {
                id: 9,
                item: "lamp".into(),
            }))
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["type"], "shop.Order");
        assert_eq!(doc["body"]["item"], "lamp");
    }

    #[test]
    fn unregistered_types_are_rejected() {
        let codec = JsonCodec::new();
        let err = codec.encode(&Payload::new(42u32)).unwrap_err();
        assert!(matches!(err, CodecError::UnregisteredType(_)));

        let err = codec
            .decode(br#"{"type":"nope","body":null}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeTag(tag) if tag == "nope"));
    }

    #[test]
    fn runtime_messages_are_registered_by_default() {
        let codec = JsonCodec::default();
        let bytes = codec.encode(&Payload::new(PoisonPill)).unwrap();
        assert!(codec.decode(&bytes).unwrap().is::<PoisonPill>());
    }

    #[tokio::test]
    async fn test_frame_layout() {
        let frame = encode_frame("arbor://h:1/s/user/a/", Some("arbor://h:2/t/user/b/"), b"{}", 1024).unwrap();
        let mut reader = &frame[..];
        let body = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        let envelope = decode_body(body).unwrap();
        assert_eq!(envelope.target, "arbor://h:1/s/user/a/");
        assert_eq!(envelope.sender.as_deref(), Some("arbor://h:2/t/user/b/"));
        assert_eq!(&envelope.payload[..], b"{}");

        let no_sender = encode_frame("/x/", None, b"", 1024).unwrap();
        let mut reader = &no_sender[..];
        let body = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(decode_body(body).unwrap().sender, None);
    }

    #[tokio::test]
    async fn test_close_sentinel_and_size_limit() {
        let mut reader = &close_frame()[..];
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());

        let big = encode_frame("/x/", None, &[0u8; 64], 32);
        assert!(matches!(big, Err(TransportError::FrameTooLarge(_))));
    }
}
