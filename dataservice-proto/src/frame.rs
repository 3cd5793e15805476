//! Length-prefixed request/response framing (§4.5).
//!
//! Request frame on the wire: `{ u32 size, u32 method, payload[size-4] }`
//! where `size` is the big-endian length of `method + payload`.
//!
//! Response frame on the wire: `{ u32 size, u32 method, u32 offset,
//! u32 status, payload[size-12] }`.

use dataservice_base::{StatusCode, StatusResult};

/// A decoded request: the method code and its raw payload bytes. Methods
/// that operate on a child context encode `{ u32 child_index, ... }` as
/// the leading four bytes of `payload`; see [`decode_child_index`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Request {
    pub method: u32,
    pub payload: Vec<u8>,
}

impl Request {
    /// Decodes `method + payload` (the bytes after the frame's length
    /// prefix, which the transport layer strips before calling this).
    pub fn decode(buf: &[u8]) -> StatusResult<Request> {
        if buf.len() < 4 {
            return Err(StatusCode::RequestPacketInvalidSize);
        }
        let method = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        Ok(Request {
            method,
            payload: buf[4..].to_vec(),
        })
    }
}

/// Child-context-scoped payload prefix: `{ u32 child_index, ... }`.
/// Returns the child index and the remaining handler-specific bytes.
pub fn decode_child_index(payload: &[u8]) -> StatusResult<(u32, &[u8])> {
    if payload.len() < 4 {
        return Err(StatusCode::RequestPacketInvalidSize);
    }
    let child_index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    Ok((child_index, &payload[4..]))
}

/// A response frame, ready to serialize onto the wire.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Response {
    pub method: u32,
    pub offset: u32,
    pub status: StatusCode,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn success(method: u32, offset: u32, payload: Vec<u8>) -> Response {
        Response {
            method,
            offset,
            status: StatusCode::Success,
            payload,
        }
    }

    pub fn error(method: u32, offset: u32, status: StatusCode) -> Response {
        Response {
            method,
            offset,
            status,
            payload: Vec::new(),
        }
    }

    /// Encodes the full frame, including its own length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = 12 + self.payload.len();
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.extend_from_slice(&self.method.to_be_bytes());
        out.extend_from_slice(&self.offset.to_be_bytes());
        out.extend_from_slice(&(self.status as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Incrementally extracts complete length-prefixed frames from a byte
/// buffer, matching the event loop's read-callback drain pattern: keep
/// calling this until it returns `None`, then keep whatever's left for
/// the next read.
pub fn take_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    if buf.len() < 4 {
        return None;
    }
    let size = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    let total = 4 + size;
    if buf.len() < total {
        return None;
    }
    Some((&buf[4..total], total))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_decode_requires_method() {
        assert_eq!(
            Request::decode(&[0, 1]).unwrap_err(),
            StatusCode::RequestPacketInvalidSize
        );
    }

    #[test]
    fn request_decode_splits_method_and_payload() {
        let mut buf = 7u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[1, 2, 3]);
        let req = Request::decode(&buf).unwrap();
        assert_eq!(req.method, 7);
        assert_eq!(req.payload, vec![1, 2, 3]);
    }

    #[test]
    fn child_index_prefix_round_trip() {
        let mut payload = 9u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"rest");
        let (idx, rest) = decode_child_index(&payload).unwrap();
        assert_eq!(idx, 9);
        assert_eq!(rest, b"rest");
    }

    #[test]
    fn response_encode_layout() {
        let resp = Response::success(3, 1, vec![0xAB]);
        let buf = resp.encode();
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), 13);
        assert_eq!(u32::from_be_bytes(buf[4..8].try_into().unwrap()), 3);
        assert_eq!(u32::from_be_bytes(buf[8..12].try_into().unwrap()), 1);
        assert_eq!(u32::from_be_bytes(buf[12..16].try_into().unwrap()), 0);
        assert_eq!(&buf[16..], &[0xAB]);
    }

    #[test]
    fn take_frame_waits_for_full_frame() {
        let resp = Response::error(1, 0, StatusCode::NotFound);
        let encoded = resp.encode();
        assert!(take_frame(&encoded[..encoded.len() - 1]).is_none());
        let (frame, consumed) = take_frame(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(frame.len(), encoded.len() - 4);
    }
}
