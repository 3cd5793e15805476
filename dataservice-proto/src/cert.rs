//! A minimal typed-field certificate codec.
//!
//! The data service never interprets certificate cryptography itself —
//! per its contract it consumes a parser library that hands back typed
//! fields (§1, §4.4 step 2). This module plays that role: certificates
//! are a flat sequence of `{ u16 tag, u32 len, value }` fields, and
//! [`BlockCertificate`] / [`TransactionCertificate`] are typed views over
//! the fields a block or transaction certificate is expected to carry.

use dataservice_base::StatusCode;
use uuid::Uuid;

pub const FIELD_BLOCK_HEIGHT: u16 = 1;
pub const FIELD_PREVIOUS_BLOCK_UUID: u16 = 2;
pub const FIELD_BLOCK_UUID: u16 = 3;
pub const FIELD_WRAPPED_TRANSACTION_TUPLE: u16 = 4;
pub const FIELD_TRANSACTION_UUID: u16 = 5;
pub const FIELD_PREVIOUS_TRANSACTION_UUID: u16 = 6;
pub const FIELD_ARTIFACT_UUID: u16 = 7;
pub const FIELD_NEW_ARTIFACT_STATE: u16 = 8;

/// A flat, ordered set of `{ tag, value }` fields parsed out of a raw
/// certificate buffer.
pub struct Certificate<'a> {
    fields: Vec<(u16, &'a [u8])>,
}

impl<'a> Certificate<'a> {
    /// Parses `buf` into its constituent fields. Fails with
    /// [`StatusCode::ParserInitFailure`] if the field framing is
    /// malformed (truncated tag/len/value).
    pub fn parse(buf: &'a [u8]) -> Result<Certificate<'a>, StatusCode> {
        let mut fields = Vec::new();
        let mut off = 0usize;
        while off < buf.len() {
            if off + 6 > buf.len() {
                return Err(StatusCode::ParserInitFailure);
            }
            let tag = u16::from_be_bytes(buf[off..off + 2].try_into().unwrap());
            let len = u32::from_be_bytes(buf[off + 2..off + 6].try_into().unwrap()) as usize;
            off += 6;
            if off + len > buf.len() {
                return Err(StatusCode::ParserInitFailure);
            }
            fields.push((tag, &buf[off..off + len]));
            off += len;
        }
        Ok(Certificate { fields })
    }

    pub fn find(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
    }

    pub fn find_all(&self, tag: u16) -> impl Iterator<Item = &'a [u8]> + '_ {
        self.fields.iter().filter(move |(t, _)| *t == tag).map(|(_, v)| *v)
    }

    fn find_u64(&self, tag: u16) -> Option<u64> {
        self.find(tag).and_then(|v| v.try_into().ok()).map(u64::from_be_bytes)
    }

    fn find_u32(&self, tag: u16) -> Option<u32> {
        self.find(tag).and_then(|v| v.try_into().ok()).map(u32::from_be_bytes)
    }

    fn find_uuid(&self, tag: u16) -> Option<Uuid> {
        self.find(tag).and_then(|v| <[u8; 16]>::try_from(v).ok()).map(Uuid::from_bytes)
    }
}

/// A builder used by test code and by canonization clients to assemble
/// a raw certificate buffer field-by-field.
#[derive(Default)]
pub struct CertificateBuilder {
    buf: Vec<u8>,
}

impl CertificateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, tag: u16, value: &[u8]) -> Self {
        self.buf.extend_from_slice(&tag.to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn u64_field(self, tag: u16, value: u64) -> Self {
        self.field(tag, &value.to_be_bytes())
    }

    pub fn u32_field(self, tag: u16, value: u32) -> Self {
        self.field(tag, &value.to_be_bytes())
    }

    pub fn uuid_field(self, tag: u16, value: &Uuid) -> Self {
        self.field(tag, value.as_bytes())
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Typed view over a candidate block certificate (§4.4).
pub struct BlockCertificate<'a> {
    cert: Certificate<'a>,
}

impl<'a> BlockCertificate<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<BlockCertificate<'a>, StatusCode> {
        Ok(BlockCertificate {
            cert: Certificate::parse(buf)?,
        })
    }

    pub fn block_height(&self) -> Option<u64> {
        self.cert.find_u64(FIELD_BLOCK_HEIGHT)
    }

    pub fn previous_block_uuid(&self) -> Option<Uuid> {
        self.cert.find_uuid(FIELD_PREVIOUS_BLOCK_UUID)
    }

    pub fn block_uuid(&self) -> Option<Uuid> {
        self.cert.find_uuid(FIELD_BLOCK_UUID)
    }

    /// The raw bytes of each wrapped child transaction certificate, in
    /// certificate order. The first entry's transaction UUID becomes the
    /// block's `first_transaction_id`.
    pub fn wrapped_transactions(&self) -> Vec<&'a [u8]> {
        self.cert.find_all(FIELD_WRAPPED_TRANSACTION_TUPLE).collect()
    }
}

/// Typed view over one wrapped child transaction certificate (§4.4c).
pub struct TransactionCertificate<'a> {
    cert: Certificate<'a>,
}

impl<'a> TransactionCertificate<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<TransactionCertificate<'a>, StatusCode> {
        Ok(TransactionCertificate {
            cert: Certificate::parse(buf)?,
        })
    }

    pub fn transaction_id(&self) -> Option<Uuid> {
        self.cert.find_uuid(FIELD_TRANSACTION_UUID)
    }

    pub fn previous_transaction_id(&self) -> Option<Uuid> {
        self.cert.find_uuid(FIELD_PREVIOUS_TRANSACTION_UUID)
    }

    pub fn artifact_id(&self) -> Option<Uuid> {
        self.cert.find_uuid(FIELD_ARTIFACT_UUID)
    }

    pub fn new_artifact_state(&self) -> Option<u32> {
        self.cert.find_u32(FIELD_NEW_ARTIFACT_STATE)
    }
}
