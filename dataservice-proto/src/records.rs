//! Fixed-layout on-disk record codecs. Every multi-byte integer is
//! stored big-endian; every record begins with a fixed-size header
//! followed (for block and transaction nodes) by a variable-length raw
//! certificate.

use dataservice_base::{StatusCode, StatusResult};
use uuid::Uuid;

const UUID_LEN: usize = 16;

fn read_uuid(buf: &[u8], off: usize) -> Uuid {
    let mut b = [0u8; UUID_LEN];
    b.copy_from_slice(&buf[off..off + UUID_LEN]);
    Uuid::from_bytes(b)
}

fn write_uuid(out: &mut Vec<u8>, id: &Uuid) {
    out.extend_from_slice(id.as_bytes());
}

/// Transaction lifecycle state, stored as a big-endian `u32`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u32)]
pub enum TxnState {
    Submitted = 0,
    Attested = 1,
    Canonized = 2,
}

impl TxnState {
    pub fn from_u32(v: u32) -> StatusResult<TxnState> {
        match v {
            0 => Ok(TxnState::Submitted),
            1 => Ok(TxnState::Attested),
            2 => Ok(TxnState::Canonized),
            _ => Err(StatusCode::InvalidStoredTransactionNode),
        }
    }
}

/// `{ key, prev, next, first_transaction_id, block_height, block_cert_size }`
/// followed by `block_cert_size` bytes of raw certificate.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BlockNode {
    pub key: Uuid,
    pub prev: Uuid,
    pub next: Uuid,
    pub first_transaction_id: Uuid,
    pub block_height: u64,
    pub block_cert_size: u64,
}

impl BlockNode {
    pub const HEADER_SIZE: usize = UUID_LEN * 4 + 8 + 8;

    pub fn encode(&self, cert: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_SIZE + cert.len());
        write_uuid(&mut out, &self.key);
        write_uuid(&mut out, &self.prev);
        write_uuid(&mut out, &self.next);
        write_uuid(&mut out, &self.first_transaction_id);
        out.extend_from_slice(&self.block_height.to_be_bytes());
        out.extend_from_slice(&self.block_cert_size.to_be_bytes());
        out.extend_from_slice(cert);
        out
    }

    /// Decodes the header and returns it along with the trailing
    /// certificate slice. Rejects any stored value whose size disagrees
    /// with the header's own `block_cert_size` field.
    pub fn decode(buf: &[u8]) -> StatusResult<(BlockNode, &[u8])> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(StatusCode::InvalidStoredBlockNode);
        }
        let mut off = 0;
        let key = read_uuid(buf, off);
        off += UUID_LEN;
        let prev = read_uuid(buf, off);
        off += UUID_LEN;
        let next = read_uuid(buf, off);
        off += UUID_LEN;
        let first_transaction_id = read_uuid(buf, off);
        off += UUID_LEN;
        let block_height = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let block_cert_size = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let node = BlockNode {
            key,
            prev,
            next,
            first_transaction_id,
            block_height,
            block_cert_size,
        };
        let expected_total = Self::HEADER_SIZE as u64 + block_cert_size;
        if buf.len() as u64 != expected_total {
            return Err(StatusCode::InvalidStoredBlockNode);
        }
        Ok((node, &buf[off..]))
    }
}

/// `{ key, prev, next, artifact_id, block_id, txn_cert_size, txn_state }`
/// followed by `txn_cert_size` bytes of raw certificate.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransactionNode {
    pub key: Uuid,
    pub prev: Uuid,
    pub next: Uuid,
    pub artifact_id: Uuid,
    pub block_id: Uuid,
    pub txn_cert_size: u64,
    pub txn_state: u32,
}

impl TransactionNode {
    pub const HEADER_SIZE: usize = UUID_LEN * 5 + 8 + 4;

    pub fn encode(&self, cert: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_SIZE + cert.len());
        write_uuid(&mut out, &self.key);
        write_uuid(&mut out, &self.prev);
        write_uuid(&mut out, &self.next);
        write_uuid(&mut out, &self.artifact_id);
        write_uuid(&mut out, &self.block_id);
        out.extend_from_slice(&self.txn_cert_size.to_be_bytes());
        out.extend_from_slice(&self.txn_state.to_be_bytes());
        out.extend_from_slice(cert);
        out
    }

    pub fn decode(buf: &[u8]) -> StatusResult<(TransactionNode, &[u8])> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(StatusCode::InvalidStoredTransactionNode);
        }
        let mut off = 0;
        let key = read_uuid(buf, off);
        off += UUID_LEN;
        let prev = read_uuid(buf, off);
        off += UUID_LEN;
        let next = read_uuid(buf, off);
        off += UUID_LEN;
        let artifact_id = read_uuid(buf, off);
        off += UUID_LEN;
        let block_id = read_uuid(buf, off);
        off += UUID_LEN;
        let txn_cert_size = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let txn_state = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let node = TransactionNode {
            key,
            prev,
            next,
            artifact_id,
            block_id,
            txn_cert_size,
            txn_state,
        };
        let expected_total = Self::HEADER_SIZE as u64 + txn_cert_size;
        if buf.len() as u64 != expected_total {
            return Err(StatusCode::InvalidStoredTransactionNode);
        }
        Ok((node, &buf[off..]))
    }
}

/// `{ key, txn_first, txn_latest, height_first, height_latest, state_latest }`.
/// Fixed size; any other stored size is corruption.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ArtifactRecord {
    pub key: Uuid,
    pub txn_first: Uuid,
    pub txn_latest: Uuid,
    pub height_first: u64,
    pub height_latest: u64,
    pub state_latest: u32,
}

impl ArtifactRecord {
    pub const SIZE: usize = UUID_LEN * 3 + 8 + 8 + 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        write_uuid(&mut out, &self.key);
        write_uuid(&mut out, &self.txn_first);
        write_uuid(&mut out, &self.txn_latest);
        out.extend_from_slice(&self.height_first.to_be_bytes());
        out.extend_from_slice(&self.height_latest.to_be_bytes());
        out.extend_from_slice(&self.state_latest.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> StatusResult<ArtifactRecord> {
        if buf.len() != Self::SIZE {
            return Err(StatusCode::InvalidArtifactNodeSize);
        }
        let mut off = 0;
        let key = read_uuid(buf, off);
        off += UUID_LEN;
        let txn_first = read_uuid(buf, off);
        off += UUID_LEN;
        let txn_latest = read_uuid(buf, off);
        off += UUID_LEN;
        let height_first = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let height_latest = u64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let state_latest = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        Ok(ArtifactRecord {
            key,
            txn_first,
            txn_latest,
            height_first,
            height_latest,
            state_latest,
        })
    }
}

/// A 16-byte block UUID stored as the value of a `height` sub-database
/// entry. Any other stored size is an invalid index entry.
pub fn decode_height_index_entry(buf: &[u8]) -> StatusResult<Uuid> {
    if buf.len() != UUID_LEN {
        return Err(StatusCode::InvalidIndexEntry);
    }
    Ok(read_uuid(buf, 0))
}

#[cfg(test)]
mod test {
    use super::*;

    fn uuid(byte: u8) -> Uuid {
        Uuid::from_bytes([byte; 16])
    }

    #[test]
    fn block_node_round_trip() {
        let node = BlockNode {
            key: uuid(1),
            prev: uuid(2),
            next: uuid(3),
            first_transaction_id: uuid(4),
            block_height: 42,
            block_cert_size: 3,
        };
        let cert = [9u8, 8, 7];
        let buf = node.encode(&cert);
        let (decoded, decoded_cert) = BlockNode::decode(&buf).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded_cert, &cert);
    }

    #[test]
    fn block_node_size_mismatch_is_corruption() {
        let node = BlockNode {
            key: uuid(1),
            prev: uuid(2),
            next: uuid(3),
            first_transaction_id: uuid(4),
            block_height: 1,
            block_cert_size: 10,
        };
        let buf = node.encode(&[1, 2, 3]); // too short for cert_size=10
        assert_eq!(
            BlockNode::decode(&buf).unwrap_err(),
            StatusCode::InvalidStoredBlockNode
        );
    }

    #[test]
    fn transaction_node_round_trip() {
        let node = TransactionNode {
            key: uuid(1),
            prev: uuid(2),
            next: uuid(3),
            artifact_id: uuid(4),
            block_id: uuid(5),
            txn_cert_size: 2,
            txn_state: TxnState::Canonized as u32,
        };
        let cert = [1u8, 2];
        let buf = node.encode(&cert);
        let (decoded, decoded_cert) = TransactionNode::decode(&buf).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded_cert, &cert);
    }

    #[test]
    fn artifact_record_round_trip() {
        let rec = ArtifactRecord {
            key: uuid(1),
            txn_first: uuid(2),
            txn_latest: uuid(3),
            height_first: 1,
            height_latest: 9,
            state_latest: 7,
        };
        let buf = rec.encode();
        assert_eq!(buf.len(), ArtifactRecord::SIZE);
        let decoded = ArtifactRecord::decode(&buf).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn artifact_record_wrong_size_is_corruption() {
        let buf = vec![0u8; ArtifactRecord::SIZE - 1];
        assert_eq!(
            ArtifactRecord::decode(&buf).unwrap_err(),
            StatusCode::InvalidArtifactNodeSize
        );
    }

    #[test]
    fn height_index_entry_wrong_size_is_corruption() {
        assert_eq!(
            decode_height_index_entry(&[0u8; 15]).unwrap_err(),
            StatusCode::InvalidIndexEntry
        );
        assert!(decode_height_index_entry(&[3u8; 16]).is_ok());
    }
}
