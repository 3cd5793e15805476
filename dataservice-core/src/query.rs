//! Query handlers (C2, §4.3). Each takes an already-open [`Txn`] — per
//! §4.2's discipline, the dispatcher always supplies one, so none of
//! these begin their own. Read-only handlers never commit; the
//! dispatcher aborts their txn once the response is built.

use dataservice_base::{is_reserved_uuid, StatusCode, StatusResult, FF_UUID, ZERO_UUID};
use dataservice_proto::{decode_height_index_entry, ArtifactRecord, BlockNode, TransactionNode, TxnState};
use dataservice_store::{Env, Table, Txn};
use uuid::Uuid;

/// Outcome of [`global_setting_get`], distinguishing a normal value from
/// the "caller's buffer is too small" case, which carries the size the
/// caller would need to retry with.
pub enum SettingGetOutcome {
    Value(Vec<u8>),
    WouldTruncate { required: u32 },
}

pub fn global_setting_get(
    txn: &Txn,
    key: u64,
    max_size: u32,
) -> StatusResult<SettingGetOutcome> {
    let val = txn
        .get(Table::Global, &key.to_be_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    if val.len() as u32 > max_size {
        return Ok(SettingGetOutcome::WouldTruncate {
            required: val.len() as u32,
        });
    }
    Ok(SettingGetOutcome::Value(val))
}

pub fn global_setting_set(txn: &mut Txn, key: u64, value: &[u8]) -> StatusResult<()> {
    txn.put(Table::Global, &key.to_be_bytes(), value)
        .map_err(|_| StatusCode::PutFailure)
}

pub fn latest_block_id(txn: &Txn) -> StatusResult<Uuid> {
    let end = txn
        .get(Table::Block, FF_UUID.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, _cert) = BlockNode::decode(&end)?;
    Ok(node.prev)
}

pub fn block_get(txn: &Txn, block_id: &Uuid) -> StatusResult<(BlockNode, Vec<u8>)> {
    let raw = txn
        .get(Table::Block, block_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, cert) = BlockNode::decode(&raw)?;
    Ok((node, cert.to_vec()))
}

pub fn block_id_by_height(txn: &Txn, height: u64) -> StatusResult<Uuid> {
    let raw = txn
        .get(Table::Height, &height.to_be_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    decode_height_index_entry(&raw)
}

pub fn artifact_get(txn: &Txn, artifact_id: &Uuid) -> StatusResult<ArtifactRecord> {
    let raw = txn
        .get(Table::Artifact, artifact_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    ArtifactRecord::decode(&raw)
}

/// Reads a canonized transaction by id out of `txn` (distinct from
/// [`txn_get`], which reads the process queue).
pub fn txn_get_canonized(txn: &Txn, txn_id: &Uuid) -> StatusResult<(TransactionNode, Vec<u8>)> {
    let raw = txn
        .get(Table::Txn, txn_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, cert) = TransactionNode::decode(&raw)?;
    Ok((node, cert.to_vec()))
}

/// Two-phase read (§9): reads the start sentinel under `env` directly
/// (a fresh, short-lived read transaction), then the target under a
/// second one. Mirrors the original's separation of "find the next id"
/// from "read the (possibly large) target node" without holding one
/// cursor across both.
pub fn txn_get_first(env: &Env) -> StatusResult<(TransactionNode, Vec<u8>)> {
    let first_id = {
        let read = env.begin_read().map_err(|_| StatusCode::TxnBeginFailure)?;
        let raw = read
            .get(Table::Pq, ZERO_UUID.as_bytes())
            .map_err(|_| StatusCode::GetFailure)?
            .ok_or(StatusCode::NotFound)?;
        let (node, _cert) = TransactionNode::decode(&raw)?;
        node.next
    };
    if first_id == FF_UUID {
        return Err(StatusCode::NotFound);
    }
    let read = env.begin_read().map_err(|_| StatusCode::TxnBeginFailure)?;
    let raw = read
        .get(Table::Pq, first_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, cert) = TransactionNode::decode(&raw)?;
    Ok((node, cert.to_vec()))
}

pub fn txn_get(txn: &Txn, txn_id: &Uuid) -> StatusResult<(TransactionNode, Vec<u8>)> {
    let raw = txn
        .get(Table::Pq, txn_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, cert) = TransactionNode::decode(&raw)?;
    Ok((node, cert.to_vec()))
}

/// Removes `txn_id` from the process queue, patching its neighbors.
/// Used both as the public `txn_drop` handler and internally (bypassing
/// the capability check) by `block_make` when a child transaction
/// canonizes.
pub fn pq_drop_internal(txn: &mut Txn, txn_id: &Uuid) -> StatusResult<()> {
    if is_reserved_uuid(txn_id) {
        return Err(StatusCode::NotFound);
    }
    let raw = txn
        .get(Table::Pq, txn_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (node, _cert) = TransactionNode::decode(&raw)?;

    let prev_raw = txn
        .get(Table::Pq, node.prev.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (mut prev_node, prev_cert) = TransactionNode::decode(&prev_raw)?;
    prev_node.next = node.next;
    let prev_cert = prev_cert.to_vec();
    txn.put(Table::Pq, node.prev.as_bytes(), &prev_node.encode(&prev_cert))
        .map_err(|_| StatusCode::PutFailure)?;

    let next_raw = txn
        .get(Table::Pq, node.next.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (mut next_node, next_cert) = TransactionNode::decode(&next_raw)?;
    next_node.prev = node.prev;
    let next_cert = next_cert.to_vec();
    txn.put(Table::Pq, node.next.as_bytes(), &next_node.encode(&next_cert))
        .map_err(|_| StatusCode::PutFailure)?;

    txn.del(Table::Pq, txn_id.as_bytes())
        .map_err(|_| StatusCode::DelFailure)
}

pub fn txn_drop(txn: &mut Txn, txn_id: &Uuid) -> StatusResult<()> {
    pq_drop_internal(txn, txn_id)
}

pub fn txn_promote(txn: &mut Txn, txn_id: &Uuid) -> StatusResult<()> {
    if is_reserved_uuid(txn_id) {
        return Err(StatusCode::NotFound);
    }
    let raw = txn
        .get(Table::Pq, txn_id.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?
        .ok_or(StatusCode::NotFound)?;
    let (mut node, cert) = TransactionNode::decode(&raw)?;
    node.txn_state = TxnState::Attested as u32;
    let cert = cert.to_vec();
    txn.put(Table::Pq, txn_id.as_bytes(), &node.encode(&cert))
        .map_err(|_| StatusCode::PutFailure)
}

/// Appends a newly submitted transaction to the pq tail, creating both
/// sentinels if the queue was empty.
pub fn txn_submit(
    txn: &mut Txn,
    txn_id: &Uuid,
    artifact_id: &Uuid,
    cert: &[u8],
) -> StatusResult<()> {
    let end_raw = txn
        .get(Table::Pq, FF_UUID.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?;

    match end_raw {
        None => {
            // Empty queue: create both sentinels around the new node.
            let start = TransactionNode {
                key: ZERO_UUID,
                prev: ZERO_UUID,
                next: *txn_id,
                artifact_id: ZERO_UUID,
                block_id: ZERO_UUID,
                txn_cert_size: 0,
                txn_state: TxnState::Submitted as u32,
            };
            let end = TransactionNode {
                key: FF_UUID,
                prev: *txn_id,
                next: FF_UUID,
                artifact_id: ZERO_UUID,
                block_id: ZERO_UUID,
                txn_cert_size: 0,
                txn_state: TxnState::Submitted as u32,
            };
            txn.put(Table::Pq, ZERO_UUID.as_bytes(), &start.encode(&[]))
                .map_err(|_| StatusCode::PutFailure)?;
            txn.put(Table::Pq, FF_UUID.as_bytes(), &end.encode(&[]))
                .map_err(|_| StatusCode::PutFailure)?;
            let node = TransactionNode {
                key: *txn_id,
                prev: ZERO_UUID,
                next: FF_UUID,
                artifact_id: *artifact_id,
                block_id: ZERO_UUID,
                txn_cert_size: cert.len() as u64,
                txn_state: TxnState::Submitted as u32,
            };
            txn.put_no_overwrite(Table::Pq, txn_id.as_bytes(), &node.encode(cert))
                .map_err(|e| if e == StatusCode::MdbPutFailure { e } else { StatusCode::PutFailure })
        }
        Some(end_raw) => {
            let (mut end_node, end_cert) = TransactionNode::decode(&end_raw)?;
            let old_tail = end_node.prev;
            let old_tail_raw = txn
                .get(Table::Pq, old_tail.as_bytes())
                .map_err(|_| StatusCode::GetFailure)?
                .ok_or(StatusCode::NotFound)?;
            let (mut old_tail_node, old_tail_cert) = TransactionNode::decode(&old_tail_raw)?;
            old_tail_node.next = *txn_id;
            let old_tail_cert = old_tail_cert.to_vec();
            txn.put(Table::Pq, old_tail.as_bytes(), &old_tail_node.encode(&old_tail_cert))
                .map_err(|_| StatusCode::PutFailure)?;

            end_node.prev = *txn_id;
            let end_cert = end_cert.to_vec();
            txn.put(Table::Pq, FF_UUID.as_bytes(), &end_node.encode(&end_cert))
                .map_err(|_| StatusCode::PutFailure)?;

            let node = TransactionNode {
                key: *txn_id,
                prev: old_tail,
                next: FF_UUID,
                artifact_id: *artifact_id,
                block_id: ZERO_UUID,
                txn_cert_size: cert.len() as u64,
                txn_state: TxnState::Submitted as u32,
            };
            txn.put_no_overwrite(Table::Pq, txn_id.as_bytes(), &node.encode(cert))
                .map_err(|e| if e == StatusCode::MdbPutFailure { e } else { StatusCode::PutFailure })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn open_env() -> (tempfile::TempDir, Env) {
        let dir = tempfile::tempdir().unwrap();
        let env = Env::open(dir.path().join("data.redb")).unwrap();
        (dir, env)
    }

    fn uuid(b: u8) -> Uuid {
        Uuid::from_bytes([b; 16])
    }

    #[test]
    fn submit_then_get_first_then_drop_patches_neighbors() {
        let (_dir, env) = open_env();
        let a = uuid(1);
        let b = uuid(2);
        let c = uuid(3);
        let artifact = uuid(9);

        let mut txn = env.begin_txn().unwrap();
        txn_submit(&mut txn, &a, &artifact, b"cert-a").unwrap();
        txn_submit(&mut txn, &b, &artifact, b"cert-b").unwrap();
        txn_submit(&mut txn, &c, &artifact, b"cert-c").unwrap();
        txn.commit().unwrap();

        let (first, _) = txn_get_first(&env).unwrap();
        assert_eq!(first.key, a);
        assert_eq!(first.prev, ZERO_UUID);
        assert_eq!(first.next, b);

        let mut txn = env.begin_txn().unwrap();
        txn_drop(&mut txn, &b).unwrap();
        txn.commit().unwrap();

        let read = env.begin_txn().unwrap();
        assert!(txn_get(&read, &b).is_err());
        let (a_node, _) = txn_get(&read, &a).unwrap();
        assert_eq!(a_node.next, c);
        let (c_node, _) = txn_get(&read, &c).unwrap();
        assert_eq!(c_node.prev, a);
        read.abort();
    }

    #[test]
    fn canonized_txn_get_reads_the_txn_table_not_pq() {
        let (_dir, env) = open_env();
        let t1 = uuid(4);
        let node = TransactionNode {
            key: t1,
            prev: ZERO_UUID,
            next: ZERO_UUID,
            artifact_id: uuid(9),
            block_id: uuid(5),
            txn_cert_size: 4,
            txn_state: TxnState::Canonized as u32,
        };
        let mut txn = env.begin_txn().unwrap();
        txn.put(Table::Txn, t1.as_bytes(), &node.encode(b"cert")).unwrap();
        txn.commit().unwrap();

        let read = env.begin_txn().unwrap();
        let (got, cert) = txn_get_canonized(&read, &t1).unwrap();
        assert_eq!(got, node);
        assert_eq!(cert, b"cert");
        assert_eq!(txn_get_canonized(&read, &uuid(99)).unwrap_err(), StatusCode::NotFound);
        // Not visible through the pq-scoped reader.
        assert_eq!(txn_get(&read, &t1).unwrap_err(), StatusCode::NotFound);
        read.abort();
    }

    #[test]
    fn drop_rejects_sentinel_keys() {
        let (_dir, env) = open_env();
        let mut txn = env.begin_txn().unwrap();
        assert_eq!(txn_drop(&mut txn, &ZERO_UUID).unwrap_err(), StatusCode::NotFound);
        assert_eq!(txn_drop(&mut txn, &FF_UUID).unwrap_err(), StatusCode::NotFound);
        txn.abort();
    }

    #[test]
    fn global_setting_round_trip_and_truncation() {
        let (_dir, env) = open_env();
        let mut txn = env.begin_txn().unwrap();
        global_setting_set(&mut txn, 7, b"hello").unwrap();
        txn.commit().unwrap();

        let read = env.begin_txn().unwrap();
        match global_setting_get(&read, 7, 5).unwrap() {
            SettingGetOutcome::Value(v) => assert_eq!(v, b"hello"),
            _ => panic!("expected value"),
        }
        match global_setting_get(&read, 7, 2).unwrap() {
            SettingGetOutcome::WouldTruncate { required } => assert_eq!(required, 5),
            _ => panic!("expected truncation"),
        }
        read.abort();
    }
}
