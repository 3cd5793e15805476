//! The `block_make` canonization algorithm (C3, §4.4).

use crate::query::pq_drop_internal;
use dataservice_base::{is_reserved_uuid, StatusCode, StatusResult, FF_UUID, ROOT_BLOCK_UUID, ZERO_UUID};
use dataservice_proto::{ArtifactRecord, BlockCertificate, BlockNode, TransactionCertificate, TransactionNode, TxnState};
use dataservice_store::{Table, Txn};
use uuid::Uuid;

/// Validates and atomically canonizes a candidate block. On any failure
/// the caller's transaction must be aborted by the dispatcher — this
/// function never partially applies its mutations, but it also never
/// commits; that remains the caller's responsibility so dispatch can
/// apply the same "abort on any non-success" discipline uniformly.
pub fn block_make(txn: &mut Txn, block_id: &Uuid, cert_bytes: &[u8]) -> StatusResult<()> {
    let cert = BlockCertificate::parse(cert_bytes)?;

    let end_raw = txn
        .get(Table::Block, FF_UUID.as_bytes())
        .map_err(|_| StatusCode::GetFailure)?;
    let end_node = match &end_raw {
        Some(raw) => Some(BlockNode::decode(raw)?.0),
        None => None,
    };

    let expected_height = match &end_node {
        Some(end) => end.block_height + 1,
        None => 1,
    };
    let height = cert.block_height().ok_or(StatusCode::MissingBlockHeight)?;
    if height != expected_height {
        return Err(StatusCode::InvalidBlockHeight);
    }

    let expected_prev = match &end_node {
        Some(end) => end.prev,
        None => ROOT_BLOCK_UUID,
    };
    let previous_block_uuid = cert
        .previous_block_uuid()
        .ok_or(StatusCode::MissingPreviousBlockUuid)?;
    if previous_block_uuid != expected_prev {
        return Err(StatusCode::InvalidPreviousBlockUuid);
    }

    let cert_block_uuid = cert.block_uuid().ok_or(StatusCode::MissingBlockUuid)?;
    if cert_block_uuid != *block_id {
        return Err(StatusCode::InvalidBlockUuid);
    }
    if is_reserved_uuid(block_id) {
        return Err(StatusCode::InvalidBlockUuid);
    }

    let wrapped = cert.wrapped_transactions();
    if wrapped.is_empty() {
        return Err(StatusCode::NoChildTransactions);
    }
    let first_child = TransactionCertificate::parse(wrapped[0])?;
    let first_transaction_id = first_child
        .transaction_id()
        .ok_or(StatusCode::MissingChildTransactionUuid)?;

    // Mutations. Every failure from here on leaves the caller's txn to
    // be aborted; nothing here is committed by this function.

    let new_block = BlockNode {
        key: *block_id,
        prev: previous_block_uuid,
        next: FF_UUID,
        first_transaction_id,
        block_height: height,
        block_cert_size: cert_bytes.len() as u64,
    };
    txn.put_no_overwrite(Table::Block, block_id.as_bytes(), &new_block.encode(cert_bytes))?;
    txn.put_no_overwrite(Table::Height, &height.to_be_bytes(), block_id.as_bytes())?;

    match end_node {
        None => {
            let start = BlockNode {
                key: ZERO_UUID,
                prev: ZERO_UUID,
                next: *block_id,
                first_transaction_id: ZERO_UUID,
                block_height: 0,
                block_cert_size: 0,
            };
            let end = BlockNode {
                key: FF_UUID,
                prev: *block_id,
                next: FF_UUID,
                first_transaction_id: ZERO_UUID,
                block_height: height,
                block_cert_size: 0,
            };
            txn.put(Table::Block, ZERO_UUID.as_bytes(), &start.encode(&[]))?;
            txn.put(Table::Block, FF_UUID.as_bytes(), &end.encode(&[]))?;
        }
        Some(_) => {
            let prev_raw = txn
                .get(Table::Block, previous_block_uuid.as_bytes())
                .map_err(|_| StatusCode::GetFailure)?
                .ok_or(StatusCode::NotFound)?;
            let (mut prev_node, prev_cert) = BlockNode::decode(&prev_raw)?;
            prev_node.next = *block_id;
            let prev_cert = prev_cert.to_vec();
            txn.put(Table::Block, previous_block_uuid.as_bytes(), &prev_node.encode(&prev_cert))?;

            let end_raw = txn
                .get(Table::Block, FF_UUID.as_bytes())
                .map_err(|_| StatusCode::GetFailure)?
                .ok_or(StatusCode::NotFound)?;
            let (mut end, _) = BlockNode::decode(&end_raw)?;
            end.prev = *block_id;
            end.block_height = height;
            txn.put(Table::Block, FF_UUID.as_bytes(), &end.encode(&[]))?;
        }
    }

    for raw_child in &wrapped {
        let child = TransactionCertificate::parse(raw_child)?;
        let transaction_id = child
            .transaction_id()
            .ok_or(StatusCode::MissingChildTransactionUuid)?;
        let previous_transaction_id = child
            .previous_transaction_id()
            .ok_or(StatusCode::MissingChildPreviousTransactionUuid)?;
        let artifact_id = child.artifact_id().ok_or(StatusCode::MissingChildArtifactUuid)?;
        let new_state = child.new_artifact_state().ok_or(StatusCode::MissingChildState)?;

        let node = TransactionNode {
            key: transaction_id,
            prev: previous_transaction_id,
            next: ZERO_UUID,
            artifact_id,
            block_id: *block_id,
            txn_cert_size: raw_child.len() as u64,
            txn_state: TxnState::Canonized as u32,
        };
        txn.put_no_overwrite(Table::Txn, transaction_id.as_bytes(), &node.encode(raw_child))?;

        pq_drop_internal(txn, &transaction_id)?;

        if previous_transaction_id != ZERO_UUID {
            let prior_raw = txn
                .get(Table::Txn, previous_transaction_id.as_bytes())
                .map_err(|_| StatusCode::GetFailure)?
                .ok_or(StatusCode::NotFound)?;
            let (mut prior_node, prior_cert) = TransactionNode::decode(&prior_raw)?;
            prior_node.next = transaction_id;
            let prior_cert = prior_cert.to_vec();
            txn.put(
                Table::Txn,
                previous_transaction_id.as_bytes(),
                &prior_node.encode(&prior_cert),
            )?;
        }

        let artifact_raw = txn
            .get(Table::Artifact, artifact_id.as_bytes())
            .map_err(|_| StatusCode::GetFailure)?;
        let artifact = match artifact_raw {
            None => ArtifactRecord {
                key: artifact_id,
                txn_first: transaction_id,
                txn_latest: transaction_id,
                height_first: height,
                height_latest: height,
                state_latest: new_state,
            },
            Some(raw) => {
                let mut rec = ArtifactRecord::decode(&raw)?;
                rec.txn_latest = transaction_id;
                rec.height_latest = height;
                rec.state_latest = new_state;
                rec
            }
        };
        txn.put(Table::Artifact, artifact_id.as_bytes(), &artifact.encode())?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{artifact_get, block_id_by_height, latest_block_id, txn_get, txn_submit};
    use dataservice_proto::CertificateBuilder;
    use dataservice_proto::{
        FIELD_ARTIFACT_UUID, FIELD_BLOCK_HEIGHT, FIELD_BLOCK_UUID, FIELD_NEW_ARTIFACT_STATE,
        FIELD_PREVIOUS_BLOCK_UUID, FIELD_PREVIOUS_TRANSACTION_UUID, FIELD_TRANSACTION_UUID,
        FIELD_WRAPPED_TRANSACTION_TUPLE,
    };
    use dataservice_store::Env;
    use test_log::test;

    fn uuid(b: u8) -> Uuid {
        Uuid::from_bytes([b; 16])
    }

    fn child_cert(txn_id: Uuid, prev_txn_id: Uuid, artifact_id: Uuid, state: u32) -> Vec<u8> {
        CertificateBuilder::new()
            .uuid_field(FIELD_TRANSACTION_UUID, &txn_id)
            .uuid_field(FIELD_PREVIOUS_TRANSACTION_UUID, &prev_txn_id)
            .uuid_field(FIELD_ARTIFACT_UUID, &artifact_id)
            .u32_field(FIELD_NEW_ARTIFACT_STATE, state)
            .build()
    }

    fn block_cert(height: u64, prev_block: Uuid, block_id: Uuid, children: &[Vec<u8>]) -> Vec<u8> {
        let mut b = CertificateBuilder::new()
            .u64_field(FIELD_BLOCK_HEIGHT, height)
            .uuid_field(FIELD_PREVIOUS_BLOCK_UUID, &prev_block)
            .uuid_field(FIELD_BLOCK_UUID, &block_id);
        for c in children {
            b = b.field(FIELD_WRAPPED_TRANSACTION_TUPLE, c);
        }
        b.build()
    }

    fn setup_pq_with_one_txn() -> (tempfile::TempDir, Env, Uuid, Uuid) {
        let dir = tempfile::tempdir().unwrap();
        let env = Env::open(dir.path().join("data.redb")).unwrap();
        let t1 = uuid(0xb8);
        let artifact = uuid(0xf2);
        let mut txn = env.begin_txn().unwrap();
        txn_submit(&mut txn, &t1, &artifact, b"txn-cert").unwrap();
        txn.commit().unwrap();
        (dir, env, t1, artifact)
    }

    #[test]
    fn first_block_canonizes_and_updates_all_indices() {
        let (_dir, env, t1, artifact) = setup_pq_with_one_txn();
        let block_id = uuid(0x96);
        let child = child_cert(t1, ZERO_UUID, artifact, 7);
        let cert = block_cert(1, ROOT_BLOCK_UUID, block_id, &[child]);

        let mut txn = env.begin_txn().unwrap();
        block_make(&mut txn, &block_id, &cert).unwrap();
        txn.commit().unwrap();

        let read = env.begin_txn().unwrap();
        assert_eq!(latest_block_id(&read).unwrap(), block_id);
        assert_eq!(block_id_by_height(&read, 1).unwrap(), block_id);
        let art = artifact_get(&read, &artifact).unwrap();
        assert_eq!(art.txn_first, t1);
        assert_eq!(art.txn_latest, t1);
        assert_eq!(art.height_first, 1);
        assert_eq!(art.height_latest, 1);
        assert_eq!(art.state_latest, 7);
        assert!(txn_get(&read, &t1).is_err());
        read.abort();
    }

    #[test]
    fn wrong_height_is_rejected_with_no_state_change() {
        let (_dir, env, t1, artifact) = setup_pq_with_one_txn();
        let block_id = uuid(0x96);
        let child = child_cert(t1, ZERO_UUID, artifact, 7);
        let cert = block_cert(0, ROOT_BLOCK_UUID, block_id, &[child]);

        let mut txn = env.begin_txn().unwrap();
        let err = block_make(&mut txn, &block_id, &cert).unwrap_err();
        txn.abort();
        assert_eq!(err, StatusCode::InvalidBlockHeight);

        let read = env.begin_txn().unwrap();
        assert_eq!(latest_block_id(&read).unwrap_err(), StatusCode::NotFound);
        read.abort();
    }

    #[test]
    fn wrong_previous_block_is_rejected() {
        let (_dir, env, t1, artifact) = setup_pq_with_one_txn();
        let block_id = uuid(0x96);
        let child = child_cert(t1, ZERO_UUID, artifact, 7);
        let cert = block_cert(1, ZERO_UUID, block_id, &[child]);

        let mut txn = env.begin_txn().unwrap();
        let err = block_make(&mut txn, &block_id, &cert).unwrap_err();
        txn.abort();
        assert_eq!(err, StatusCode::InvalidPreviousBlockUuid);
    }

    #[test]
    fn reserved_block_uuid_is_rejected() {
        let (_dir, env, t1, artifact) = setup_pq_with_one_txn();
        let child = child_cert(t1, ZERO_UUID, artifact, 7);
        let cert = block_cert(1, ROOT_BLOCK_UUID, ROOT_BLOCK_UUID, &[child]);

        let mut txn = env.begin_txn().unwrap();
        let err = block_make(&mut txn, &ROOT_BLOCK_UUID, &cert).unwrap_err();
        txn.abort();
        assert_eq!(err, StatusCode::InvalidBlockUuid);
    }

    #[test]
    fn second_block_chains_onto_first() {
        let (_dir, env, t1, artifact) = setup_pq_with_one_txn();
        let block1 = uuid(0x96);
        let child1 = child_cert(t1, ZERO_UUID, artifact, 7);
        let cert1 = block_cert(1, ROOT_BLOCK_UUID, block1, &[child1]);
        let mut txn = env.begin_txn().unwrap();
        block_make(&mut txn, &block1, &cert1).unwrap();
        txn.commit().unwrap();

        let t2 = uuid(0x22);
        let mut txn = env.begin_txn().unwrap();
        txn_submit(&mut txn, &t2, &artifact, b"txn-cert-2").unwrap();
        txn.commit().unwrap();

        let block2 = uuid(0x97);
        let child2 = child_cert(t2, t1, artifact, 8);
        let cert2 = block_cert(2, block1, block2, &[child2]);
        let mut txn = env.begin_txn().unwrap();
        block_make(&mut txn, &block2, &cert2).unwrap();
        txn.commit().unwrap();

        let read = env.begin_txn().unwrap();
        assert_eq!(latest_block_id(&read).unwrap(), block2);
        let (b2_node, _) = crate::query::block_get(&read, &block2).unwrap();
        assert_eq!(b2_node.prev, block1);

        // t1's canonized record should now point forward to t2.
        let raw = read.get(Table::Txn, t1.as_bytes()).unwrap().unwrap();
        let (t1_canonized, _) = TransactionNode::decode(&raw).unwrap();
        assert_eq!(t1_canonized.next, t2);
        read.abort();
    }
}
