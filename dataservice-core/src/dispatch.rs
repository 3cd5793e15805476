//! Method codes and the dispatch table (L5 + C1, §4.5).

use crate::block_make::block_make;
use crate::contexts::RootContext;
use crate::query::{
    artifact_get, block_get, block_id_by_height, global_setting_get, global_setting_set,
    latest_block_id, txn_drop, txn_get, txn_get_canonized, txn_get_first, txn_promote, txn_submit,
    SettingGetOutcome,
};
use dataservice_base::{Cap, CapSet, StatusCode, StatusResult, MAX_CHILD_CONTEXTS};
use dataservice_proto::{decode_child_index, Request, Response};
use tracing::warn;
use uuid::Uuid;

/// Stable wire method codes (§4.5). Grouped root/child lifecycle first,
/// then the §2/§4.3 query handlers in the order §2's C2 row lists them
/// (..., artifact record, canonized transaction, process-queue
/// first/by-id, ...), then `block_make` last.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum Method {
    RootContextCreate = 0,
    RootContextReduceCaps = 1,
    ChildContextCreate = 2,
    ChildContextClose = 3,
    GlobalSettingGet = 4,
    GlobalSettingSet = 5,
    LatestBlockId = 6,
    BlockGet = 7,
    BlockIdByHeight = 8,
    ArtifactGet = 9,
    TxnGetCanonized = 10,
    TxnGetFirst = 11,
    TxnGet = 12,
    TxnDrop = 13,
    TxnPromote = 14,
    TxnSubmit = 15,
    BlockMake = 16,
}

impl Method {
    fn from_u32(v: u32) -> Option<Method> {
        use Method::*;
        let m = match v {
            0 => RootContextCreate,
            1 => RootContextReduceCaps,
            2 => ChildContextCreate,
            3 => ChildContextClose,
            4 => GlobalSettingGet,
            5 => GlobalSettingSet,
            6 => LatestBlockId,
            7 => BlockGet,
            8 => BlockIdByHeight,
            9 => ArtifactGet,
            10 => TxnGetCanonized,
            11 => TxnGetFirst,
            12 => TxnGet,
            13 => TxnDrop,
            14 => TxnPromote,
            15 => TxnSubmit,
            16 => BlockMake,
            _ => return None,
        };
        Some(m)
    }

    /// Root-scoped methods carry no child-context index prefix: they
    /// either bootstrap the root (handled before any `dispatch` call
    /// ever happens) or act on the root's own caps.
    fn is_root_scoped(self) -> bool {
        matches!(self, Method::RootContextReduceCaps | Method::ChildContextCreate)
    }
}

/// A handler failure: a wire status code plus an optional payload.
/// Nearly every handler's failure payload is empty (§4.5), but
/// `global_setting_get`'s `would_truncate` is a documented exception
/// that carries the size the caller would need (§4.3).
struct HandlerErr {
    status: StatusCode,
    payload: Vec<u8>,
}

impl From<StatusCode> for HandlerErr {
    fn from(status: StatusCode) -> HandlerErr {
        HandlerErr { status, payload: Vec::new() }
    }
}

type HandlerResult = Result<Vec<u8>, HandlerErr>;

fn decode_uuid(buf: &[u8]) -> StatusResult<Uuid> {
    <[u8; 16]>::try_from(buf)
        .map(Uuid::from_bytes)
        .map_err(|_| StatusCode::RequestPacketInvalidSize)
}

/// Dispatches one decoded request against a live root context, producing
/// a response frame. Unknown methods and malformed payloads are
/// non-fatal: the connection stays open and a status reply is written.
pub fn dispatch(root: &mut RootContext, req: &Request) -> Response {
    let method = match Method::from_u32(req.method) {
        Some(m) => m,
        None => {
            warn!(target: "dataservice-core", method = req.method, "unknown method");
            return Response::error(req.method, 0, StatusCode::RequestPacketBad);
        }
    };

    if method == Method::RootContextCreate {
        // The root context already exists by the time requests are
        // being dispatched against it; a client sending this again is
        // malformed, not fatal.
        return Response::error(req.method, 0, StatusCode::RequestPacketBad);
    }

    match run(root, method, &req.payload) {
        Ok((offset, payload)) => Response::success(req.method, offset, payload),
        Err((offset, err)) => Response {
            method: req.method,
            offset,
            status: err.status,
            payload: err.payload,
        },
    }
}

fn run(root: &mut RootContext, method: Method, payload: &[u8]) -> Result<(u32, Vec<u8>), (u32, HandlerErr)> {
    if method.is_root_scoped() {
        return run_root_scoped(root, method, payload)
            .map(|(offset, payload)| (offset, payload))
            .map_err(|e| (0, e));
    }

    let (child_index, rest) =
        decode_child_index(payload).map_err(|e| (0, HandlerErr::from(e)))?;
    if child_index as usize >= MAX_CHILD_CONTEXTS {
        return Err((0, HandlerErr::from(StatusCode::ChildContextBadIndex)));
    }
    let caps = root
        .children
        .caps(child_index)
        .map_err(|e| (child_index, HandlerErr::from(e)))?;

    run_child_scoped(root, child_index, &caps, method, rest)
        .map(|payload| (child_index, payload))
        .map_err(|e| (child_index, e))
}

fn run_root_scoped(
    root: &mut RootContext,
    method: Method,
    payload: &[u8],
) -> Result<(u32, Vec<u8>), HandlerErr> {
    match method {
        Method::RootContextReduceCaps => {
            let mask = decode_capset(payload)?;
            root.reduce_caps(&mask)?;
            Ok((0, Vec::new()))
        }
        Method::ChildContextCreate => {
            let mask = decode_capset(payload)?;
            let idx = root.child_create(&mask)?;
            Ok((idx, idx.to_be_bytes().to_vec()))
        }
        _ => unreachable!("only root-scoped methods reach run_root_scoped"),
    }
}

fn decode_capset(payload: &[u8]) -> StatusResult<CapSet> {
    if payload.len() != 32 {
        return Err(StatusCode::RequestPacketInvalidSize);
    }
    let mut caps = CapSet::init_false();
    for (word_idx, chunk) in payload.chunks(8).enumerate() {
        let word = u64::from_be_bytes(chunk.try_into().unwrap());
        for bit in 0..64 {
            if word & (1 << bit) != 0 {
                let cap_idx = word_idx * 64 + bit;
                if let Some(cap) = cap_from_index(cap_idx) {
                    caps.set(cap);
                }
            }
        }
    }
    Ok(caps)
}

fn cap_from_index(idx: usize) -> Option<Cap> {
    use Cap::*;
    let cap = match idx {
        0 => RootContextCreate,
        1 => RootContextReduceCaps,
        2 => ChildContextCreate,
        3 => ChildContextClose,
        4 => GlobalSettingRead,
        5 => GlobalSettingWrite,
        6 => PqTxnSubmit,
        7 => PqTxnFirstRead,
        8 => PqTxnRead,
        9 => PqTxnDrop,
        10 => PqTxnPromote,
        11 => BlockWrite,
        12 => BlockRead,
        13 => BlockIdLatestRead,
        14 => BlockIdByHeightRead,
        15 => ArtifactRead,
        16 => TxnRead,
        _ => return None,
    };
    Some(cap)
}

fn run_child_scoped(
    root: &mut RootContext,
    child_index: u32,
    caps: &CapSet,
    method: Method,
    payload: &[u8],
) -> HandlerResult {
    match method {
        Method::ChildContextClose => {
            // Closes the same child the caller was authorized as; the
            // cap check already happened against `child_index`'s caps
            // in `run`, so this must act on that same index, not one
            // re-parsed from the payload.
            let _ = payload;
            root.child_close(child_index)?;
            Ok(Vec::new())
        }
        Method::GlobalSettingGet => {
            require(caps, Cap::GlobalSettingRead)?;
            if payload.len() != 12 {
                return Err(StatusCode::RequestPacketInvalidSize.into());
            }
            let key = u64::from_be_bytes(payload[0..8].try_into().unwrap());
            let max_size = u32::from_be_bytes(payload[8..12].try_into().unwrap());
            let txn = root.env.begin_txn()?;
            let outcome = global_setting_get(&txn, key, max_size);
            txn.abort();
            match outcome? {
                SettingGetOutcome::Value(v) => Ok(v),
                SettingGetOutcome::WouldTruncate { required } => Err(HandlerErr {
                    status: StatusCode::WouldTruncate,
                    payload: required.to_be_bytes().to_vec(),
                }),
            }
        }
        Method::GlobalSettingSet => {
            require(caps, Cap::GlobalSettingWrite)?;
            if payload.len() < 8 {
                return Err(StatusCode::RequestPacketInvalidSize.into());
            }
            let key = u64::from_be_bytes(payload[0..8].try_into().unwrap());
            let mut txn = root.env.begin_txn()?;
            global_setting_set(&mut txn, key, &payload[8..])?;
            txn.commit()?;
            Ok(Vec::new())
        }
        Method::LatestBlockId => {
            require(caps, Cap::BlockIdLatestRead)?;
            let txn = root.env.begin_txn()?;
            let id = latest_block_id(&txn);
            txn.abort();
            Ok(id?.as_bytes().to_vec())
        }
        Method::BlockGet => {
            require(caps, Cap::BlockRead)?;
            let block_id = decode_uuid(payload)?;
            let txn = root.env.begin_txn()?;
            let result = block_get(&txn, &block_id);
            txn.abort();
            let (node, cert) = result?;
            Ok(node.encode(&cert))
        }
        Method::BlockIdByHeight => {
            require(caps, Cap::BlockIdByHeightRead)?;
            if payload.len() != 8 {
                return Err(StatusCode::RequestPacketInvalidSize.into());
            }
            let height = u64::from_be_bytes(payload[0..8].try_into().unwrap());
            let txn = root.env.begin_txn()?;
            let result = block_id_by_height(&txn, height);
            txn.abort();
            Ok(result?.as_bytes().to_vec())
        }
        Method::ArtifactGet => {
            require(caps, Cap::ArtifactRead)?;
            let artifact_id = decode_uuid(payload)?;
            let txn = root.env.begin_txn()?;
            let result = artifact_get(&txn, &artifact_id);
            txn.abort();
            Ok(result?.encode())
        }
        Method::TxnGetCanonized => {
            require(caps, Cap::TxnRead)?;
            let txn_id = decode_uuid(payload)?;
            let txn = root.env.begin_txn()?;
            let result = txn_get_canonized(&txn, &txn_id);
            txn.abort();
            let (node, cert) = result?;
            Ok(node.encode(&cert))
        }
        Method::TxnGetFirst => {
            require(caps, Cap::PqTxnFirstRead)?;
            let (node, cert) = txn_get_first(&root.env)?;
            Ok(node.encode(&cert))
        }
        Method::TxnGet => {
            require(caps, Cap::PqTxnRead)?;
            let txn_id = decode_uuid(payload)?;
            let txn = root.env.begin_txn()?;
            let result = txn_get(&txn, &txn_id);
            txn.abort();
            let (node, cert) = result?;
            Ok(node.encode(&cert))
        }
        Method::TxnDrop => {
            require(caps, Cap::PqTxnDrop)?;
            let txn_id = decode_uuid(payload)?;
            let mut txn = root.env.begin_txn()?;
            txn_drop(&mut txn, &txn_id)?;
            txn.commit()?;
            Ok(Vec::new())
        }
        Method::TxnPromote => {
            require(caps, Cap::PqTxnPromote)?;
            let txn_id = decode_uuid(payload)?;
            let mut txn = root.env.begin_txn()?;
            txn_promote(&mut txn, &txn_id)?;
            txn.commit()?;
            Ok(Vec::new())
        }
        Method::TxnSubmit => {
            require(caps, Cap::PqTxnSubmit)?;
            if payload.len() < 32 {
                return Err(StatusCode::RequestPacketInvalidSize.into());
            }
            let txn_id = decode_uuid(&payload[0..16])?;
            let artifact_id = decode_uuid(&payload[16..32])?;
            let mut txn = root.env.begin_txn()?;
            txn_submit(&mut txn, &txn_id, &artifact_id, &payload[32..])?;
            txn.commit()?;
            Ok(Vec::new())
        }
        Method::BlockMake => {
            require(caps, Cap::BlockWrite)?;
            if payload.len() < 16 {
                return Err(StatusCode::RequestPacketInvalidSize.into());
            }
            let block_id = decode_uuid(&payload[0..16])?;
            let mut txn = root.env.begin_txn()?;
            match block_make(&mut txn, &block_id, &payload[16..]) {
                Ok(()) => {
                    txn.commit()?;
                    Ok(Vec::new())
                }
                Err(e) => {
                    txn.abort();
                    Err(e.into())
                }
            }
        }
        Method::RootContextCreate | Method::RootContextReduceCaps | Method::ChildContextCreate => {
            unreachable!("root-scoped methods are routed in run_root_scoped")
        }
    }
}

fn require(caps: &CapSet, cap: Cap) -> StatusResult<()> {
    if caps.is_set(cap) {
        Ok(())
    } else {
        Err(StatusCode::NotAuthorized)
    }
}
