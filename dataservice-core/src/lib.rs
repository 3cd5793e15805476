//! Core state machine: context lifecycle, query handlers, block
//! canonization, and the method dispatch table (§4).

mod block_make;
mod contexts;
mod dispatch;
mod query;

pub use block_make::block_make;
pub use contexts::{ChildPool, RootContext};
pub use dispatch::{dispatch, Method};
pub use query::{
    artifact_get, block_get, block_id_by_height, global_setting_get, global_setting_set,
    latest_block_id, pq_drop_internal, txn_drop, txn_get, txn_get_canonized, txn_get_first,
    txn_promote, txn_submit, SettingGetOutcome,
};
