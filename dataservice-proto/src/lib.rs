mod cert;
mod frame;
mod records;

pub use cert::{
    BlockCertificate, Certificate, CertificateBuilder, TransactionCertificate,
    FIELD_ARTIFACT_UUID, FIELD_BLOCK_HEIGHT, FIELD_BLOCK_UUID, FIELD_NEW_ARTIFACT_STATE,
    FIELD_PREVIOUS_BLOCK_UUID, FIELD_PREVIOUS_TRANSACTION_UUID, FIELD_TRANSACTION_UUID,
    FIELD_WRAPPED_TRANSACTION_TUPLE,
};
pub use frame::{decode_child_index, take_frame, Request, Response};
pub use records::{decode_height_index_entry, ArtifactRecord, BlockNode, TransactionNode, TxnState};
