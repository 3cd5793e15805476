/// Application-level status code returned in every response frame's
/// `status` field. `Success` is always zero; every other variant names a
/// specific, documented failure so operators never have to guess what a
/// non-zero reply meant.
///
/// This is the wire ABI: the numeric values must never change once
/// assigned, only grow.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(u32)]
pub enum StatusCode {
    Success = 0,

    // Authorization
    NotAuthorized = 1,

    // Resource
    OutOfMemory = 2,
    OutOfChildInstances = 3,
    ChildContextBadIndex = 4,
    ChildContextInvalid = 5,
    ChildContextCreateFailure = 6,
    ChildContextMaxReached = 7,

    // Storage
    TxnBeginFailure = 8,
    GetFailure = 9,
    PutFailure = 10,
    DelFailure = 11,
    EnvCreateFailure = 12,
    EnvOpenFailure = 13,
    EnvSetMapsizeFailure = 14,
    EnvSetMaxdbsFailure = 15,
    DbiOpenFailure = 16,
    TxnCommitFailure = 17,

    // Not found / truncation
    NotFound = 18,
    WouldTruncate = 19,

    // Corruption
    InvalidStoredBlockNode = 20,
    InvalidStoredTransactionNode = 21,
    InvalidArtifactNodeSize = 22,
    InvalidIndexEntry = 23,

    // Protocol
    RequestPacketBad = 24,
    RequestPacketInvalidSize = 25,
    IpcWriteDataFailure = 26,

    // Canonization
    MissingBlockHeight = 27,
    InvalidBlockHeight = 28,
    MissingPreviousBlockUuid = 29,
    InvalidPreviousBlockUuid = 30,
    MissingBlockUuid = 31,
    InvalidBlockUuid = 32,
    NoChildTransactions = 33,
    MissingChildTransactionUuid = 34,
    MissingChildPreviousTransactionUuid = 35,
    MissingChildArtifactUuid = 36,
    MissingChildState = 37,
    ParserInitFailure = 38,
    ParserOptionsInitFailure = 39,
    CryptoSuiteInitFailure = 40,

    // Random service
    InvalidSize = 41,
    ReadFailed = 42,

    // mdb_put no-overwrite collisions (duplicate block/txn/artifact uuid)
    MdbPutFailure = 43,
}

impl StatusCode {
    pub fn from_u32(v: u32) -> Option<StatusCode> {
        use StatusCode::*;
        let code = match v {
            0 => Success,
            1 => NotAuthorized,
            2 => OutOfMemory,
            3 => OutOfChildInstances,
            4 => ChildContextBadIndex,
            5 => ChildContextInvalid,
            6 => ChildContextCreateFailure,
            7 => ChildContextMaxReached,
            8 => TxnBeginFailure,
            9 => GetFailure,
            10 => PutFailure,
            11 => DelFailure,
            12 => EnvCreateFailure,
            13 => EnvOpenFailure,
            14 => EnvSetMapsizeFailure,
            15 => EnvSetMaxdbsFailure,
            16 => DbiOpenFailure,
            17 => TxnCommitFailure,
            18 => NotFound,
            19 => WouldTruncate,
            20 => InvalidStoredBlockNode,
            21 => InvalidStoredTransactionNode,
            22 => InvalidArtifactNodeSize,
            23 => InvalidIndexEntry,
            24 => RequestPacketBad,
            25 => RequestPacketInvalidSize,
            26 => IpcWriteDataFailure,
            27 => MissingBlockHeight,
            28 => InvalidBlockHeight,
            29 => MissingPreviousBlockUuid,
            30 => InvalidPreviousBlockUuid,
            31 => MissingBlockUuid,
            32 => InvalidBlockUuid,
            33 => NoChildTransactions,
            34 => MissingChildTransactionUuid,
            35 => MissingChildPreviousTransactionUuid,
            36 => MissingChildArtifactUuid,
            37 => MissingChildState,
            38 => ParserInitFailure,
            39 => ParserOptionsInitFailure,
            40 => CryptoSuiteInitFailure,
            41 => InvalidSize,
            42 => ReadFailed,
            43 => MdbPutFailure,
            _ => return None,
        };
        Some(code)
    }

    pub fn is_success(self) -> bool {
        matches!(self, StatusCode::Success)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for StatusCode {}

/// Result alias for handlers: `Ok` carries the handler's payload, `Err`
/// carries the wire status code to report. Never conflated with
/// [`crate::FatalError`], which tears down the connection instead.
pub type StatusResult<T> = std::result::Result<T, StatusCode>;
