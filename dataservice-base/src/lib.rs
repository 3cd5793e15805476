mod caps;
mod error;
mod ids;
mod status;

pub use caps::{Cap, CapSet};
pub use error::{err, FatalError, Result};
pub use ids::{is_reserved_uuid, FF_UUID, ROOT_BLOCK_UUID, ZERO_UUID};
pub use status::{StatusCode, StatusResult};

/// Up to this many child contexts may be live under one root context at
/// once, matching the fixed-size free-list pool size.
pub const MAX_CHILD_CONTEXTS: usize = 1024;
