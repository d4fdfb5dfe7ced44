use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Numeric namespace partitioning requests and responses into independent
/// handler groups. Allocated by name through the channel registrar.
pub type ChannelId = u16;

/// Caller-defined kind of work within a channel.
pub type RequestType = u16;

/// Identifier correlating a submitted request with later abort calls.
///
/// Ids are handed out in strictly increasing order by the queue. The zero
/// value is reserved and means the submission was rejected.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RequestId(u32);

impl RequestId {
    /// Returned by the queue when a request was not accepted.
    pub const REJECTED: RequestId = RequestId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_rejected(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for RequestId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<RequestId> for u32 {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}
