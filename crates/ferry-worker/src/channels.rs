//! Channel name registrar.
//!
//! Lets independent producers agree on a channel without a shared enum: the
//! first caller of a name allocates the next id, later callers get the same id.

use parking_lot::Mutex;
use std::collections::HashMap;

use ferry_core::ChannelId;

const CHANNEL_ID_SPACE: u32 = ChannelId::MAX as u32 + 1;

#[derive(Debug, Default)]
struct ChannelTable {
    ids: HashMap<String, ChannelId>,
    allocated: u32,
}

/// Permanent name to id mapping, ids assigned first-come-first-served from 0.
///
/// Ids are 16 bits. Once all 65536 are taken, further names wrap around and
/// share an id with an earlier channel; each such allocation logs an error.
#[derive(Debug, Default)]
pub struct ChannelRegistrar {
    table: Mutex<ChannelTable>,
}

impl ChannelRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_channel(&self, name: &str) -> ChannelId {
        let mut table = self.table.lock();
        if let Some(&id) = table.ids.get(name) {
            return id;
        }

        let id = (table.allocated % CHANNEL_ID_SPACE) as ChannelId;
        if table.allocated >= CHANNEL_ID_SPACE {
            tracing::error!(
                name,
                channel = id,
                "Channel id space exhausted, id shared with an earlier channel"
            );
        }
        table.allocated = table.allocated.saturating_add(1);
        table.ids.insert(name.to_owned(), id);
        tracing::debug!(channel = id, name, "Registered channel");
        id
    }

    /// Reverse lookup, for diagnostics.
    pub fn name_of(&self, channel: ChannelId) -> Option<String> {
        self.table
            .lock()
            .ids
            .iter()
            .find(|(_, &id)| id == channel)
            .map(|(name, _)| name.clone())
    }

    pub fn len(&self) -> usize {
        self.table.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
