//! Sharded lookup from user id (stream key) to [`StreamId`].
//!
//! The shard is picked from bits 32.. of the user id; each shard keeps the
//! slots of its entries sorted by user id so a lookup is a binary search
//! over a handful of entries.

use cconartist_schema::StreamId;

/// Errors registering a user id.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// Every slot is taken.
    #[error("stream registry is full ({0} entries)")]
    Full(usize),
}

/// Default number of sharding bits (256 shards).
pub const DEFAULT_SHARD_BITS: u8 = 8;

/// Maps user ids to the stream ids of their read-write streams.
#[derive(Debug)]
pub struct StreamIdRegistry {
    user_ids: Vec<u64>,
    stream_ids: Vec<StreamId>,
    shards: Vec<Vec<u32>>,
    mask: u64,
    capacity: usize,
}

impl StreamIdRegistry {
    /// Create a registry holding at most `capacity` entries spread over
    /// `2^shard_bits` shards.
    pub fn new(capacity: usize, shard_bits: u8) -> Self {
        let shard_bits = shard_bits.min(16);
        let shards = 1usize << shard_bits;
        Self {
            user_ids: Vec::with_capacity(capacity),
            stream_ids: Vec::with_capacity(capacity),
            shards: vec![Vec::new(); shards],
            mask: (shards as u64) - 1,
            capacity,
        }
    }

    fn shard_of(&self, user_id: u64) -> usize {
        ((user_id >> 32) & self.mask) as usize
    }

    fn search(&self, shard: &[u32], user_id: u64) -> Result<usize, usize> {
        shard.binary_search_by(|&slot| self.user_ids[slot as usize].cmp(&user_id))
    }

    /// Associate `user_id` with `stream_id`. Registering a known user id
    /// keeps and returns the existing stream id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] when capacity is reached.
    pub fn register(&mut self, user_id: u64, stream_id: StreamId) -> Result<StreamId, RegistryError> {
        let shard = self.shard_of(user_id);
        let pos = match self.search(&self.shards[shard], user_id) {
            Ok(pos) => {
                let slot = self.shards[shard][pos] as usize;
                return Ok(self.stream_ids[slot]);
            }
            Err(pos) => pos,
        };
        if self.user_ids.len() >= self.capacity {
            return Err(RegistryError::Full(self.capacity));
        }

        let slot = self.user_ids.len() as u32;
        self.user_ids.push(user_id);
        self.stream_ids.push(stream_id);
        self.shards[shard].insert(pos, slot);
        Ok(stream_id)
    }

    /// Stream id registered for `user_id`.
    pub fn find(&self, user_id: u64) -> Option<StreamId> {
        let shard = &self.shards[self.shard_of(user_id)];
        self.search(shard, user_id)
            .ok()
            .map(|pos| self.stream_ids[shard[pos] as usize])
    }

    /// Number of registered user ids.
    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// All `(user_id, stream_id)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, StreamId)> + '_ {
        self.user_ids.iter().copied().zip(self.stream_ids.iter().copied())
    }
}
