//! Translation from recorded ids to replay-side objects.
use hashbrown::{HashMap, HashSet};

/// Recorded handle → replay object, plus the handles whose creation failed during replay.
#[derive(Debug, Clone)]
pub struct HandleMap<T> {
    live: HashMap<u64, T>,
    failed: HashSet<u64>,
}

impl<T> Default for HandleMap<T> {
    fn default() -> Self {
        Self {
            live: HashMap::new(),
            failed: HashSet::new(),
        }
    }
}

impl<T> HandleMap<T> {
    pub fn insert(&mut self, recorded: u64, value: T) -> Option<T> {
        self.failed.remove(&recorded);
        self.live.insert(recorded, value)
    }

    pub fn get(&self, recorded: u64) -> Option<&T> {
        self.live.get(&recorded)
    }

    pub fn get_mut(&mut self, recorded: u64) -> Option<&mut T> {
        self.live.get_mut(&recorded)
    }

    pub fn remove(&mut self, recorded: u64) -> Option<T> {
        self.live.remove(&recorded)
    }

    /// Remembers that the object recorded as `recorded` could not be created.
    pub fn mark_failed(&mut self, recorded: u64) {
        self.live.remove(&recorded);
        self.failed.insert(recorded);
    }

    pub fn is_failed(&self, recorded: u64) -> bool {
        self.failed.contains(&recorded)
    }

    /// Forgets a failed handle. Returns false if it was not marked.
    pub fn clear_failed(&mut self, recorded: u64) -> bool {
        self.failed.remove(&recorded)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Contents of the client-side buffers, per thread.
#[derive(Debug, Clone, Default)]
pub struct ClientMemory {
    buffers: HashMap<(u32, u32), Vec<u8>>,
}

impl ClientMemory {
    pub fn create(&mut self, tid: u32, id: u32) {
        self.buffers.insert((tid, id), Vec::new());
    }

    /// Replaces the contents of a buffer, creating it if needed.
    pub fn data(&mut self, tid: u32, id: u32, bytes: Vec<u8>) {
        self.buffers.insert((tid, id), bytes);
    }

    /// Overwrites part of a buffer. Returns false if the buffer does not exist or is too short.
    pub fn sub_data(&mut self, tid: u32, id: u32, offset: usize, bytes: &[u8]) -> bool {
        let Some(buffer) = self.buffers.get_mut(&(tid, id)) else {
            return false;
        };
        let Some(end) = offset.checked_add(bytes.len()) else {
            return false;
        };
        match buffer.get_mut(offset..end) {
            Some(target) => {
                target.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, tid: u32, id: u32) -> bool {
        self.buffers.remove(&(tid, id)).is_some()
    }

    /// Returns the bytes of a buffer starting at `offset`.
    pub fn resolve(&self, tid: u32, id: u32, offset: u64) -> Option<&[u8]> {
        let buffer = self.buffers.get(&(tid, id))?;
        buffer.get(usize::try_from(offset).ok()?..)
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}
