use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::FrameId;

/// LruReplacer tracks the frames that are eligible for eviction and hands
/// them out in least-recently-unpinned order. Frames enter on `unpin`, leave
/// on `pin` or when selected as victim.
///
/// The recency queue keeps one entry per unpin, tagged with a stamp; the map
/// holds each tracked frame's current stamp. An entry whose stamp no longer
/// matches is stale (the frame was pinned or re-unpinned since) and gets
/// skipped during victim selection.
pub struct LruReplacer {
    state: Mutex<LruState>,
}

struct LruState {
    queue: VecDeque<(u64, FrameId)>,
    stamps: HashMap<FrameId, u64>,
    next_stamp: u64,
    capacity: usize,
}

impl LruReplacer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LruState {
                queue: VecDeque::new(),
                stamps: HashMap::new(),
                next_stamp: 0,
                capacity,
            }),
        }
    }

    /// Marks `frame` evictable. Does nothing when the frame is already
    /// tracked or the replacer is at capacity.
    pub fn unpin(&self, frame: FrameId) {
        let mut state = self.state.lock().unwrap();
        if state.stamps.contains_key(&frame) || state.stamps.len() >= state.capacity {
            return;
        }
        let stamp = state.next_stamp;
        state.next_stamp += 1;
        state.stamps.insert(frame, stamp);
        state.queue.push_front((stamp, frame));
    }

    /// Removes `frame` from the evictable set, if tracked.
    pub fn pin(&self, frame: FrameId) {
        let mut state = self.state.lock().unwrap();
        state.stamps.remove(&frame);
    }

    /// Selects and removes the least-recently-unpinned frame.
    pub fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock().unwrap();
        while let Some((stamp, frame)) = state.queue.pop_back() {
            if state.stamps.get(&frame) == Some(&stamp) {
                state.stamps.remove(&frame);
                return Some(frame);
            }
        }
        None
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().stamps.len()
    }
}
