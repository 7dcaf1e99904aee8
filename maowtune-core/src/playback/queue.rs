// File: maowtune-core/src/playback/queue.rs

use std::collections::VecDeque;

use crate::tracks::{Track, TrackInfo};

/// FIFO of pending tracks; head plays next.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<Track>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, track: Track, at_top: bool) {
        if at_top {
            self.items.push_front(track);
        } else {
            self.items.push_back(track);
        }
    }

    pub fn push_front(&mut self, track: Track) {
        self.items.push_front(track);
    }

    pub fn push_back(&mut self, track: Track) {
        self.items.push_back(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Drops up to `count` tracks from the head. Returns how many went.
    pub fn remove_front(&mut self, count: usize) -> usize {
        let n = count.min(self.items.len());
        self.items.drain(..n);
        n
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn infos(&self) -> Vec<TrackInfo> {
        self.items.iter().map(Track::info).collect()
    }
}
