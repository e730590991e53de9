use std::collections::HashMap;
use std::hash::Hash;
use std::net::SocketAddr;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Per-stream high-water marks, keyed by peer address or entity id. A seqno below the mark
/// is stale; an equal one is accepted because a sender may put several frames on the wire
/// under one seqno.
#[derive(Debug)]
pub struct SequenceFilter<K = SocketAddr> {
    high_water: HashMap<K, u32>,
}

impl<K> Default for SequenceFilter<K> {
    fn default() -> Self {
        Self {
            high_water: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Copy> SequenceFilter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, key: K, seqno: u32) -> bool {
        match self.high_water.get_mut(&key) {
            Some(mark) => {
                if sequence_greater_than(*mark, seqno) {
                    return false;
                }
                *mark = seqno;
                true
            }
            None => {
                self.high_water.insert(key, seqno);
                true
            }
        }
    }

    pub fn is_stale(&self, key: &K, seqno: u32) -> bool {
        self.high_water
            .get(key)
            .is_some_and(|&mark| sequence_greater_than(mark, seqno))
    }

    pub fn high_water(&self, key: &K) -> Option<u32> {
        self.high_water.get(key).copied()
    }

    pub fn forget(&mut self, key: &K) {
        self.high_water.remove(key);
    }

    pub fn clear(&mut self) {
        self.high_water.clear();
    }
}
