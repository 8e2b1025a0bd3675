//! Bounded per-session output log, replayed when a session regains focus.

use std::collections::VecDeque;

/// Ceiling on retained bytes per session (10 MiB)
pub const MAX_HISTORY_BYTES: usize = 10 * 1024 * 1024;

/// Append-only chunk log with whole-chunk FIFO eviction
#[derive(Debug, Clone)]
pub struct OutputHistory {
    chunks: VecDeque<Vec<u8>>,
    total: usize,
    limit: usize,
}

impl Default for OutputHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputHistory {
    pub fn new() -> Self {
        Self::with_limit(MAX_HISTORY_BYTES)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            total: 0,
            limit,
        }
    }

    /// Append a chunk, evicting the oldest chunks until the total fits.
    ///
    /// Chunks are never split. A single chunk larger than the limit is kept
    /// on its own.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        self.chunks.push_back(chunk.to_vec());
        self.total += chunk.len();

        while self.total > self.limit && self.chunks.len() > 1 {
            if let Some(evicted) = self.chunks.pop_front() {
                self.total -= evicted.len();
            }
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Retained chunks, oldest first
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    pub fn to_vec(&self) -> Vec<Vec<u8>> {
        self.chunks.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_chunks_in_order() {
        let mut history = OutputHistory::new();
        history.append(b"one");
        history.append(b"two");
        history.append(b"");
        history.append(b"three");

        assert_eq!(history.to_vec(), vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(history.total_bytes(), 11);
    }

    #[test]
    fn test_evicts_oldest_whole_chunks() {
        let mut history = OutputHistory::new();
        let chunk = vec![b'x'; 1024 * 1024];
        for i in 0..12u8 {
            let mut c = chunk.clone();
            c[0] = i;
            history.append(&c);
        }

        assert!(history.total_bytes() <= MAX_HISTORY_BYTES);
        assert_eq!(history.len(), 10);
        let firsts: Vec<u8> = history.chunks().map(|c| c[0]).collect();
        assert_eq!(firsts, (2..12).collect::<Vec<u8>>());
        assert!(history.chunks().all(|c| c.len() == 1024 * 1024));
    }

    #[test]
    fn test_uneven_chunks_stay_under_limit() {
        let mut history = OutputHistory::with_limit(100);
        history.append(&[1; 40]);
        history.append(&[2; 40]);
        history.append(&[3; 30]);

        assert_eq!(history.total_bytes(), 70);
        let kept: Vec<u8> = history.chunks().map(|c| c[0]).collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[test]
    fn test_oversized_chunk_is_kept_alone() {
        let mut history = OutputHistory::with_limit(10);
        history.append(b"abc");
        history.append(&[7; 25]);

        assert_eq!(history.len(), 1);
        assert_eq!(history.total_bytes(), 25);

        history.append(b"z");
        assert_eq!(history.to_vec(), vec![b"z".to_vec()]);
    }
}
