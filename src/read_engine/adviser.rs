//! Readahead window estimator, grounded on
//! `examples/original_source/src/mount/readahead_adviser.h`.

use std::collections::VecDeque;

use sfs_types::BLOCK_SIZE;

const INIT_WINDOW: u64 = 64 * 1024;

struct ThroughputSample {
    at_ms: u64,
    size: u64,
}

/// Tracks whether recent reads look sequential and recommends a prefetch
/// window size (spec.md §4.4).
pub struct ReadaheadAdviser {
    current_offset: u64,
    window: u64,
    max_window_cap: u64,
    random_threshold: u32,
    opposite_request_threshold: u32,
    throughput_window_ms: u64,

    consecutive_non_sequential: u32,
    should_use_readahead: bool,
    consecutive_opposite: u32,

    history: VecDeque<ThroughputSample>,
}

impl ReadaheadAdviser {
    pub fn new(init_window_bytes: u64, random_threshold: u32, opposite_request_threshold: u32, throughput_window_ms: u64, max_window_cap: u64) -> Self {
        Self {
            current_offset: 0,
            window: init_window_bytes.max(INIT_WINDOW),
            max_window_cap,
            random_threshold,
            opposite_request_threshold,
            throughput_window_ms,
            consecutive_non_sequential: 0,
            should_use_readahead: true,
            consecutive_opposite: 0,
            history: VecDeque::new(),
        }
    }

    fn is_sequential(&self, offset: u64) -> bool {
        offset.abs_diff(self.current_offset) <= BLOCK_SIZE as u64
    }

    fn throughput_bytes_per_ms(&self, now_ms: u64) -> f64 {
        let window_start = now_ms.saturating_sub(self.throughput_window_ms);
        let total: u64 = self
            .history
            .iter()
            .filter(|s| s.at_ms >= window_start)
            .map(|s| s.size)
            .sum();
        if self.throughput_window_ms == 0 {
            0.0
        } else {
            total as f64 / self.throughput_window_ms as f64
        }
    }

    /// Feeds one observed request into the estimator, returning the
    /// recommended window afterward.
    pub fn feed(&mut self, offset: u64, size: u64, now_ms: u64) -> u64 {
        let sequential = self.is_sequential(offset);

        self.history.push_back(ThroughputSample { at_ms: now_ms, size });
        let window_start = now_ms.saturating_sub(self.throughput_window_ms);
        while matches!(self.history.front(), Some(s) if s.at_ms < window_start) {
            self.history.pop_front();
        }

        let throughput = self.throughput_bytes_per_ms(now_ms);
        let max_window = ((2.0 * throughput * self.throughput_window_ms as f64) as u64)
            .clamp(INIT_WINDOW, self.max_window_cap);

        if sequential {
            self.consecutive_non_sequential = 0;
            let growth = if self.window < max_window / 16 { 4 } else { 2 };
            self.window = (self.window * growth).min(max_window);
            self.note_request_type(true);
        } else {
            self.consecutive_non_sequential += 1;
            if self.consecutive_non_sequential >= self.random_threshold {
                self.window = (self.window / 2).max(2 * INIT_WINDOW);
            }
            self.note_request_type(false);
        }

        self.current_offset = offset + size;
        self.window
    }

    fn note_request_type(&mut self, sequential: bool) {
        let matches_current = sequential == self.should_use_readahead;
        if matches_current {
            self.consecutive_opposite = 0;
        } else {
            self.consecutive_opposite += 1;
            if self.consecutive_opposite >= self.opposite_request_threshold {
                self.should_use_readahead = sequential;
                self.consecutive_opposite = 0;
            }
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    pub fn should_use_readahead(&self) -> bool {
        self.should_use_readahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adviser() -> ReadaheadAdviser {
        ReadaheadAdviser::new(INIT_WINDOW, 3, 4, 1000, 16 * 1024 * 1024)
    }

    #[test]
    fn sequential_feeds_grow_window_monotonically() {
        let mut a = adviser();
        let mut last = a.window();
        for i in 0..6 {
            let window = a.feed(i * 65536, 65536, i * 10);
            assert!(window >= last, "window should not shrink on sequential feeds");
            last = window;
        }
    }

    #[test]
    fn sustained_random_feeds_shrink_window() {
        let mut a = adviser();
        for i in 0..4 {
            a.feed(i * 65536, 65536, i * 10);
        }
        let grown = a.window();

        for i in 0..4 {
            a.feed(100_000_000 + i * 3 * 65536, 65536, 100 + i * 10);
        }
        assert!(a.window() < grown, "window should shrink after sustained random access");
    }

    #[test]
    fn sticky_flag_flips_only_after_threshold_consecutive_opposite_feeds() {
        let mut a = adviser();
        assert!(a.should_use_readahead());

        // 3 opposite feeds: below opposite_request_threshold(4), flag holds.
        for i in 0..3 {
            a.feed(100_000_000 + i * 9_000_000, 65536, i * 10);
        }
        assert!(a.should_use_readahead());

        // 4th consecutive opposite feed flips it.
        a.feed(500_000_000, 65536, 100);
        assert!(!a.should_use_readahead());
    }
}
