//! A bounded, byte-length-admitted producer-consumer queue. Both the job
//! pool and the read engine hand work to their worker threads through an
//! instance of this.
//!
//! Admission is measured in the summed `length` of queued entries, not
//! their count, matching `examples/original_source/src/common/pcqueue.cc`:
//! a single mutex plus two condition variables (`non_full`, `non_empty`),
//! and an entry whose `length` alone exceeds the bound is rejected up
//! front rather than blocking forever.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// An entry queued by [`ProducerConsumerQueue::put`].
struct Entry<T> {
    job_id: u32,
    job_type: u32,
    data: T,
    length: usize,
}

struct State<T> {
    queue: VecDeque<Entry<T>>,
    current_size: usize,
}

/// Distinguishes "would never fit" (the entry's length alone exceeds the
/// bound - retrying is pointless) from ordinary backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutError {
    /// `length > max_size`; this entry can never be admitted.
    WouldNeverFit,
    /// Queue is full right now; only returned by `try_put`.
    Busy,
}

/// Bounded multi-producer multi-consumer FIFO. `max_size == 0` means
/// unbounded (no admission check).
pub struct ProducerConsumerQueue<T> {
    state: Mutex<State<T>>,
    non_full: Condvar,
    non_empty: Condvar,
    max_size: usize,
}

impl<T> ProducerConsumerQueue<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                current_size: 0,
            }),
            non_full: Condvar::new(),
            non_empty: Condvar::new(),
            max_size,
        }
    }

    fn would_fit(&self, current_size: usize, length: usize) -> bool {
        self.max_size == 0 || current_size + length <= self.max_size
    }

    /// Blocks while the queue would overflow `max_size`. Returns
    /// [`PutError::WouldNeverFit`] immediately, without blocking, if
    /// `length` alone exceeds `max_size`.
    pub fn put(&self, job_id: u32, job_type: u32, data: T, length: usize) -> Result<(), PutError> {
        if self.max_size > 0 && length > self.max_size {
            return Err(PutError::WouldNeverFit);
        }

        let mut state = self.state.lock().unwrap();
        while !self.would_fit(state.current_size, length) {
            state = self.non_full.wait(state).unwrap();
        }

        state.current_size += length;
        state.queue.push_back(Entry {
            job_id,
            job_type,
            data,
            length,
        });
        drop(state);
        self.non_empty.notify_one();
        Ok(())
    }

    /// Non-blocking variant of [`Self::put`]: returns [`PutError::Busy`]
    /// instead of blocking when the queue is currently full.
    pub fn try_put(
        &self,
        job_id: u32,
        job_type: u32,
        data: T,
        length: usize,
    ) -> Result<(), PutError> {
        if self.max_size > 0 && length > self.max_size {
            return Err(PutError::WouldNeverFit);
        }

        let mut state = self.state.lock().unwrap();
        if !self.would_fit(state.current_size, length) {
            return Err(PutError::Busy);
        }

        state.current_size += length;
        state.queue.push_back(Entry {
            job_id,
            job_type,
            data,
            length,
        });
        drop(state);
        self.non_empty.notify_one();
        Ok(())
    }

    /// Blocks while the queue is empty; pops the head entry.
    pub fn get(&self) -> (u32, u32, T) {
        let mut state = self.state.lock().unwrap();
        while state.queue.is_empty() {
            state = self.non_empty.wait(state).unwrap();
        }
        self.pop_locked(&mut state)
    }

    /// Non-blocking variant of [`Self::get`]: `None` if the queue is empty.
    pub fn try_get(&self) -> Option<(u32, u32, T)> {
        let mut state = self.state.lock().unwrap();
        if state.queue.is_empty() {
            return None;
        }
        Some(self.pop_locked(&mut state))
    }

    /// Blocks at most `timeout`, returning `None` on timeout.
    pub fn get_timeout(&self, timeout: Duration) -> Option<(u32, u32, T)> {
        let mut state = self.state.lock().unwrap();
        while state.queue.is_empty() {
            let (guard, result) = self.non_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() && state.queue.is_empty() {
                return None;
            }
        }
        Some(self.pop_locked(&mut state))
    }

    fn pop_locked(&self, state: &mut State<T>) -> (u32, u32, T) {
        let entry = state.queue.pop_front().expect("queue non-empty");
        state.current_size -= entry.length;
        self.non_full.notify_one();
        (entry.job_id, entry.job_type, entry.data)
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().current_size
    }

    pub fn elements(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let state = self.state.lock().unwrap();
        self.max_size > 0 && state.current_size >= self.max_size
    }

    pub fn size_left(&self) -> Option<usize> {
        if self.max_size == 0 {
            return None;
        }
        let state = self.state.lock().unwrap();
        Some(self.max_size.saturating_sub(state.current_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_is_preserved() {
        let q: ProducerConsumerQueue<i32> = ProducerConsumerQueue::new(0);
        q.put(1, 1, 10, 1).unwrap();
        q.put(2, 2, 20, 1).unwrap();
        q.put(3, 3, 30, 1).unwrap();

        assert_eq!(q.get().2, 10);
        assert_eq!(q.get().2, 20);
        assert_eq!(q.get().2, 30);
    }

    #[test]
    fn bound_is_respected() {
        let q: ProducerConsumerQueue<i32> = ProducerConsumerQueue::new(2);
        assert!(q.put(1, 1, 1, 1).is_ok());
        assert!(q.put(2, 2, 2, 1).is_ok());
        assert_eq!(q.try_put(3, 3, 3, 10), Err(PutError::WouldNeverFit));
        assert_eq!(q.try_put(3, 3, 3, 1), Err(PutError::Busy));
    }

    #[test]
    fn would_never_fit_does_not_block() {
        let q: ProducerConsumerQueue<i32> = ProducerConsumerQueue::new(2);
        assert_eq!(q.put(1, 1, 1, 10), Err(PutError::WouldNeverFit));
    }

    #[test]
    fn try_get_on_empty_queue_is_none() {
        let q: ProducerConsumerQueue<i32> = ProducerConsumerQueue::new(0);
        assert!(q.try_get().is_none());
    }

    #[test]
    fn producer_blocks_until_consumer_drains() {
        let q = Arc::new(ProducerConsumerQueue::<i32>::new(2));
        q.put(1, 1, 1, 2).unwrap();

        let q2 = q.clone();
        let handle = thread::spawn(move || {
            // Would block: current_size(2) + 1 > max_size(2).
            q2.put(2, 2, 2, 1).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(q.is_full());

        let (_, _, first) = q.get();
        assert_eq!(first, 1);

        handle.join().unwrap();
        assert_eq!(q.elements(), 1);
    }
}
