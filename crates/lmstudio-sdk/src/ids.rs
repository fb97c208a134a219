use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Process-wide channel and call id counters. The two sequences are independent.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    next_channel_id: Mutex<u64>,
    next_call_id: Mutex<u64>,
}

impl IdAllocator {
    pub fn next_channel_id(&self) -> u64 {
        Self::bump(&self.next_channel_id)
    }

    pub fn next_call_id(&self) -> u64 {
        Self::bump(&self.next_call_id)
    }

    fn bump(counter: &Mutex<u64>) -> u64 {
        let mut counter = counter.lock().unwrap_or_else(|e| e.into_inner());
        let id = *counter;
        *counter += 1;
        id
    }
}

pub(crate) static IDS: Lazy<IdAllocator> = Lazy::new(IdAllocator::default);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn sequences_are_independent_and_monotonic() {
        let ids = IdAllocator::default();
        assert_eq!(ids.next_channel_id(), 0);
        assert_eq!(ids.next_channel_id(), 1);
        assert_eq!(ids.next_call_id(), 0);
        assert_eq!(ids.next_channel_id(), 2);
        assert_eq!(ids.next_call_id(), 1);
    }

    #[test]
    fn concurrent_allocation_never_repeats() {
        let ids = Arc::new(IdAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || (0..100).map(|_| ids.next_call_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate call id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
