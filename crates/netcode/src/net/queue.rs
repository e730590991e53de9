use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

pub type Work<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

struct QueuedWork<C> {
    origin: Option<SocketAddr>,
    work: Work<C>,
}

/// Deferred work run against the simulation state once per tick.
///
/// Handles are cheap to clone; the receive side pushes from its own thread while the
/// simulation thread drains. A drain only runs what was queued when it started, so work
/// pushed from inside a unit of work waits for the next tick.
pub struct WorkQueue<C> {
    inner: Arc<Mutex<VecDeque<QueuedWork<C>>>>,
}

impl<C> Clone for WorkQueue<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for WorkQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for WorkQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("len", &self.len()).finish()
    }
}

impl<C> WorkQueue<C> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn push<F>(&self, work: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.inner.lock().push_back(QueuedWork {
            origin: None,
            work: Box::new(work),
        });
    }

    /// Queues work on behalf of a peer so it can be dropped if that peer leaves first.
    pub fn push_from<F>(&self, origin: SocketAddr, work: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.inner.lock().push_back(QueuedWork {
            origin: Some(origin),
            work: Box::new(work),
        });
    }

    pub fn drain(&self, ctx: &mut C) -> usize {
        let batch: Vec<QueuedWork<C>> = self.inner.lock().drain(..).collect();
        let count = batch.len();
        for item in batch {
            (item.work)(ctx);
        }
        count
    }

    pub fn discard_from(&self, origin: &SocketAddr) -> usize {
        let mut queue = self.inner.lock();
        let before = queue.len();
        queue.retain(|item| item.origin.as_ref() != Some(origin));
        before - queue.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        entries: Vec<u32>,
        queue: WorkQueue<Log>,
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::<Log>::new();
        for i in 0..4 {
            queue.push(move |log: &mut Log| log.entries.push(i));
        }

        let mut log = Log::default();
        assert_eq!(queue.drain(&mut log), 4);
        assert_eq!(log.entries, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_work_queued_during_drain_waits() {
        let mut log = Log::default();
        let queue = log.queue.clone();
        queue.push(|log: &mut Log| {
            log.entries.push(1);
            log.queue.push(|log: &mut Log| log.entries.push(2));
        });

        assert_eq!(queue.drain(&mut log), 1);
        assert_eq!(log.entries, vec![1]);
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(&mut log), 1);
        assert_eq!(log.entries, vec![1, 2]);
    }

    #[test]
    fn test_discard_from_peer() {
        let a = SocketAddr::from(([127, 0, 0, 1], 1000));
        let b = SocketAddr::from(([127, 0, 0, 1], 1001));
        let queue = WorkQueue::<Log>::new();
        queue.push_from(a, |log: &mut Log| log.entries.push(1));
        queue.push_from(b, |log: &mut Log| log.entries.push(2));
        queue.push_from(a, |log: &mut Log| log.entries.push(3));
        queue.push(|log: &mut Log| log.entries.push(4));

        assert_eq!(queue.discard_from(&a), 2);

        let mut log = Log::default();
        queue.drain(&mut log);
        assert_eq!(log.entries, vec![2, 4]);
    }

    #[test]
    fn test_push_from_other_thread() {
        let queue = WorkQueue::<Log>::new();
        let sender = queue.clone();
        std::thread::spawn(move || {
            sender.push(|log: &mut Log| log.entries.push(7));
        })
        .join()
        .unwrap();

        let mut log = Log::default();
        queue.drain(&mut log);
        assert_eq!(log.entries, vec![7]);
    }
}
