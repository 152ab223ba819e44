//! Deadline scheduler shared by every timer in a session.
//!
//! Reconnect backoff, notification expiry, the cursor sweep and render polling
//! all go through one [`Scheduler`] so teardown is a single
//! [`cancel_all`](Scheduler::cancel_all). It is not a task spawner: the owner
//! awaits [`next_due`](Scheduler::next_due) in its own select loop and runs
//! the returned payload itself.

use std::collections::{BTreeMap, HashMap};
use tokio::time::{Duration, Instant};

/// Identifies a scheduled task. Stays valid across re-arms of a repeating task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

struct Entry<T> {
    deadline: Instant,
    every: Option<Duration>,
    payload: T,
}

pub struct Scheduler<T> {
    next_id: u64,
    /// (deadline, id) ordering; ids break ties in scheduling order.
    queue: BTreeMap<(Instant, u64), ()>,
    entries: HashMap<u64, Entry<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            queue: BTreeMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Run `payload` once at `deadline`.
    pub fn schedule_at(&mut self, deadline: Instant, payload: T) -> TaskHandle {
        self.insert(deadline, None, payload)
    }

    /// Run `payload` once, `after` from now.
    pub fn schedule_once(&mut self, after: Duration, payload: T) -> TaskHandle {
        self.insert(Instant::now() + after, None, payload)
    }

    /// Run `payload` every `every`, first after one full period.
    pub fn schedule_repeating(&mut self, every: Duration, payload: T) -> TaskHandle {
        // A zero period would spin the owner's loop.
        let every = every.max(Duration::from_millis(1));
        self.insert(Instant::now() + every, Some(every), payload)
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.entries.remove(&handle.0) {
            Some(entry) => {
                self.queue.remove(&(entry.deadline, handle.0));
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        self.queue.clear();
        self.entries.clear();
    }

    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.entries.contains_key(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    fn insert(&mut self, deadline: Instant, every: Option<Duration>, payload: T) -> TaskHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.insert((deadline, id), ());
        self.entries.insert(id, Entry { deadline, every, payload });
        TaskHandle(id)
    }
}

impl<T: Clone> Scheduler<T> {
    /// Take the earliest task whose deadline is `<= now`.
    ///
    /// One-shot tasks are removed; repeating tasks are re-armed one period
    /// later (or one period after `now` if the owner fell behind).
    pub fn pop_due(&mut self, now: Instant) -> Option<(TaskHandle, T)> {
        let (deadline, id) = *self.queue.keys().next()?;
        if deadline > now {
            return None;
        }
        self.queue.remove(&(deadline, id));

        let every = self.entries.get(&id)?.every;
        match every {
            None => {
                let entry = self.entries.remove(&id)?;
                Some((TaskHandle(id), entry.payload))
            }
            Some(every) => {
                let mut next = deadline + every;
                if next <= now {
                    next = now + every;
                }
                let entry = self.entries.get_mut(&id)?;
                entry.deadline = next;
                self.queue.insert((next, id), ());
                Some((TaskHandle(id), entry.payload.clone()))
            }
        }
    }

    /// Wait for the next due task. Pends forever while nothing is scheduled.
    ///
    /// Cancel-safe: nothing is removed until the deadline has passed.
    pub async fn next_due(&mut self) -> (TaskHandle, T) {
        loop {
            match self.next_deadline() {
                Some(deadline) => {
                    tokio::time::sleep_until(deadline).await;
                    if let Some(due) = self.pop_due(Instant::now()) {
                        return due;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_fires_once() {
        let mut s = Scheduler::new();
        let h = s.schedule_once(Duration::from_millis(100), "ttl");
        assert!(s.is_scheduled(h));

        let start = Instant::now();
        let (fired, payload) = s.next_due().await;
        assert_eq!(fired, h);
        assert_eq!(payload, "ttl");
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert!(s.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_deadline_first() {
        let mut s = Scheduler::new();
        s.schedule_once(Duration::from_millis(300), 3);
        s.schedule_once(Duration::from_millis(100), 1);
        s.schedule_once(Duration::from_millis(200), 2);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(s.next_due().await.1);
        }
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_keeps_handle() {
        let mut s = Scheduler::new();
        let h = s.schedule_repeating(Duration::from_secs(1), "sweep");
        let start = Instant::now();
        for i in 1..=3u32 {
            let (fired, _) = s.next_due().await;
            assert_eq!(fired, h);
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_secs(i as u64));
            assert!(elapsed < Duration::from_secs(i as u64) + Duration::from_millis(10));
        }
        assert!(s.cancel(h));
        assert!(s.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_due() {
        let mut s = Scheduler::new();
        let a = s.schedule_once(Duration::from_millis(50), 'a');
        s.schedule_once(Duration::from_millis(80), 'b');
        assert!(s.cancel(a));
        assert!(!s.cancel(a));
        assert_eq!(s.next_due().await.1, 'b');
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scheduler_pends() {
        let mut s: Scheduler<()> = Scheduler::new();
        let res = tokio::time::timeout(Duration::from_secs(60), s.next_due()).await;
        assert!(res.is_err());
    }

    #[test]
    fn test_pop_due_respects_now() {
        let mut s = Scheduler::new();
        let now = Instant::now();
        s.schedule_at(now + Duration::from_millis(10), ());
        assert!(s.pop_due(now).is_none());
        assert!(s.pop_due(now + Duration::from_millis(10)).is_some());
        assert!(s.pop_due(now + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn test_lagging_repeat_rearms_from_now() {
        let mut s = Scheduler::new();
        let h = s.schedule_repeating(Duration::from_millis(100), ());
        let late = Instant::now() + Duration::from_secs(5);
        assert!(s.pop_due(late).is_some());
        assert_eq!(s.next_deadline(), Some(late + Duration::from_millis(100)));
        assert!(s.is_scheduled(h));
    }
}
