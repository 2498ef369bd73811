//! Cancellable one-shot and repeating timers for the monitor loop.
//!
//! Each timer lives in a keyed slot. Scheduling a key that already has a
//! timer cancels the old one first, so a key never has two live timers.
//! Firings are delivered over a channel and tagged with a slot id; a firing
//! whose slot was cancelled or replaced in the meantime is discarded by
//! [`TimerSet::next_fired`].

use std::{collections::HashMap, hash::Hash, time::Duration};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

struct Fired<K> {
    key: K,
    id: u64,
}

struct TimerEntry {
    id: u64,
    repeating: bool,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimerEntry {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort(); // best-effort
    }
}

pub struct TimerSet<K> {
    tx: mpsc::UnboundedSender<Fired<K>>,
    rx: mpsc::UnboundedReceiver<Fired<K>>,
    slots: HashMap<K, TimerEntry>,
    next_id: u64,
    closed: bool,
}

impl<K> TimerSet<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            slots: HashMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Arm a one-shot timer, replacing any timer under the same key.
    ///
    /// Returns `false` once the set has been shut down.
    pub fn schedule(&mut self, key: K, delay: Duration) -> bool {
        if self.closed {
            return false;
        }
        self.cancel(&key);

        let id = self.alloc_id();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.tx.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
              _ = token.cancelled() => {}
              _ = sleep(delay) => {
                let _ = tx.send(Fired { key: fired_key, id });
              }
            }
        });

        self.slots.insert(
            key,
            TimerEntry {
                id,
                repeating: false,
                cancel,
                handle,
            },
        );
        true
    }

    /// Arm a repeating timer whose first tick is one `period` from now.
    pub fn schedule_every(&mut self, key: K, period: Duration) -> bool {
        if self.closed || period.is_zero() {
            return false;
        }
        self.cancel(&key);

        let id = self.alloc_id();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.tx.clone();
        let fired_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                  _ = token.cancelled() => break,
                  _ = tick.tick() => {
                    if tx.send(Fired { key: fired_key.clone(), id }).is_err() {
                      break;
                    }
                  }
                }
            }
        });

        self.slots.insert(
            key,
            TimerEntry {
                id,
                repeating: true,
                cancel,
                handle,
            },
        );
        true
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        match self.slots.remove(key) {
            Some(entry) => {
                entry.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    /// Cancel everything and refuse new timers from now on.
    pub fn shutdown(&mut self) {
        self.closed = true;
        for (_, entry) in self.slots.drain() {
            entry.stop();
        }
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed
    }

    /// Wait for the next live firing. Stale firings are dropped here.
    ///
    /// Cancel-safe: nothing is lost if the future is dropped between firings.
    pub async fn next_fired(&mut self) -> K {
        loop {
            let Some(fired) = self.rx.recv().await else {
                // We hold a sender ourselves, so this is unreachable in practice.
                std::future::pending::<()>().await;
                continue;
            };
            if self.accept(&fired) {
                return fired.key;
            }
        }
    }

    fn accept(&mut self, fired: &Fired<K>) -> bool {
        let Some(entry) = self.slots.get(&fired.key) else {
            return false;
        };
        if entry.id != fired.id {
            return false;
        }
        if !entry.repeating {
            self.slots.remove(&fired.key);
        }
        true
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl<K> Default for TimerSet<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, entry) in self.slots.drain() {
            entry.stop();
        }
    }
}
