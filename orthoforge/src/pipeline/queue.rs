//! Bounded FIFO work queue with sentinel shutdown.
//!
//! The producer pushes work items and blocks once the queue is full, so a
//! slow consumer naturally throttles the producer. Workers pop until they
//! see a [`QueueItem::Shutdown`] sentinel; the coordinator pushes one
//! sentinel per worker once the stage has drained.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// One entry handed to a worker.
#[derive(Debug)]
pub enum QueueItem<T> {
    /// A unit of work.
    Work(T),
    /// Stop signal; the worker that pops this exits its loop.
    Shutdown,
}

struct Entry<T> {
    item: QueueItem<T>,
    // Whether this entry holds a capacity slot. Requeued items and
    // sentinels bypass capacity so workers can never deadlock pushing
    // back into a full queue.
    counted: bool,
}

/// Bounded multi-producer multi-consumer FIFO queue.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<Entry<T>>>,
    slots: Semaphore,
    ready: Semaphore,
    capacity: usize,
    // Work items popped but not yet acknowledged via `task_done`.
    // Incremented under the items lock so `is_idle` never observes an
    // item as neither queued nor in flight.
    in_flight: AtomicUsize,
}

impl<T> WorkQueue<T> {
    /// Creates a queue with room for `capacity` produced items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Capacity this queue was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of work items currently queued (sentinels excluded).
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .iter()
            .filter(|e| matches!(e.item, QueueItem::Work(_)))
            .count()
    }

    /// True if no work items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if no work items are queued and none are being processed.
    ///
    /// Coordinators poll this to decide when a stage has drained.
    pub fn is_idle(&self) -> bool {
        let items = self.items.lock();
        let queued = items
            .iter()
            .any(|e| matches!(e.item, QueueItem::Work(_)));
        !queued && self.in_flight.load(Ordering::Acquire) == 0
    }

    /// Acknowledges that a popped work item has been fully processed.
    ///
    /// Every [`QueueItem::Work`] returned by `pop` or `try_pop` must be
    /// acknowledged exactly once, requeues included.
    pub fn task_done(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Pushes a work item, waiting until a capacity slot is free.
    pub async fn push(&self, item: T) {
        let permit = self.slots.acquire().await.expect("queue slots closed");
        permit.forget();
        self.items.lock().push_back(Entry {
            item: QueueItem::Work(item),
            counted: true,
        });
        self.ready.add_permits(1);
    }

    /// Re-inserts a work item without waiting for capacity.
    ///
    /// Used by workers retrying a failed item. Never blocks.
    pub fn requeue(&self, item: T) {
        self.items.lock().push_back(Entry {
            item: QueueItem::Work(item),
            counted: false,
        });
        self.ready.add_permits(1);
    }

    /// Appends one shutdown sentinel. Never blocks.
    pub fn push_shutdown(&self) {
        self.items.lock().push_back(Entry {
            item: QueueItem::Shutdown,
            counted: false,
        });
        self.ready.add_permits(1);
    }

    /// Pops the next entry, waiting until one is available.
    ///
    /// A returned work item counts as in flight until `task_done`.
    pub async fn pop(&self) -> QueueItem<T> {
        let permit = self.ready.acquire().await.expect("queue ready closed");
        permit.forget();
        let entry = {
            let mut items = self.items.lock();
            let entry = items.pop_front().expect("ready permit without entry");
            if matches!(entry.item, QueueItem::Work(_)) {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
            entry
        };
        if entry.counted {
            self.slots.add_permits(1);
        }
        entry.item
    }

    /// Pops without waiting; `None` if the queue is empty.
    ///
    /// Used to discard leftover items after cancellation.
    pub fn try_pop(&self) -> Option<QueueItem<T>> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        let entry = {
            let mut items = self.items.lock();
            let entry = items.pop_front().expect("ready permit without entry");
            if matches!(entry.item, QueueItem::Work(_)) {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
            }
            entry
        };
        if entry.counted {
            self.slots.add_permits(1);
        }
        Some(entry.item)
    }
}
