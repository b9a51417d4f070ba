use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Kind};
use crate::seed::entity::{SeedModule, WorkerAffinity};

/// One unit of work in the queue: a [`SeedModule`] plus, for modules
/// replicated via `WorkerAffinity::Every`, the specific worker it was
/// assigned to. `name` is the queue-unique identity (replicated copies get a
/// `#<worker>` suffix so each can be dequeued and completed independently).
#[derive(Clone, Debug)]
pub struct QueueItem {
    name: String,
    module: SeedModule,
    pinned_worker: Option<u32>,
}

impl QueueItem {
    pub fn new(name: impl Into<String>, module: SeedModule, pinned_worker: Option<u32>) -> Self {
        QueueItem {
            name: name.into(),
            module,
            pinned_worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &SeedModule {
        &self.module
    }

    fn can_take(&self, worker_id: u32) -> bool {
        match self.pinned_worker {
            Some(pinned) => pinned == worker_id,
            None => self.module.worker_affinity().can_take(worker_id),
        }
    }

    fn is_ready(&self, completed_topics: &BTreeSet<String>) -> bool {
        self.module.requires().is_subset(completed_topics)
    }
}

/// Expands a loaded seed's modules into queue items: `WorkerAffinity::Every`
/// modules are replicated once per worker so every worker executes its own
/// copy, per SPEC_FULL.md §4.10/§4.11.
pub fn expand_to_queue_items(modules: &[SeedModule], worker_count: u32) -> Vec<QueueItem> {
    let mut items = Vec::new();
    for module in modules {
        match module.worker_affinity() {
            WorkerAffinity::Every => {
                for worker_id in 1..=worker_count {
                    items.push(QueueItem::new(
                        format!("{}#{worker_id}", module.name()),
                        module.clone(),
                        Some(worker_id),
                    ));
                }
            }
            _ => items.push(QueueItem::new(module.name(), module.clone(), None)),
        }
    }
    items
}

/// A topic DAG: items become dequeueable once every topic they require has
/// been provided by a completed item. Ordering among ready items is
/// unspecified. Grounded on the `tokio::sync::Notify` wake/retry loop used in
/// `other_examples/4a76ad5a_bixority-pg-migrate__src-phases.rs.rs` for
/// worker-pool dispatch, generalized from a flat counter to a topic
/// satisfaction predicate.
pub struct DependencyQueue {
    pending: Mutex<Vec<QueueItem>>,
    completed_topics: Mutex<BTreeSet<String>>,
    notify: Notify,
}

impl DependencyQueue {
    pub fn new(items: Vec<QueueItem>) -> Self {
        DependencyQueue {
            pending: Mutex::new(items),
            completed_topics: Mutex::new(BTreeSet::new()),
            notify: Notify::new(),
        }
    }

    /// Returns one error per required topic with no provider anywhere in the
    /// queue, plus one error per dependency cycle.
    pub fn validate(&self) -> Vec<Error> {
        let items = self.pending.lock().unwrap();
        let mut errors = Vec::new();

        let mut provided: BTreeSet<String> = BTreeSet::new();
        for item in items.iter() {
            provided.extend(item.module.provides().iter().cloned());
        }
        for item in items.iter() {
            for topic in item.module.requires() {
                if !provided.contains(topic) {
                    errors.push(Error::new(
                        Kind::UnprovidedTopic(topic.clone(), item.name.clone()),
                        None,
                    ));
                }
            }
        }

        errors.extend(find_cycles(&items));
        errors
    }

    /// Waits until an item is ready for `worker_id` and returns it, or `None`
    /// once nothing remains pending. Cancellation aborts the wait and clears
    /// the queue so other workers stop finding work too.
    pub async fn dequeue(&self, worker_id: u32, cancellation: &CancellationToken) -> Option<QueueItem> {
        loop {
            {
                let mut pending = self.pending.lock().unwrap();
                if pending.is_empty() {
                    return None;
                }
                let completed = self.completed_topics.lock().unwrap();
                if let Some(index) = pending
                    .iter()
                    .position(|item| item.can_take(worker_id) && item.is_ready(&completed))
                {
                    return Some(pending.remove(index));
                }
            }

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    self.clear();
                    return None;
                }
                _ = self.notify.notified() => {}
            }
        }
    }

    /// Marks `item` done, making its provided topics available to dependents
    /// and waking any worker blocked in [`DependencyQueue::dequeue`].
    pub fn complete(&self, item: &QueueItem) {
        self.completed_topics
            .lock()
            .unwrap()
            .extend(item.module.provides().iter().cloned());
        self.notify.notify_waiters();
    }

    /// Discards every pending item and wakes blocked dequeues so they observe
    /// an empty queue and return `None`.
    pub fn clear(&self) {
        self.pending.lock().unwrap().clear();
        self.notify.notify_waiters();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

fn find_cycles(items: &[QueueItem]) -> Vec<Error> {
    let mut provider_of: HashMap<&str, usize> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        for topic in item.module.provides() {
            provider_of.insert(topic.as_str(), index);
        }
    }

    let mut state = vec![0u8; items.len()]; // 0 unvisited, 1 in-progress, 2 done
    let mut errors = Vec::new();

    for start in 0..items.len() {
        if state[start] == 0 {
            visit(start, items, &provider_of, &mut state, &mut errors);
        }
    }
    errors
}

fn visit(
    index: usize,
    items: &[QueueItem],
    provider_of: &HashMap<&str, usize>,
    state: &mut [u8],
    errors: &mut Vec<Error>,
) {
    state[index] = 1;
    for topic in items[index].module.requires() {
        if let Some(&dep_index) = provider_of.get(topic.as_str()) {
            if dep_index == index {
                continue;
            }
            match state[dep_index] {
                1 => errors.push(Error::new(
                    Kind::DependencyCycle(items[dep_index].name.clone()),
                    None,
                )),
                0 => visit(dep_index, items, provider_of, state, errors),
                _ => {}
            }
        }
    }
    state[index] = 2;
}
