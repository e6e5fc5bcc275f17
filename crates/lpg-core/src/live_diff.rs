//! Live diff between consecutive inventory polls.
//!
//! Each poll replaces the previous id set. Ids present now but absent from
//! the previous poll are flagged as new for a fixed time; every poll
//! generation owns one timer that clears only the flags it set.

use crate::models::{GraphNode, INTERNET_NODE_ID};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Settings for the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDiffConfig {
    /// How long a resource stays flagged as new.
    #[serde(default = "default_flag_ttl_secs")]
    pub flag_ttl_secs: u64,
    /// Names quoted in a notice.
    #[serde(default = "default_example_count")]
    pub example_count: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_flag_ttl_secs() -> u64 {
    10
}

fn default_example_count() -> usize {
    3
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for LiveDiffConfig {
    fn default() -> Self {
        Self {
            flag_ttl_secs: default_flag_ttl_secs(),
            example_count: default_example_count(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl LiveDiffConfig {
    pub fn flag_ttl(&self) -> Duration {
        Duration::from_secs(self.flag_ttl_secs)
    }
}

/// Raised when a poll finds resources that were absent from the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewResourceNotice {
    pub generation: u64,
    /// Number of new resources.
    pub count: usize,
    /// Up to `example_count` display names, ordered by id.
    pub examples: Vec<String>,
}

impl NewResourceNotice {
    /// Human readable summary, e.g. `4 new resources: a, b, c and 1 more`.
    pub fn message(&self) -> String {
        let noun = if self.count == 1 { "resource" } else { "resources" };
        let mut text = format!("{} new {}: {}", self.count, noun, self.examples.join(", "));
        let rest = self.count.saturating_sub(self.examples.len());
        if rest > 0 {
            text.push_str(&format!(" and {} more", rest));
        }
        text
    }
}

/// Result of one observation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollDiff {
    pub generation: u64,
    /// Added ids, sorted.
    pub added: Vec<String>,
    pub notice: Option<NewResourceNotice>,
}

#[derive(Default)]
struct TrackerState {
    /// `None` until the first poll.
    previous: Option<HashSet<String>>,
    generation: u64,
    /// New id -> generation that flagged it.
    flags: HashMap<String, u64>,
    timers: HashMap<u64, JoinHandle<()>>,
    disposed: bool,
}

/// Tracks resource ids across polls.
pub struct LiveDiffTracker {
    state: Arc<RwLock<TrackerState>>,
    config: LiveDiffConfig,
    notices: broadcast::Sender<NewResourceNotice>,
}

impl LiveDiffTracker {
    pub fn new(config: LiveDiffConfig) -> Self {
        let (notices, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(TrackerState::default())),
            config,
            notices,
        }
    }

    pub fn config(&self) -> &LiveDiffConfig {
        &self.config
    }

    /// Notices for every poll that found new resources.
    pub fn subscribe(&self) -> broadcast::Receiver<NewResourceNotice> {
        self.notices.subscribe()
    }

    /// Records a poll and flags what is new.
    ///
    /// The first poll only establishes the baseline. The internet node is
    /// synthetic and never counted.
    pub async fn observe(&self, current: &[GraphNode]) -> PollDiff {
        let mut state = self.state.write().await;
        if state.disposed {
            return PollDiff::default();
        }

        state.generation += 1;
        let generation = state.generation;

        let names: BTreeMap<&str, &str> = current
            .iter()
            .filter(|n| n.id != INTERNET_NODE_ID)
            .map(|n| (n.id.as_str(), n.display_name.as_str()))
            .collect();
        let ids: HashSet<String> = names.keys().map(|id| id.to_string()).collect();

        let added: Vec<String> = match &state.previous {
            Some(previous) => names
                .keys()
                .filter(|id| !previous.contains(**id))
                .map(|id| id.to_string())
                .collect(),
            None => Vec::new(),
        };

        // Flags only ever point at resources that still exist.
        state.flags.retain(|id, _| ids.contains(id));
        state.previous = Some(ids);

        if added.is_empty() {
            debug!(generation, "Poll observed, nothing new");
            return PollDiff {
                generation,
                added,
                notice: None,
            };
        }

        for id in &added {
            state.flags.insert(id.clone(), generation);
        }
        let timer = self.spawn_clear_timer(generation);
        state.timers.insert(generation, timer);
        drop(state);

        let notice = NewResourceNotice {
            generation,
            count: added.len(),
            examples: added
                .iter()
                .take(self.config.example_count)
                .filter_map(|id| names.get(id.as_str()).map(|n| n.to_string()))
                .collect(),
        };
        info!(generation, count = notice.count, "{}", notice.message());
        // No receivers is fine.
        let _ = self.notices.send(notice.clone());

        PollDiff {
            generation,
            added,
            notice: Some(notice),
        }
    }

    fn spawn_clear_timer(&self, generation: u64) -> JoinHandle<()> {
        let state: Weak<RwLock<TrackerState>> = Arc::downgrade(&self.state);
        let ttl = self.config.flag_ttl();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut state = state.write().await;
            let before = state.flags.len();
            state.flags.retain(|_, flagged_by| *flagged_by != generation);
            state.timers.remove(&generation);
            debug!(
                generation,
                cleared = before - state.flags.len(),
                "Cleared new-resource flags"
            );
        })
    }

    pub async fn is_new(&self, id: &str) -> bool {
        self.state.read().await.flags.contains_key(id)
    }

    /// Currently flagged ids, sorted.
    pub async fn new_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.flags.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Copies the current flags onto `nodes`.
    pub async fn apply_flags(&self, nodes: &mut [GraphNode]) {
        let state = self.state.read().await;
        for node in nodes.iter_mut() {
            node.is_new = state.flags.contains_key(&node.id);
        }
    }

    /// Number of clear timers still pending.
    pub async fn pending_timers(&self) -> usize {
        self.state.read().await.timers.len()
    }

    pub async fn is_disposed(&self) -> bool {
        self.state.read().await.disposed
    }

    /// Cancels every timer and drops all state. Later polls are ignored.
    pub async fn dispose(&self) {
        let mut state = self.state.write().await;
        for (_, timer) in state.timers.drain() {
            timer.abort();
        }
        state.flags.clear();
        state.previous = None;
        state.disposed = true;
        debug!("Live diff tracker disposed");
    }
}

impl Default for LiveDiffTracker {
    fn default() -> Self {
        Self::new(LiveDiffConfig::default())
    }
}

impl Drop for LiveDiffTracker {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_write() {
            for (_, timer) in state.timers.drain() {
                timer.abort();
            }
        }
    }
}
