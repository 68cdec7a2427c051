// Transcript Aggregator
// Merges final / delta / snapshot transcript fragments per speaker role.
// Delivery is at-least-once, so finals are deduplicated by id and by text.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// How an inbound fragment relates to what is displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Authoritative completed utterance
    Final,
    /// Incremental text appended to the in-progress utterance
    Delta,
    /// Full replacement of the in-progress utterance
    Snapshot,
}

/// Text to (re)display for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptUpdate {
    pub role: Role,
    pub text: String,
    pub is_final: bool,
}

/// Collapse runs of whitespace and trim.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// FIFO-evicted id set so long sessions stay bounded
#[derive(Debug, Default)]
struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..Default::default()
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.set.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}

#[derive(Debug)]
pub struct TranscriptState {
    in_progress: String,
    last_final: String,
    seen_ids: SeenIds,
}

impl TranscriptState {
    fn new(max_seen_ids: usize) -> Self {
        Self {
            in_progress: String::new(),
            last_final: String::new(),
            seen_ids: SeenIds::new(max_seen_ids),
        }
    }

    pub fn in_progress(&self) -> &str {
        &self.in_progress
    }

    pub fn last_final(&self) -> &str {
        &self.last_final
    }

    fn reset(&mut self) {
        self.in_progress.clear();
        self.last_final.clear();
        self.seen_ids.clear();
    }
}

pub struct TranscriptAggregator {
    user: TranscriptState,
    assistant: TranscriptState,
}

impl TranscriptAggregator {
    pub fn new(max_seen_ids: usize) -> Self {
        Self {
            user: TranscriptState::new(max_seen_ids),
            assistant: TranscriptState::new(max_seen_ids),
        }
    }

    pub fn state(&self, role: Role) -> &TranscriptState {
        match role {
            Role::User => &self.user,
            Role::Assistant => &self.assistant,
        }
    }

    fn state_mut(&mut self, role: Role) -> &mut TranscriptState {
        match role {
            Role::User => &mut self.user,
            Role::Assistant => &mut self.assistant,
        }
    }

    /// Apply one fragment; `None` means nothing to redisplay (duplicate or no-op).
    pub fn apply(&mut self, role: Role, kind: FragmentKind, text: &str, id: Option<&str>) -> Option<TranscriptUpdate> {
        let state = self.state_mut(role);
        match kind {
            FragmentKind::Final => {
                if id.is_some_and(|id| state.seen_ids.contains(id)) {
                    return None;
                }
                let normalized = normalize(text);
                if normalized.is_empty() || normalized == state.last_final {
                    return None;
                }
                state.last_final = normalized.clone();
                state.in_progress.clear();
                if let Some(id) = id {
                    state.seen_ids.insert(id.to_owned());
                }
                Some(TranscriptUpdate {
                    role,
                    text: normalized,
                    is_final: true,
                })
            }
            FragmentKind::Delta => {
                if text.is_empty() || state.in_progress.ends_with(text) {
                    return None;
                }
                state.in_progress.push_str(text);
                Some(TranscriptUpdate {
                    role,
                    text: state.in_progress.clone(),
                    is_final: false,
                })
            }
            FragmentKind::Snapshot => {
                if normalize(text) == normalize(&state.in_progress) {
                    return None;
                }
                state.in_progress = text.to_owned();
                Some(TranscriptUpdate {
                    role,
                    text: state.in_progress.clone(),
                    is_final: false,
                })
            }
        }
    }

    /// Session start / disconnect
    pub fn reset(&mut self) {
        self.user.reset();
        self.assistant.reset();
    }
}
