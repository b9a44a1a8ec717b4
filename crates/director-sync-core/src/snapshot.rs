//! Latest-state cache used to bootstrap newly connected peers

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::is_truthy;

/// Application update types worth replaying to a late joiner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    State,
    Score,
    #[serde(rename = "postmatch")]
    PostMatch,
}

impl UpdateKind {
    /// Replay order of a snapshot
    pub const ALL: [UpdateKind; 3] = [UpdateKind::State, UpdateKind::Score, UpdateKind::PostMatch];

    pub fn tag(self) -> &'static str {
        match self {
            UpdateKind::State => "state",
            UpdateKind::Score => "score",
            UpdateKind::PostMatch => "postmatch",
        }
    }

    /// Field an update of this kind must carry
    pub fn required_field(self) -> &'static str {
        match self {
            UpdateKind::State => "state",
            UpdateKind::Score => "scoreData",
            UpdateKind::PostMatch => "postMatchData",
        }
    }

    /// Recognize an application update by its `type` tag and required field
    pub fn classify(update: &Value) -> Option<UpdateKind> {
        let tag = update.get("type")?.as_str()?;
        let kind = UpdateKind::ALL.into_iter().find(|k| k.tag() == tag)?;
        update
            .get(kind.required_field())
            .filter(|v| is_truthy(v))
            .map(|_| kind)
    }
}

/// Latest payload per update kind, replaced (never merged) on every write
#[derive(Debug, Default, Clone)]
pub struct SnapshotStore {
    state: Option<Value>,
    score: Option<Value>,
    postmatch: Option<Value>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `update` if it is one of the recognized kinds.
    /// Returns the kind it was filed under.
    pub fn remember(&mut self, update: &Value) -> Option<UpdateKind> {
        let kind = UpdateKind::classify(update)?;
        *self.slot_mut(kind) = Some(update.clone());
        Some(kind)
    }

    pub fn get(&self, kind: UpdateKind) -> Option<&Value> {
        match kind {
            UpdateKind::State => self.state.as_ref(),
            UpdateKind::Score => self.score.as_ref(),
            UpdateKind::PostMatch => self.postmatch.as_ref(),
        }
    }

    /// Stored payloads in state, score, postmatch order
    pub fn payloads(&self) -> Vec<Value> {
        UpdateKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).cloned())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.score.is_none() && self.postmatch.is_none()
    }

    fn slot_mut(&mut self, kind: UpdateKind) -> &mut Option<Value> {
        match kind {
            UpdateKind::State => &mut self.state,
            UpdateKind::Score => &mut self.score,
            UpdateKind::PostMatch => &mut self.postmatch,
        }
    }
}
