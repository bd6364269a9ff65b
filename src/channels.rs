//! Channel kinds, connection handles, and the routing registry
//!
//! A channel is one logical subscription multiplexed over the single
//! streaming socket. The registry owns the id-to-kind mapping; callers only
//! ever hold opaque [`ChannelConnection`] handles.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// The kinds of channel a streaming session can open
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    GlobalTimeline,
    HomeTimeline,
    LocalTimeline,
    HybridTimeline,
    /// Per-account notifications and events
    Main,
    /// Pseudo-channel for updates to one note, keyed by the note id
    NoteSubscription { note_id: String },
}

impl ChannelKind {
    /// Wire name of the channel, as sent in `connect` frames
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::GlobalTimeline => "globalTimeline",
            ChannelKind::HomeTimeline => "homeTimeline",
            ChannelKind::LocalTimeline => "localTimeline",
            ChannelKind::HybridTimeline => "hybridTimeline",
            ChannelKind::Main => "main",
            ChannelKind::NoteSubscription { .. } => "noteSubscription",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::NoteSubscription { note_id } => {
                write!(f, "noteSubscription:{note_id}")
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Handle to one open logical channel
///
/// Holding the handle confers nothing but the ability to disconnect it and
/// to match inbound frames against its id. Registry state is never exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConnection {
    id: String,
    kind: ChannelKind,
}

impl ChannelConnection {
    pub(crate) fn new(id: String, kind: ChannelKind) -> Self {
        Self { id, kind }
    }

    /// The channel id frames for this channel are tagged with.
    ///
    /// For note subscriptions this is the note id itself.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ChannelKind {
        &self.kind
    }
}

/// Routing table mapping live channel ids to their kinds
#[derive(Debug, Default)]
pub(crate) struct ChannelRegistry {
    inner: Mutex<HashMap<String, ChannelKind>>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, id: String, kind: ChannelKind) {
        self.inner.lock().insert(id, kind);
    }

    /// Remove a channel id. Returns whether it was registered.
    pub(crate) fn remove(&self, id: &str) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Drop every registration (socket teardown)
    pub(crate) fn clear(&self) {
        self.inner.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
