//! In-memory metadata Agent.

use async_trait::async_trait;
use chronicle_core::{
    Agent, ChronicleError, HistoryId, InstanceId, LogPosition, Metadata, PeerId, Result,
    SystemState,
};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemKind {
    Provisioned,
    Removed,
    Joining,
}

struct AgentInner {
    kind: SystemKind,
    meta: Metadata,
    removal_recorded: bool,
}

/// An [`Agent`] backed by a mutable in-memory metadata snapshot.
///
/// Vote grants follow the production rule: the history must match and the
/// candidate's log position must be at least our own. Membership answers
/// come straight from the configured member map.
pub struct InMemoryAgent {
    inner: Mutex<AgentInner>,
}

impl InMemoryAgent {
    pub fn provisioned(meta: Metadata) -> Self {
        Self::with_kind(SystemKind::Provisioned, meta)
    }

    pub fn removed(meta: Metadata) -> Self {
        Self::with_kind(SystemKind::Removed, meta)
    }

    pub fn joining(meta: Metadata) -> Self {
        Self::with_kind(SystemKind::Joining, meta)
    }

    fn with_kind(kind: SystemKind, meta: Metadata) -> Self {
        Self {
            inner: Mutex::new(AgentInner {
                kind,
                meta,
                removal_recorded: false,
            }),
        }
    }

    /// The current metadata snapshot.
    pub fn metadata(&self) -> Metadata {
        self.inner.lock().meta.clone()
    }

    /// Mutates the metadata in place, simulating replicated log effects.
    pub fn update_metadata(&self, update: impl FnOnce(&mut Metadata)) {
        update(&mut self.inner.lock().meta);
    }

    /// Whether `mark_removed` has been called.
    pub fn removal_recorded(&self) -> bool {
        self.inner.lock().removal_recorded
    }
}

#[async_trait]
impl Agent for InMemoryAgent {
    async fn get_system_state(&self) -> Result<SystemState> {
        let inner = self.inner.lock();
        Ok(match inner.kind {
            SystemKind::Provisioned => SystemState::Provisioned(inner.meta.clone()),
            SystemKind::Removed => SystemState::Removed(inner.meta.clone()),
            SystemKind::Joining => SystemState::JoiningCluster(inner.meta.clone()),
        })
    }

    async fn get_metadata(&self) -> Result<Metadata> {
        Ok(self.inner.lock().meta.clone())
    }

    async fn check_grant_vote(&self, history_id: HistoryId, position: LogPosition) -> Result<()> {
        let inner = self.inner.lock();
        if history_id != inner.meta.history_id {
            return Err(ChronicleError::HistoryMismatch {
                ours: inner.meta.history_id,
                theirs: history_id,
            });
        }
        let ours = inner.meta.position();
        if position < ours {
            return Err(ChronicleError::PositionBehind {
                ours,
                theirs: position,
            });
        }
        Ok(())
    }

    async fn check_member(
        &self,
        history_id: HistoryId,
        peer: PeerId,
        instance_id: InstanceId,
        _peer_seqno: u64,
    ) -> Result<bool> {
        let inner = self.inner.lock();
        if history_id != inner.meta.history_id {
            return Err(ChronicleError::HistoryMismatch {
                ours: inner.meta.history_id,
                theirs: history_id,
            });
        }
        Ok(inner.meta.config.members.get(&peer) == Some(&instance_id))
    }

    async fn mark_removed(&self, peer: PeerId, instance_id: InstanceId) -> Result<()> {
        let mut inner = self.inner.lock();
        if peer != inner.meta.peer || instance_id != inner.meta.instance_id {
            return Err(ChronicleError::agent("mark_removed for a different node"));
        }
        inner.kind = SystemKind::Removed;
        inner.removal_recorded = true;
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        Ok(())
    }
}
