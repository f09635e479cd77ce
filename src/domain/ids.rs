//! Newtype identifiers.
//!
//! Every entity id is a distinct type wrapping [`Uuid`] so the compiler
//! rejects passing, say, a `TaskId` where an `AgentId` is expected — the
//! teacher's `services::event_bus` does the same for `EventId` and
//! `SequenceNumber`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(AgentId, "Identifier for an [`crate::domain::Agent`].");
uuid_id!(TaskId, "Identifier for a [`crate::domain::Task`].");
uuid_id!(ObjectiveId, "Identifier for an [`crate::domain::Objective`].");
uuid_id!(MemoryEntryId, "Identifier for a [`crate::domain::MemoryEntry`].");
uuid_id!(PoolId, "Identifier for a [`crate::domain::Pool`].");
uuid_id!(ExecutionId, "Identifier for a background executor submission.");
uuid_id!(ConsensusRoundId, "Identifier for a swarm consensus round.");

/// Composite agent identity: node-id + instance-id + a per-node sequence,
/// per spec §3 ("stable identifier (composite: node-id + instance-id +
/// sequence)"). `AgentId` above is the opaque lookup key derived from it;
/// `AgentIdentity` is retained on the [`crate::domain::Agent`] record for
/// display and for reconstructing provenance across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub node_id: String,
    pub instance_id: Uuid,
    pub sequence: u64,
}

impl AgentIdentity {
    #[must_use]
    pub fn new(node_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            node_id: node_id.into(),
            instance_id: Uuid::new_v4(),
            sequence,
        }
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node_id, self.instance_id, self.sequence)
    }
}
