//! Core event and hook types for quarry apps
//!
//! This crate provides the foundational types shared between the host runtime
//! and anything that feeds events into it, so the two sides do not depend on
//! each other.

use serde::{Deserialize, Serialize};

mod gate;
mod hook;

pub use gate::{DispatchGate, DispatchSuppression};
pub use hook::{Hook, HookTable, RESERVED_PREFIX};

// ============================================================================
// Event Kinds
// ============================================================================

/// Built-in events an app can subscribe to with an `__on_<event>` function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Fired once per simulation tick
    Tick,
    /// Server finished starting up
    ServerStarts,
    /// Server is shutting down
    ServerShutdown,
    /// A new chunk of the world was generated
    ChunkGenerated,

    // Player events
    /// A player connected
    PlayerJoins,
    /// A player disconnected
    PlayerLeaves,
    /// A player died
    PlayerDies,
    /// A player respawned
    PlayerRespawns,
    /// A player sent a chat message
    PlayerMessage,
    /// A player ran a command
    PlayerCommand,
    /// A player used an item
    PlayerUsesItem,
}

impl EventKind {
    /// Every event kind, in declaration order
    pub const ALL: [EventKind; 11] = [
        EventKind::Tick,
        EventKind::ServerStarts,
        EventKind::ServerShutdown,
        EventKind::ChunkGenerated,
        EventKind::PlayerJoins,
        EventKind::PlayerLeaves,
        EventKind::PlayerDies,
        EventKind::PlayerRespawns,
        EventKind::PlayerMessage,
        EventKind::PlayerCommand,
        EventKind::PlayerUsesItem,
    ];

    /// Look up an event by the name used after `__on_`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "tick" => Some(EventKind::Tick),
            "server_starts" => Some(EventKind::ServerStarts),
            "server_shutdown" => Some(EventKind::ServerShutdown),
            "chunk_generated" => Some(EventKind::ChunkGenerated),
            "player_joins" => Some(EventKind::PlayerJoins),
            "player_leaves" => Some(EventKind::PlayerLeaves),
            "player_dies" => Some(EventKind::PlayerDies),
            "player_respawns" => Some(EventKind::PlayerRespawns),
            "player_message" => Some(EventKind::PlayerMessage),
            "player_command" => Some(EventKind::PlayerCommand),
            "player_uses_item" => Some(EventKind::PlayerUsesItem),
            _ => None,
        }
    }

    /// The name used after `__on_`
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Tick => "tick",
            EventKind::ServerStarts => "server_starts",
            EventKind::ServerShutdown => "server_shutdown",
            EventKind::ChunkGenerated => "chunk_generated",
            EventKind::PlayerJoins => "player_joins",
            EventKind::PlayerLeaves => "player_leaves",
            EventKind::PlayerDies => "player_dies",
            EventKind::PlayerRespawns => "player_respawns",
            EventKind::PlayerMessage => "player_message",
            EventKind::PlayerCommand => "player_command",
            EventKind::PlayerUsesItem => "player_uses_item",
        }
    }

    /// Player events are routed to the player's own host in per-player apps
    pub fn is_player_event(&self) -> bool {
        matches!(
            self,
            EventKind::PlayerJoins
                | EventKind::PlayerLeaves
                | EventKind::PlayerDies
                | EventKind::PlayerRespawns
                | EventKind::PlayerMessage
                | EventKind::PlayerCommand
                | EventKind::PlayerUsesItem
        )
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
