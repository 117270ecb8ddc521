//! Configuration system.
//!
//! Loads sync configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

use crate::frame::FrameName;

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed tick rate for the sync pass.
    pub tick_hz: u32,
    /// Position smoothing time constant in seconds.
    #[serde(default = "default_smooth_time")]
    pub smooth_time: f32,
    /// Frame observers snap to before any pose has been received, and the
    /// fallback when an entity has no assignment.
    #[serde(default = "default_frame")]
    pub default_frame: FrameName,
    /// Frame every entity registers under one tick after initializing.
    #[serde(default = "default_start_frame")]
    pub start_frame: FrameName,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
}

fn default_smooth_time() -> f32 {
    0.1
}

fn default_frame() -> FrameName {
    FrameName::Sun
}

fn default_start_frame() -> FrameName {
    FrameName::TimberHearth
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41000".to_string(),
            tick_hz: 60,
            smooth_time: default_smooth_time(),
            default_frame: default_frame(),
            start_frame: default_start_frame(),
            player_name: default_player_name(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
