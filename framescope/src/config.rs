use serde::Deserialize;
use std::error::Error;

/// Tunables shared by recorders and views.
///
/// Every field has a default, so a partial JSON document such as
/// `{ "retention": 10.0 }` is a valid configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// How long (in seconds) finalized events stay in a recorder's timeline.
    pub retention: f64,
    /// A recorder flushes its local log once its scope stack is empty and it
    /// holds at least this many events.
    pub flush_threshold: usize,
    /// Hard cap on live events per timeline; the oldest are dropped beyond it.
    pub max_buffered_events: usize,
    /// How many consecutive windows a node may be missing before a view
    /// evicts it.
    pub keep_alive_frames: u32,
    /// Number of accounting frames that make up one view window.
    pub frames_per_window: u32,
    /// Minimum length of a view window in seconds. A window is published
    /// once it has `frames_per_window` frames and is at least this old.
    /// Views following another thread's recorder count frames on their own
    /// thread, so a window spanning many frames (e.g. 1.5 s) keeps their
    /// numbers steady.
    pub window_duration: f64,
    /// Maximum number of released nodes a view keeps for reuse.
    pub node_pool_capacity: usize,
    /// Events nested deeper than this are not aggregated by views.
    pub max_tree_depth: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            retention: 4.0,
            flush_threshold: 16,
            max_buffered_events: 1 << 20,
            keep_alive_frames: 1,
            frames_per_window: 1,
            window_duration: 0.0,
            node_pool_capacity: 10_000,
            max_tree_depth: 256,
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Config, Box<dyn Error + Send + Sync>> {
        let config: Config = serde_json::from_str(s)?;

        if !(config.retention > 0.0) {
            return Err(format!("retention must be positive, got {}", config.retention).into());
        }
        if !(config.window_duration >= 0.0) {
            return Err(format!(
                "window_duration must not be negative, got {}",
                config.window_duration
            )
            .into());
        }
        if config.frames_per_window == 0 {
            return Err("frames_per_window must be at least 1".into());
        }

        Ok(config)
    }
}
