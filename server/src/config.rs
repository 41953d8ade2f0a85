//! Runtime configuration for the server.
//!
//! Defaults mirror a plain public server: empty world, no authentication,
//! no rate limiting. Tests build a `Config` by hand and tweak the fields
//! they care about.

use shared::Pose;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4080;
pub const DEFAULT_DAY_LENGTH: u32 = 600;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 4096;
pub const SPAWN_POINT: Pose = Pose::new(0.0, 0.0, 0.0, 0.0, 0.0);

/// How often dirty world state is flushed to disk.
pub const COMMIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Snapshot file, or `None` to keep world state in memory only.
    pub db_path: Option<PathBuf>,
    /// Terrain seed. `None` serves an empty world and leaves generation
    /// to the clients' own worldgen.
    pub seed: Option<u32>,
    /// Length of one in-game day in seconds, reported to clients on join.
    pub day_length: u32,
    pub spawn_point: Pose,
    /// Enforce per-connection frame budgets and drop abusive clients.
    pub rate_limit: bool,
    /// Refuse building and nick changes from clients that are not logged in.
    pub auth_required: bool,
    /// Record every accepted block change with a timestamp.
    pub record_history: bool,
    /// Outbound frames buffered per connection before it is dropped as too slow.
    pub outbox_capacity: usize,
    /// Name of the worldgen script advertised to clients, if any.
    pub worldgen: Option<String>,
    /// World options written to the store before the model starts.
    pub startup_options: Vec<(String, String)>,
    pub allowed_items: HashSet<i32>,
    pub indestructible_items: HashSet<i32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            db_path: None,
            seed: None,
            day_length: DEFAULT_DAY_LENGTH,
            spawn_point: SPAWN_POINT,
            rate_limit: false,
            auth_required: false,
            record_history: false,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            worldgen: None,
            startup_options: Vec::new(),
            allowed_items: default_allowed_items(),
            indestructible_items: default_indestructible_items(),
        }
    }
}

/// Items players may place or clear. Placement of anything else is rejected.
pub fn default_allowed_items() -> HashSet<i32> {
    let mut items: HashSet<i32> = (0..=15).collect();
    items.extend(17..=23);
    items.extend(32..=63);
    items
}

/// Items that can never be destroyed once present (clouds).
pub fn default_indestructible_items() -> HashSet<i32> {
    HashSet::from([16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_items_cover_documented_ranges() {
        let items = default_allowed_items();
        assert!(items.contains(&0));
        assert!(items.contains(&15));
        assert!(items.contains(&17));
        assert!(items.contains(&23));
        assert!(items.contains(&32));
        assert!(items.contains(&63));
        assert!(!items.contains(&16));
        assert!(!items.contains(&24));
        assert!(!items.contains(&31));
        assert!(!items.contains(&64));
    }

    #[test]
    fn test_defaults_are_permissive() {
        let config = Config::default();
        assert!(!config.rate_limit);
        assert!(!config.auth_required);
        assert!(!config.record_history);
        assert!(config.db_path.is_none());
        assert!(config.seed.is_none());
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.indestructible_items.contains(&16));
    }
}
