//! Persistent configuration
//!
//! One TOML file under the platform config directory
//! (`<config_dir>/scenefire/config.toml`). Every section has serde defaults,
//! so a partial or empty file loads. Loading normalises connection names and
//! applies the legacy "all disabled means all enabled" rule.

use crate::actuation::Timing;
use crate::pipeline::mapping::{parse_channels, sequential_keys, EventKey, MappingTable, MAX_NOTE};
use crate::pipeline::{FilterSettings, PipelineError};
use crate::remote::{Action, Target};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const APP_DIR: &str = "scenefire";
const CONFIG_FILE: &str = "config.toml";
const NOTE_ON: &str = "note_on";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Fallback credential for connections without their own password.
    pub common_password: String,
    pub connections: Vec<ConnectionConfig>,
    pub trigger: TriggerConfig,
    pub midi: MidiConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub name: String,
    /// `host:port`; a `ws://` style prefix is tolerated.
    #[serde(default)]
    pub addr: String,
    /// Overrides `common_password` when set. An empty string means no
    /// authentication for this connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ConnectionConfig {
    pub fn new(name: &str, addr: &str) -> Self {
        Self {
            name: name.to_string(),
            addr: addr.to_string(),
            password: None,
            enabled: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct TriggerConfig {
    pub spin_window_ms: u64,
    pub timeout_ms: u64,
    pub skew_log: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            spin_window_ms: 2,
            timeout_ms: 5000,
            skew_log: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MidiConfig {
    pub enabled: bool,
    pub device: String,
    /// Comma-separated allow-list, e.g. `"1,2"`. Empty allows all channels.
    pub channels: String,
    pub debounce_ms: u64,
    pub rate_limit_ms: u64,
    /// `"ch:note=Scene"` entries. These win over `notes` for the same key.
    pub mappings: Vec<String>,
    /// Structured `[[midi.notes]]` entries.
    pub notes: Vec<NoteMapping>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device: String::new(),
            channels: String::new(),
            debounce_ms: 30,
            rate_limit_ms: 50,
            mappings: Vec::new(),
            notes: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct NoteMapping {
    /// Only `note_on` entries are used.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub channel: u8,
    pub note: u8,
    pub scene: String,
}

fn default_true() -> bool {
    true
}

fn default_kind() -> String {
    NOTE_ON.to_string()
}

impl AppConfig {
    /// `<config_dir>/scenefire/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine the platform config directory"))?;
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?).await
    }

    /// Reads and normalises the file at `path`. A missing file yields the
    /// defaults.
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        config.normalize();

        info!(
            "Loaded config from {} ({} connections, {} note mappings)",
            path.display(),
            config.connections.len(),
            config.midi.mappings.len() + config.midi.notes.len()
        );
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?).await
    }

    /// Writes a normalised copy of `self` to `path`, creating parent
    /// directories as needed.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let mut config = self.clone();
        config.normalize();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Trims names and addresses, enables every connection if none is enabled
    /// and makes names unique.
    pub fn normalize(&mut self) {
        for conn in &mut self.connections {
            conn.name = conn.name.trim().to_string();
            conn.addr = conn.addr.trim().to_string();
        }
        if !self.connections.is_empty() && self.connections.iter().all(|c| !c.enabled) {
            warn!("All connections are disabled, enabling all of them");
            for conn in &mut self.connections {
                conn.enabled = true;
            }
        }
        normalize_unique_names(&mut self.connections);
    }

    /// Actuation targets, one per connection, disabled ones included.
    pub fn targets(&self) -> Vec<Target> {
        self.connections
            .iter()
            .map(|conn| {
                let credential = conn.password.as_deref().unwrap_or(&self.common_password);
                let mut target = Target::new(conn.name.clone(), &conn.addr, credential);
                target.enabled = conn.enabled;
                target
            })
            .collect()
    }

    /// True when the usable connections do not share one credential. Cached
    /// batches (MIDI triggers, scene switches) are rejected in that case.
    pub fn has_mixed_credentials(&self) -> bool {
        let targets = self.targets();
        let mut usable = targets
            .iter()
            .filter(|t| t.enabled && !t.address.trim().is_empty())
            .map(|t| t.credential.as_str());
        match usable.next() {
            Some(first) => usable.any(|c| c != first),
            None => false,
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            spin_window: Duration::from_millis(self.trigger.spin_window_ms),
            call_timeout: self.call_timeout(),
            skew_log: self.trigger.skew_log,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger.timeout_ms)
    }
}

impl MidiConfig {
    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            rate_limit: Duration::from_millis(self.rate_limit_ms),
            channels: parse_channels(&self.channels),
        }
    }

    /// Structured entries first, then the string entries on top.
    pub fn mapping_table(&self) -> MappingTable {
        let mut table = MappingTable::new();
        for entry in &self.notes {
            if !entry.kind.trim().eq_ignore_ascii_case(NOTE_ON) {
                debug!("Skipping {} mapping for {}:{}", entry.kind, entry.channel, entry.note);
                continue;
            }
            let scene = entry.scene.trim();
            if !(1..=16).contains(&entry.channel) || entry.note > MAX_NOTE || scene.is_empty() {
                warn!(
                    "Skipping invalid note mapping {}:{}={}",
                    entry.channel, entry.note, entry.scene
                );
                continue;
            }
            table.insert(
                EventKey::new(entry.channel, entry.note),
                Action::scene(scene),
            );
        }
        table.extend_note_maps(&self.mappings);
        table
    }

    /// Config that maps `scenes` to consecutive notes on `channel`, starting
    /// at `start_note`. Scenes past note 127 are left unmapped.
    pub fn from_scene_list<S: AsRef<str>>(
        device: &str,
        channel: u8,
        start_note: u8,
        scenes: &[S],
    ) -> Result<Self, PipelineError> {
        if !(1..=16).contains(&channel) {
            return Err(PipelineError::InvalidMapping {
                entry: format!("{}:{}", channel, start_note),
                reason: "channel must be 1-16".to_string(),
            });
        }
        if start_note > MAX_NOTE {
            return Err(PipelineError::InvalidMapping {
                entry: format!("{}:{}", channel, start_note),
                reason: "start note must be 0-127".to_string(),
            });
        }

        let notes: Vec<NoteMapping> = sequential_keys(scenes, channel, start_note)
            .into_iter()
            .map(|(key, scene)| NoteMapping {
                kind: default_kind(),
                channel: key.channel,
                note: key.note,
                scene,
            })
            .collect();
        if notes.len() < scenes.len() {
            warn!(
                "Only {} of {} scenes fit below note {}",
                notes.len(),
                scenes.len(),
                MAX_NOTE
            );
        }

        Ok(Self {
            enabled: true,
            device: device.trim().to_string(),
            channels: channel.to_string(),
            notes,
            ..Self::default()
        })
    }
}

/// Blank names become `Remote N` (1-based position); case-insensitive
/// duplicates get ` (2)`, ` (3)`... suffixes.
pub fn normalize_unique_names(connections: &mut [ConnectionConfig]) {
    let mut used = HashSet::new();
    for (i, conn) in connections.iter_mut().enumerate() {
        let base = match conn.name.trim() {
            "" => format!("Remote {}", i + 1),
            name => name.to_string(),
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while !used.insert(candidate.to_lowercase()) {
            candidate = format!("{} ({})", base, suffix);
            suffix += 1;
        }
        conn.name = candidate;
    }
}
