//! Node configuration
//!
//! Loaded from an optional JSON file, then overridden by `CUESYNC_*`
//! environment variables. Durations are human-readable strings ("500ms").

use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cuesync_core::{CueSyncError, CueSyncResult, GroupId, NodeId};
use cuesync_time::DEFAULT_TICKET_CAPACITY;
use cuesync_transport::{
    MulticastConfig, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_MULTICAST_TTL,
};
use cuesync_wire::NODE_NAME_LEN;

use crate::{DEFAULT_CUE_CAPACITY, DEFAULT_FIRE_CAPACITY};

const FALLBACK_NAME: &str = "cuesync-node";

/// CueSync node configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Explicit node id; derived from `name` when absent
    pub node_id: Option<u32>,
    /// Node name reported in PONG (at most 16 bytes on the wire)
    pub name: String,
    /// Groups this node answers group-targeted messages for
    pub groups: Vec<u32>,
    pub multicast_group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    /// Interface to join the group on
    pub interface: Ipv4Addr,
    pub cue_capacity: usize,
    pub fire_capacity: usize,
    pub ticket_capacity: usize,
    /// Upper bound on a single receive wait
    #[serde(with = "humantime_serde_compat")]
    pub max_wait: Duration,
    /// Minimum spacing between time probes
    #[serde(with = "humantime_serde_compat")]
    pub probe_interval: Duration,
    pub time_probe_enabled: bool,
    /// Initial frame period reported in PONG
    pub frame_ms: u16,
    /// Emit logs as JSON lines
    pub log_json: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            node_id: None,
            name: default_name(),
            groups: Vec::new(),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            ttl: DEFAULT_MULTICAST_TTL,
            interface: Ipv4Addr::UNSPECIFIED,
            cue_capacity: DEFAULT_CUE_CAPACITY,
            fire_capacity: DEFAULT_FIRE_CAPACITY,
            ticket_capacity: DEFAULT_TICKET_CAPACITY,
            max_wait: Duration::from_millis(500),
            probe_interval: Duration::from_millis(500),
            time_probe_enabled: true,
            frame_ms: 20,
            log_json: false,
        }
    }
}

fn default_name() -> String {
    let name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    truncate_name(&name)
}

/// Truncate to the wire name length on a char boundary
fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(NODE_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

fn config_err(msg: impl Into<String>) -> CueSyncError {
    CueSyncError::Config(msg.into())
}

impl NodeConfig {
    /// Parse from a JSON document; missing fields take defaults
    pub fn from_json_str(json: &str) -> CueSyncResult<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| config_err(format!("json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> CueSyncResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// File (if given) plus process environment
    pub fn load(path: Option<&Path>) -> CueSyncResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Apply `CUESYNC_*` overrides from `vars`. Unrelated keys are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> CueSyncResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "CUESYNC_NODE_ID" => self.node_id = Some(parse(key, value)?),
                "CUESYNC_NAME" => self.name = value.to_string(),
                "CUESYNC_GROUPS" => {
                    self.groups = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| parse(key, s))
                        .collect::<CueSyncResult<_>>()?;
                }
                "CUESYNC_MULTICAST_GROUP" => self.multicast_group = parse(key, value)?,
                "CUESYNC_PORT" => self.port = parse(key, value)?,
                "CUESYNC_TTL" => self.ttl = parse(key, value)?,
                "CUESYNC_INTERFACE" => self.interface = parse(key, value)?,
                "CUESYNC_MAX_WAIT" => self.max_wait = parse_duration(key, value)?,
                "CUESYNC_PROBE_INTERVAL" => self.probe_interval = parse_duration(key, value)?,
                "CUESYNC_TIME_PROBE" => self.time_probe_enabled = parse(key, value)?,
                "CUESYNC_LOG_JSON" => self.log_json = parse(key, value)?,
                _ => {}
            }
        }
        self.validate()
    }

    /// Reject configurations the agent cannot run with
    pub fn validate(&self) -> CueSyncResult<()> {
        if self.name.is_empty() {
            return Err(config_err("name must not be empty"));
        }
        if self.cue_capacity == 0 || self.fire_capacity == 0 || self.ticket_capacity == 0 {
            return Err(config_err("table capacities must be non-zero"));
        }
        if self.max_wait.is_zero() {
            return Err(config_err("max_wait must be non-zero"));
        }
        if !self.multicast_group.is_multicast() {
            return Err(config_err(format!(
                "{} is not a multicast address",
                self.multicast_group
            )));
        }
        Ok(())
    }

    /// Configured id, or FNV-1a of the name
    pub fn resolved_node_id(&self) -> NodeId {
        match self.node_id {
            Some(id) if id != 0 => NodeId(id),
            _ => NodeId::from_name(self.name.as_bytes()),
        }
    }

    /// Name as it appears on the wire
    pub fn wire_name(&self) -> String {
        truncate_name(&self.name)
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().copied().map(GroupId).collect()
    }

    pub fn multicast(&self) -> MulticastConfig {
        MulticastConfig {
            group: self.multicast_group,
            port: self.port,
            ttl: self.ttl,
            interface: self.interface,
            ..MulticastConfig::default()
        }
    }

    /// `max_wait` in whole milliseconds, at least 1
    pub fn max_wait_ms(&self) -> u32 {
        (self.max_wait.as_millis().min(u32::MAX as u128) as u32).max(1)
    }

    pub fn probe_interval_ms(&self) -> u32 {
        self.probe_interval.as_millis().min(i32::MAX as u128) as u32
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> CueSyncResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| config_err(format!("{key}={value:?}: {e}")))
}

fn parse_duration(key: &str, value: &str) -> CueSyncResult<Duration> {
    humantime::parse_duration(value).map_err(|e| config_err(format!("{key}={value:?}: {e}")))
}

/// Serde adapter writing durations as humantime strings
mod humantime_serde_compat {
    use std::time::Duration;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
