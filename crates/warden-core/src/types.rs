use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a resource instance holds (or should hold) on a node.
///
/// The declaration order matters: it is the index into the role
/// transition tables and the ordering used when sorting instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Unknown,
    Stopped,
    Started,
    Slave,
    Master,
}

impl Role {
    /// All roles, in table order
    pub const ALL: [Role; 5] = [
        Role::Unknown,
        Role::Stopped,
        Role::Started,
        Role::Slave,
        Role::Master,
    ];

    /// Position of this role in the transition tables
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Unknown => "Unknown",
            Role::Stopped => "Stopped",
            Role::Started => "Started",
            Role::Slave => "Slave",
            Role::Master => "Master",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Role::Unknown),
            "stopped" => Ok(Role::Stopped),
            "started" => Ok(Role::Started),
            "slave" => Ok(Role::Slave),
            "master" => Ok(Role::Master),
            _ => Err(WardenError::invalid_document(
                format!("unknown role '{}'", s),
                "Valid roles are Stopped, Started, Slave and Master",
            )),
        }
    }
}

/// Task names used for actions and in operation history
pub mod task {
    pub const MONITOR: &str = "monitor";
    pub const START: &str = "start";
    pub const STARTED: &str = "running";
    pub const STOP: &str = "stop";
    pub const STOPPED: &str = "stopped";
    pub const PROMOTE: &str = "promote";
    pub const PROMOTED: &str = "promoted";
    pub const DEMOTE: &str = "demote";
    pub const DEMOTED: &str = "demoted";
    pub const NOTIFY: &str = "notify";
    pub const NOTIFIED: &str = "notified";
    pub const CANCEL: &str = "cancel";
    pub const DELETE: &str = "delete";
    pub const RELOAD: &str = "reload";
    pub const MIGRATE_TO: &str = "migrate_to";
    pub const MIGRATE_FROM: &str = "migrate_from";

    pub const FENCE: &str = "stonith";
    pub const SHUTDOWN: &str = "do_shutdown";
    pub const LRM_REFRESH: &str = "lrm_refresh";
    pub const PROBE_COMPLETE: &str = "probe_complete";

    pub const STONITH_UP: &str = "stonith_up";
    pub const STONITH_DONE: &str = "stonith_complete";
    pub const ALL_STOPPED: &str = "all_stopped";
}

/// Return codes reported by the execution layer
pub mod rc {
    pub const OK: i32 = 0;
    pub const UNKNOWN_ERROR: i32 = 1;
    pub const INVALID_PARAM: i32 = 2;
    pub const UNIMPLEMENT_FEATURE: i32 = 3;
    pub const INSUFFICIENT_PRIV: i32 = 4;
    pub const NOT_INSTALLED: i32 = 5;
    pub const NOT_CONFIGURED: i32 = 6;
    pub const NOT_RUNNING: i32 = 7;
    pub const RUNNING_MASTER: i32 = 8;
    pub const FAILED_MASTER: i32 = 9;
}

/// Execution status of a recorded operation
pub mod op_status {
    pub const PENDING: i32 = -1;
    pub const DONE: i32 = 0;
    pub const CANCELLED: i32 = 1;
    pub const TIMEOUT: i32 = 2;
    pub const NOT_SUPPORTED: i32 = 3;
    pub const ERROR: i32 = 4;
}

/// Build the canonical key of a resource operation: `<rsc>_<task>_<interval>`
pub fn op_key(rsc_id: &str, task: &str, interval_ms: u64) -> String {
    format!("{}_{}_{}", rsc_id, task, interval_ms)
}

/// Build the key of a notification action: `<rsc>_<type>_notify_<operation>_0`
pub fn notify_key(rsc_id: &str, notify_type: &str, operation: &str) -> String {
    format!("{}_{}_notify_{}_0", rsc_id, notify_type, operation)
}

/// Parse an interval or timeout into milliseconds.
///
/// Bare numbers are seconds; `ms`, `msec`, `s`, `sec`, `m`, `min`, `h` and `hr`
/// suffixes are understood.
pub fn parse_interval_ms(value: &str) -> Result<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let number: u64 = number
        .parse()
        .map_err(|_| WardenError::invalid_interval(value))?;

    let multiplier = match unit.trim() {
        "" | "s" | "sec" => 1000,
        "ms" | "msec" => 1,
        "m" | "min" => 60 * 1000,
        "h" | "hr" => 60 * 60 * 1000,
        _ => return Err(WardenError::invalid_interval(value)),
    };

    Ok(number * multiplier)
}

/// What to do with resources when quorum is lost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoQuorumPolicy {
    #[default]
    Stop,
    Freeze,
    Ignore,
    Suicide,
}

/// Recovery strategy when a resource is found active on several nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    #[default]
    StopStart,
    StopOnly,
    Block,
}

/// Kind of cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Member,
    Ping,
}

/// How `#health*` node attributes translate into placement scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeHealthStrategy {
    #[default]
    None,
    MigrateOnRed,
    OnlyGreen,
    Progressive,
    Custom,
}
