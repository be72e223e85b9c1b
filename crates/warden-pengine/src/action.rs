use crate::types::{ActionId, ActionWrapper, NodeId, RscId};
use warden_core::AttrMap;

/// Meta key recording an action's timeout in milliseconds
pub const META_TIMEOUT: &str = "timeout";
/// Meta key recording a recurring action's interval in milliseconds
pub const META_INTERVAL: &str = "interval";
/// Meta key with the return code the executor should expect
pub const META_TARGET_RC: &str = "op_target_rc";

/// One schedulable unit of work
#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    /// Operation key, e.g. `db_monitor_10000`
    pub uuid: String,
    pub task: String,
    pub rsc: Option<RscId>,
    pub node: Option<NodeId>,
    pub optional: bool,
    pub pseudo: bool,
    pub runnable: bool,
    pub priority: i32,
    pub dumped: bool,
    pub allow_reload_conversion: bool,
    /// Passed to the executor as `CRM_meta_*`
    pub meta: AttrMap,
    /// Passed to the executor verbatim
    pub extra: AttrMap,
    pub actions_before: Vec<ActionWrapper>,
    pub actions_after: Vec<ActionWrapper>,
}

impl Action {
    pub fn new(
        id: ActionId,
        uuid: impl Into<String>,
        task: impl Into<String>,
        rsc: Option<RscId>,
        node: Option<NodeId>,
        optional: bool,
    ) -> Self {
        Self {
            id,
            uuid: uuid.into(),
            task: task.into(),
            rsc,
            node,
            optional,
            pseudo: false,
            runnable: true,
            priority: 0,
            dumped: false,
            allow_reload_conversion: false,
            meta: AttrMap::new(),
            extra: AttrMap::new(),
            actions_before: Vec::new(),
            actions_after: Vec::new(),
        }
    }

    /// Interval encoded in the operation key, 0 for one-shot actions
    pub fn interval_ms(&self) -> u64 {
        self.meta
            .get(META_INTERVAL)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_recurring(&self) -> bool {
        self.interval_ms() > 0
    }
}

/// Interval encoded at the end of an operation key, 0 when there is none
pub fn key_interval(key: &str) -> u64 {
    key.rsplit_once('_')
        .and_then(|(_, interval)| interval.parse().ok())
        .unwrap_or(0)
}

/// Task encoded in an operation key of a known resource.
///
/// Resource ids and task names may both contain underscores, so the key is
/// split around the known resource prefix and the trailing interval.
pub fn key_task<'a>(key: &'a str, rsc_id: &str) -> Option<&'a str> {
    let rest = key.strip_prefix(rsc_id)?.strip_prefix('_')?;
    let (task, interval) = rest.rsplit_once('_')?;
    interval.parse::<u64>().ok()?;
    Some(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parts() {
        assert_eq!(key_interval("db_monitor_10000"), 10_000);
        assert_eq!(key_interval("stonith_up"), 0);
        assert_eq!(key_task("my_db_start_0", "my_db"), Some("start"));
        assert_eq!(key_task("vm_migrate_to_0", "vm"), Some("migrate_to"));
        assert_eq!(key_task("db_start_0", "web"), None);
    }

    #[test]
    fn test_interval_from_meta() {
        let mut action = Action::new(ActionId(0), "db_monitor_5000", "monitor", None, None, true);
        assert_eq!(action.interval_ms(), 0);
        action
            .meta
            .insert(META_INTERVAL.to_string(), "5000".to_string());
        assert!(action.is_recurring());
        assert!(action.runnable);
        assert!(!action.pseudo);
    }
}
