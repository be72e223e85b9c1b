//! Pre/post notifications for clones and masters.
//!
//! Every notifying container brackets each of its lifecycle actions with
//! four pseudo actions:
//!
//! ```text
//! pre -> confirmed-pre -> <action> ... <action done> -> post -> confirmed-post
//! ```
//!
//! When the graph is emitted, the instances that start, stop, promote or
//! demote in this transition (and the current role of every instance) are
//! collected into space-separated lists. The lists are attached to every
//! notification sent to an instance, so each instance learns what its
//! siblings are doing.

use crate::types::{ActionId, NodeId, OrderType, RscId};
use crate::working_set::WorkingSet;
use tracing::{debug, error, trace};
use warden_core::{notify_key, task, AttrMap, Role, INFINITY};

/// Meta key naming the notification phase (`pre` or `post`)
pub const META_NOTIFY_TYPE: &str = "notify_type";
/// Meta key naming the operation being notified about
pub const META_NOTIFY_OPERATION: &str = "notify_operation";

/// The pseudo actions bracketing one container action
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotifyBoundary {
    pub action: String,
    pub pre: Option<ActionId>,
    pub pre_done: Option<ActionId>,
    pub post: Option<ActionId>,
    pub post_done: Option<ActionId>,
    /// `notify_*` keys passed to every notification and notified action
    pub keys: AttrMap,
}

/// One instance (and its node) in a notification list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct NotifyEntry {
    rsc: String,
    node: Option<String>,
}

#[derive(Debug, Default)]
struct NotifyLists {
    active: Vec<NotifyEntry>,
    inactive: Vec<NotifyEntry>,
    master: Vec<NotifyEntry>,
    slave: Vec<NotifyEntry>,
    start: Vec<NotifyEntry>,
    stop: Vec<NotifyEntry>,
    promote: Vec<NotifyEntry>,
    demote: Vec<NotifyEntry>,
}

fn notify_pseudo(
    ws: &mut WorkingSet,
    rsc: RscId,
    key: String,
    task_name: &str,
    optional: bool,
    phase: &str,
    action: &str,
) -> ActionId {
    let id = ws.custom_action(Some(rsc), key, task_name, None, optional);
    let op = ws.action_mut(id);
    op.pseudo = true;
    op.runnable = true;
    op.meta.insert(META_NOTIFY_TYPE.to_string(), phase.to_string());
    op.meta
        .insert(META_NOTIFY_OPERATION.to_string(), action.to_string());
    id
}

/// Create the pseudo actions around `start` (the container action) and
/// `end` (its completion)
pub fn create_notification_boundaries(
    ws: &mut WorkingSet,
    rsc: RscId,
    action: &str,
    start: Option<ActionId>,
    end: Option<ActionId>,
) -> NotifyBoundary {
    let id = ws.rsc(rsc).id.clone();
    let mut boundary = NotifyBoundary {
        action: action.to_string(),
        ..Default::default()
    };

    if let Some(start) = start {
        let (start_task, optional) = {
            let a = ws.action(start);
            (a.task.clone(), a.optional)
        };
        let pre = notify_pseudo(
            ws,
            rsc,
            notify_key(&id, "pre", &start_task),
            task::NOTIFY,
            optional,
            "pre",
            action,
        );
        let pre_done = notify_pseudo(
            ws,
            rsc,
            notify_key(&id, "confirmed-pre", &start_task),
            task::NOTIFIED,
            optional,
            "pre",
            action,
        );
        ws.order_actions(pre_done, start, OrderType::OPTIONAL);
        ws.order_actions(pre, pre_done, OrderType::OPTIONAL);
        boundary.pre = Some(pre);
        boundary.pre_done = Some(pre_done);
    }

    if let Some(end) = end {
        let (end_task, optional, runnable) = {
            let a = ws.action(end);
            (a.task.clone(), a.optional, a.runnable)
        };
        let post = notify_pseudo(
            ws,
            rsc,
            notify_key(&id, "post", &end_task),
            task::NOTIFY,
            optional,
            "post",
            action,
        );
        let post_done = notify_pseudo(
            ws,
            rsc,
            notify_key(&id, "confirmed-post", &end_task),
            task::NOTIFIED,
            optional,
            "post",
            action,
        );
        for op in [post, post_done] {
            let op = ws.action_mut(op);
            op.runnable = runnable;
            op.priority = INFINITY;
        }
        ws.order_actions(end, post, OrderType::IMPLIES_RIGHT);
        ws.order_actions(post, post_done, OrderType::IMPLIES_RIGHT);
        boundary.post = Some(post);
        boundary.post_done = Some(post_done);
    }

    if let (Some(pre_done), Some(post)) = (boundary.pre_done, boundary.post) {
        ws.order_actions(pre_done, post, OrderType::OPTIONAL);
    }

    if action == task::STOP {
        if let Some(post_done) = boundary.post_done {
            let all_stopped = ws.pseudo_op(task::ALL_STOPPED);
            ws.order_actions(post_done, all_stopped, OrderType::OPTIONAL);
        }
    }

    debug!("Created {} notification boundaries for {}", action, id);
    boundary
}

fn collect(ws: &WorkingSet, rsc: RscId, lists: &mut NotifyLists) {
    for leaf in ws.leaves(rsc) {
        let resource = ws.rsc(leaf);
        let entry = NotifyEntry {
            rsc: resource.id.clone(),
            node: resource
                .running_on
                .first()
                .map(|n| ws.uname(*n).to_string()),
        };
        match resource.role {
            Role::Stopped => lists.inactive.push(entry),
            Role::Started => lists.active.push(entry),
            Role::Slave => lists.slave.push(entry),
            Role::Master => lists.master.push(entry),
            Role::Unknown => error!("Unsupported notify role for {}", resource.id),
        }

        for op in &resource.actions {
            let op = ws.action(*op);
            let Some(node) = op.node.filter(|_| !op.optional) else {
                continue;
            };
            let entry = NotifyEntry {
                rsc: resource.id.clone(),
                node: Some(ws.uname(node).to_string()),
            };
            match op.task.as_str() {
                task::START => lists.start.push(entry),
                task::STOP => lists.stop.push(entry),
                task::PROMOTE => lists.promote.push(entry),
                task::DEMOTE => lists.demote.push(entry),
                _ => {}
            }
        }
    }
}

/// Render a list as `"a b "`, or `" "` when empty
fn expand_list(entries: &mut [NotifyEntry]) -> (String, String) {
    if entries.is_empty() {
        return (" ".to_string(), " ".to_string());
    }
    entries.sort();
    let mut rsc_list = String::new();
    let mut node_list = String::new();
    let mut last: Option<&str> = None;
    for entry in entries.iter() {
        if last == Some(entry.rsc.as_str()) {
            trace!("Skipping duplicate notify entry {}", entry.rsc);
            continue;
        }
        last = Some(entry.rsc.as_str());
        rsc_list.push_str(&entry.rsc);
        rsc_list.push(' ');
        if let Some(node) = &entry.node {
            node_list.push_str(node);
            node_list.push(' ');
        }
    }
    (rsc_list, node_list)
}

/// Compute the `notify_*` keys; returns whether the notifications are needed
fn expand_keys(boundary: &mut NotifyBoundary, mut lists: NotifyLists) -> bool {
    let mut required = false;
    let keyed: [(&str, &mut Vec<NotifyEntry>, Option<&str>); 7] = [
        ("stop", &mut lists.stop, Some(task::STOP)),
        ("start", &mut lists.start, Some(task::START)),
        ("demote", &mut lists.demote, Some(task::DEMOTE)),
        ("promote", &mut lists.promote, Some(task::PROMOTE)),
        ("active", &mut lists.active, None),
        ("slave", &mut lists.slave, None),
        ("master", &mut lists.master, None),
    ];
    for (name, entries, trigger) in keyed {
        let (rsc_list, node_list) = expand_list(entries);
        if trigger == Some(boundary.action.as_str()) && rsc_list != " " {
            required = true;
        }
        boundary
            .keys
            .insert(format!("notify_{}_resource", name), rsc_list);
        boundary
            .keys
            .insert(format!("notify_{}_uname", name), node_list);
    }
    let (inactive, _) = expand_list(&mut lists.inactive);
    boundary
        .keys
        .insert("notify_inactive_resource".to_string(), inactive);
    required
}

/// Send one notification to `rsc` on `node`, between `op` and `confirm`
fn notify_instance(
    ws: &mut WorkingSet,
    rsc: RscId,
    node: NodeId,
    op: Option<ActionId>,
    confirm: Option<ActionId>,
    keys: &AttrMap,
) -> Option<ActionId> {
    let (op, confirm) = (op?, confirm?);
    if !ws.node(node).online || !ws.action(op).runnable {
        return None;
    }

    let source = ws.action(op);
    let phase = source.meta.get(META_NOTIFY_TYPE).cloned().unwrap_or_default();
    let operation = source
        .meta
        .get(META_NOTIFY_OPERATION)
        .cloned()
        .unwrap_or_default();
    let (task_name, optional, meta) = (source.task.clone(), source.optional, source.meta.clone());

    let key = notify_key(&ws.rsc(rsc).id, &phase, &operation);
    trace!("Creating notification {} on {}", key, ws.uname(node));
    let trigger = ws.custom_action(Some(rsc), key, &task_name, Some(node), optional);
    let action = ws.action_mut(trigger);
    action.meta.extend(meta);
    action
        .meta
        .extend(keys.iter().map(|(k, v)| (k.clone(), v.clone())));

    ws.order_actions(op, trigger, OrderType::IMPLIES_LEFT);
    ws.order_actions(trigger, confirm, OrderType::IMPLIES_LEFT);
    Some(trigger)
}

fn post_notify_instance(ws: &mut WorkingSet, rsc: RscId, node: NodeId, boundary: &NotifyBoundary) {
    if let Some(notify) = notify_instance(ws, rsc, node, boundary.post, boundary.post_done, &boundary.keys) {
        ws.action_mut(notify).priority = INFINITY;
    }
    let Some(post_done) = boundary.post_done else {
        return;
    };
    for mon in ws.rsc(rsc).actions.clone() {
        let action = ws.action(mon);
        if action.is_recurring() && action.task != task::CANCEL {
            ws.order_actions(post_done, mon, OrderType::OPTIONAL);
        }
    }
}

fn create_notifications(ws: &mut WorkingSet, rsc: RscId, boundary: &NotifyBoundary) {
    for leaf in ws.leaves(rsc) {
        let mut first_stop = None;
        let mut first_start = None;
        for op in ws.rsc(leaf).actions.clone() {
            let action = ws.action_mut(op);
            if action.task == task::STOP && first_stop.is_none() {
                first_stop = Some(op);
            }
            if action.task == task::START && first_start.is_none() {
                first_start = Some(op);
            }
            let interesting = matches!(
                action.task.as_str(),
                task::START | task::STOP | task::PROMOTE | task::DEMOTE
            );
            if interesting && !action.optional && action.node.is_some() {
                action
                    .meta
                    .extend(boundary.keys.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }

        let resource = ws.rsc(leaf);
        let (role, next_role, allocated) = (resource.role, resource.next_role, resource.allocated_to);
        let running_on = resource.running_on.clone();
        let action = boundary.action.as_str();

        if role != Role::Stopped && (action == task::STOP || action == task::DEMOTE) {
            let stop_optional = first_stop.map(|s| ws.action(s).optional).unwrap_or(true);
            for node in running_on {
                notify_instance(ws, leaf, node, boundary.pre, boundary.pre_done, &boundary.keys);
                if action == task::DEMOTE || stop_optional {
                    post_notify_instance(ws, leaf, node, boundary);
                }
            }
        }

        if next_role != Role::Stopped && (action == task::START || action == task::PROMOTE) {
            let Some(node) = allocated else {
                error!("Next role {} but {} is not allocated", next_role, ws.rsc(leaf).id);
                continue;
            };
            let start_optional = first_start.map(|s| ws.action(s).optional).unwrap_or(true);
            if action != task::START || start_optional {
                notify_instance(ws, leaf, node, boundary.pre, boundary.pre_done, &boundary.keys);
            }
            post_notify_instance(ws, leaf, node, boundary);
        }
    }
}

/// Collect the notification lists for a container, mark the boundary
/// mandatory when something is happening, and create the per-instance
/// notifications
pub fn expand_notifications(ws: &mut WorkingSet, rsc: RscId, boundary: &mut NotifyBoundary) {
    let mut lists = NotifyLists::default();
    collect(ws, rsc, &mut lists);
    let required = expand_keys(boundary, lists);

    if required {
        debug!("Notifications for {} of {} are required", boundary.action, ws.rsc(rsc).id);
        for op in [boundary.pre, boundary.pre_done, boundary.post, boundary.post_done]
            .into_iter()
            .flatten()
        {
            ws.action_mut(op).optional = false;
        }
    }

    create_notifications(ws, rsc, boundary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CloneSettings, Resource};
    use crate::types::VariantKind;
    use crate::working_set::tests::create_test_set;
    use warden_core::op_key;

    fn create_test_clone(ws: &mut WorkingSet, instances: usize) -> RscId {
        let mut clone = Resource::new("fs", VariantKind::Clone);
        clone.clone = Some(CloneSettings {
            clone_max: instances,
            clone_node_max: 1,
            notify: true,
            ..Default::default()
        });
        let parent = ws.add_resource(clone);
        ws.top.push(parent);
        for n in 0..instances {
            let mut child = Resource::new(format!("fs-child:{}", n), VariantKind::Native);
            child.parent = Some(parent);
            let child = ws.add_resource(child);
            ws.rsc_mut(parent).children.push(child);
        }
        parent
    }

    #[test]
    fn test_expand_list_format() {
        let mut entries = vec![
            NotifyEntry {
                rsc: "b".to_string(),
                node: Some("n2".to_string()),
            },
            NotifyEntry {
                rsc: "a".to_string(),
                node: Some("n1".to_string()),
            },
        ];
        assert_eq!(
            expand_list(&mut entries),
            ("a b ".to_string(), "n1 n2 ".to_string())
        );
        assert_eq!(expand_list(&mut []), (" ".to_string(), " ".to_string()));
    }

    #[test]
    fn test_start_notifications() {
        let mut ws = create_test_set(&["n1", "n2"]);
        let clone = create_test_clone(&mut ws, 2);
        let (c0, c1) = (ws.rsc(clone).children[0], ws.rsc(clone).children[1]);

        // fs-child:0 keeps running on n1, fs-child:1 starts on n2
        for (child, node) in [(c0, NodeId(0)), (c1, NodeId(1))] {
            let r = ws.rsc_mut(child);
            r.allocated_to = Some(node);
            r.next_role = Role::Started;
        }
        ws.rsc_mut(c0).role = Role::Started;
        ws.rsc_mut(c0).running_on.push(NodeId(0));
        ws.custom_action(Some(c0), op_key("fs-child:0", task::START, 0), task::START, Some(NodeId(0)), true);
        ws.custom_action(Some(c1), op_key("fs-child:1", task::START, 0), task::START, Some(NodeId(1)), false);

        let start = ws.custom_action(Some(clone), op_key("fs", task::START, 0), task::START, None, false);
        let running = ws.custom_action(Some(clone), op_key("fs", task::STARTED, 0), task::STARTED, None, false);
        for a in [start, running] {
            ws.action_mut(a).pseudo = true;
            ws.action_mut(a).runnable = true;
        }
        let mut boundary = create_notification_boundaries(&mut ws, clone, task::START, Some(start), Some(running));
        assert_eq!(
            ws.action(boundary.pre.unwrap()).uuid,
            "fs_pre_notify_start_0"
        );
        assert_eq!(
            ws.action(boundary.post_done.unwrap()).uuid,
            "fs_confirmed-post_notify_running_0"
        );

        expand_notifications(&mut ws, clone, &mut boundary);
        let keys = &boundary.keys;
        assert_eq!(keys["notify_start_resource"], "fs-child:1 ");
        assert_eq!(keys["notify_start_uname"], "n2 ");
        assert_eq!(keys["notify_active_resource"], "fs-child:0 ");
        assert_eq!(keys["notify_inactive_resource"], "fs-child:1 ");
        assert_eq!(keys["notify_stop_resource"], " ");
        assert!(!ws.action(boundary.pre.unwrap()).optional);

        // the running instance gets pre and post, the starting one only post
        let notifies = |r: RscId| -> Vec<String> {
            ws.rsc(r)
                .actions
                .iter()
                .map(|a| ws.action(*a))
                .filter(|a| a.task == task::NOTIFY)
                .map(|a| a.uuid.clone())
                .collect()
        };
        assert_eq!(
            notifies(c0),
            vec!["fs-child:0_pre_notify_start_0", "fs-child:0_post_notify_start_0"]
        );
        assert_eq!(notifies(c1), vec!["fs-child:1_post_notify_start_0"]);
    }
}
