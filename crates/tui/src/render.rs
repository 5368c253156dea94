//! Plain-text rendering of the tree, one node per line.

use std::fmt::Write as _;

use serde_json::Value;

use crate::tree::{Node, NodeKind};

/// `(label, field)` for task modifiers shown after the state.
const MODIFIERS: [(&str, &str); 6] = [
    ("held", "is_held"),
    ("runahead", "is_runahead"),
    ("queued", "is_queued"),
    ("retry scheduled", "is_retry"),
    ("wallclock", "is_wallclock"),
    ("xtriggered", "is_xtriggered"),
];

fn text<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Status summary for a workflow, cycle, family, task or job.
pub fn status_str(data: &Value) -> String {
    let mut attrs = Vec::new();
    if let Some(status) = text(data, "status") {
        attrs.push(status.to_string());
    }
    if let Some(state) = text(data, "state") {
        let modifiers: Vec<&str> = MODIFIERS
            .iter()
            .filter(|(_, field)| data.get(*field).and_then(Value::as_bool) == Some(true))
            .map(|(label, _)| *label)
            .collect();
        if modifiers.is_empty() {
            attrs.push(state.to_string());
        } else {
            attrs.push(format!("{state} ({})", modifiers.join(", ")));
        }
    }
    attrs.join(", ")
}

fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

fn label(node: &Node) -> String {
    let data = &node.data;
    match node.kind {
        NodeKind::Root => "root".to_string(),
        NodeKind::Workflow => text(data, "name").unwrap_or(&node.id).to_string(),
        NodeKind::Cycle => text(data, "point")
            .or_else(|| text(data, "cycle_point"))
            .unwrap_or_else(|| last_segment(&node.id))
            .to_string(),
        NodeKind::Family | NodeKind::Task => {
            text(data, "name").unwrap_or_else(|| last_segment(&node.id)).to_string()
        }
        NodeKind::Job => match data.get("submit_num").and_then(Value::as_u64) {
            Some(num) => format!("#{num:02}"),
            None => format!("#{}", last_segment(&node.id)),
        },
        NodeKind::JobInfo => ["host", "batch_sys_name", "batch_sys_job_id"]
            .iter()
            .filter_map(|key| text(data, key).map(|value| format!("{key}: {value}")))
            .collect::<Vec<_>>()
            .join("  "),
        NodeKind::Spring => text(data, "id").unwrap_or("Loading ...").to_string(),
    }
}

fn write_node(out: &mut String, node: &Node, depth: usize) {
    let status = status_str(&node.data);
    let _ = write!(out, "{}{}", "  ".repeat(depth), label(node));
    if !status.is_empty() && node.kind != NodeKind::JobInfo {
        let _ = write!(out, "  [{status}]");
    }
    out.push('\n');
    for child in &node.children {
        write_node(out, child, depth + 1);
    }
}

/// Render everything below the root, workflows at column zero.
pub fn render(root: &Node) -> String {
    let mut out = String::new();
    if root.kind == NodeKind::Root {
        for child in &root.children {
            write_node(&mut out, child, 0);
        }
    } else {
        write_node(&mut out, root, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::compute_tree;
    use serde_json::json;

    #[test]
    fn status_includes_modifiers() {
        assert_eq!(status_str(&json!({"status": "running"})), "running");
        assert_eq!(
            status_str(&json!({"state": "waiting", "is_held": true, "is_queued": true})),
            "waiting (held, queued)"
        );
        assert_eq!(status_str(&json!({"state": "", "is_held": true})), "");
    }

    #[test]
    fn renders_indented_lines() {
        let data = json!({"workflows": [{
            "id": "flow",
            "name": "flow",
            "status": "running",
            "port": 43001,
            "cycle_points": [{"id": "flow//1/root", "point": "1", "state": "running"}],
            "family_proxies": [],
            "task_proxies": [{
                "id": "flow//1/foo",
                "name": "foo",
                "state": "running",
                "first_parent": {"id": "flow//1/root", "name": "root"},
                "jobs": [{"id": "flow//1/foo/01", "submit_num": 1, "state": "running", "host": "localhost"}],
            }],
        }]});
        let text = render(&compute_tree(&data, false).unwrap());
        assert_eq!(
            text,
            "flow  [running]\n  1  [running]\n    foo  [running]\n      #01  [running]\n        host: localhost\n"
        );
    }
}
