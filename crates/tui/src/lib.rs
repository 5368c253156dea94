//! Tree view of wfrt workflows.

pub mod natural_sort;
pub mod render;
pub mod tree;

pub use natural_sort::{natural_cmp, NaturalSort};
pub use render::render;
pub use tree::{compute_tree, Node, NodeKind, TreeError};

/// Query whose result feeds [`compute_tree`]. `{states}` is replaced with an
/// argument list (possibly empty) restricting task states.
const TREE_QUERY: &str = r#"{
  workflows {
    id name status status_msg port
    cycle_points { id cycle_point state }
    family_proxies(exids: ["*/root"]) {
      id name cycle_point state is_held
      first_parent { id name }
    }
    task_proxies{states} {
      id name cycle_point state is_held
      first_parent { id name }
      jobs { id submit_num state host batch_sys_name batch_sys_job_id }
    }
  }
}"#;

/// The tree query, optionally limited to tasks in `states`.
pub fn tree_query(states: &[String]) -> String {
    let filter = if states.is_empty() {
        String::new()
    } else {
        let list = serde_json::to_string(states).unwrap_or_else(|_| "[]".to_string());
        format!("(states: {list})")
    };
    TREE_QUERY.replace("{states}", &filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_filters_are_inlined() {
        assert!(tree_query(&[]).contains("task_proxies {"));
        let query = tree_query(&["running".into(), "failed".into()]);
        assert!(query.contains(r#"task_proxies(states: ["running","failed"]) {"#));
    }
}
