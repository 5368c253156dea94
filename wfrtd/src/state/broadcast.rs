//! Runtime overrides of task settings, keyed by cycle point and namespace.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use super::compare_points;

pub type Settings = Map<String, Value>;

pub const ALL_POINTS: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastChange {
    pub point: String,
    pub namespace: String,
    pub setting: Settings,
}

#[derive(Debug, Default)]
pub struct BroadcastMgr {
    broadcasts: BTreeMap<String, BTreeMap<String, Settings>>,
}

impl BroadcastMgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.broadcasts.is_empty()
    }

    /// Merge each setting into every `(point, namespace)` pair.
    pub fn put(
        &mut self,
        points: &[String],
        namespaces: &[String],
        settings: &[Settings],
    ) -> Vec<BroadcastChange> {
        let mut modified = Vec::new();
        for point in points {
            for namespace in namespaces {
                let target = self
                    .broadcasts
                    .entry(point.clone())
                    .or_default()
                    .entry(namespace.clone())
                    .or_default();
                for setting in settings {
                    merge_into(target, setting);
                    modified.push(BroadcastChange {
                        point: point.clone(),
                        namespace: namespace.clone(),
                        setting: setting.clone(),
                    });
                }
            }
        }
        modified
    }

    /// Empty `points` or `namespaces` match everything. With no `cancel`
    /// settings the whole namespace entry is dropped.
    pub fn clear(
        &mut self,
        points: &[String],
        namespaces: &[String],
        cancel: &[Settings],
    ) -> Vec<BroadcastChange> {
        let mut cleared = Vec::new();
        for (point, by_namespace) in self.broadcasts.iter_mut() {
            if !points.is_empty() && !points.contains(point) {
                continue;
            }
            for (namespace, settings) in by_namespace.iter_mut() {
                if !namespaces.is_empty() && !namespaces.contains(namespace) {
                    continue;
                }
                if cancel.is_empty() {
                    if !settings.is_empty() {
                        cleared.push(BroadcastChange {
                            point: point.clone(),
                            namespace: namespace.clone(),
                            setting: std::mem::take(settings),
                        });
                    }
                    continue;
                }
                for key in cancel {
                    if let Some(removed) = remove_from(settings, key) {
                        cleared.push(BroadcastChange {
                            point: point.clone(),
                            namespace: namespace.clone(),
                            setting: removed,
                        });
                    }
                }
            }
        }
        self.prune_empty();
        cleared
    }

    /// Drop every point earlier than `cutoff`. The `*` point never expires.
    pub fn expire(&mut self, cutoff: &str) -> Vec<BroadcastChange> {
        let expired_points: Vec<String> = self
            .broadcasts
            .keys()
            .filter(|point| point.as_str() != ALL_POINTS)
            .filter(|point| compare_points(point, cutoff).is_lt())
            .cloned()
            .collect();
        let mut expired = Vec::new();
        for point in expired_points {
            if let Some(by_namespace) = self.broadcasts.remove(&point) {
                for (namespace, setting) in by_namespace {
                    expired.push(BroadcastChange {
                        point: point.clone(),
                        namespace,
                        setting,
                    });
                }
            }
        }
        expired
    }

    /// Effective settings for a task at `point`. `namespaces` runs from
    /// `root` down to the task itself so that closer namespaces win.
    pub fn get(&self, point: &str, namespaces: &[String]) -> Settings {
        let mut merged = Settings::new();
        for key in [ALL_POINTS, point] {
            let Some(by_namespace) = self.broadcasts.get(key) else {
                continue;
            };
            for namespace in namespaces {
                if let Some(settings) = by_namespace.get(namespace) {
                    merge_into(&mut merged, settings);
                }
            }
        }
        merged
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(&self.broadcasts).unwrap_or(Value::Null)
    }

    fn prune_empty(&mut self) {
        for by_namespace in self.broadcasts.values_mut() {
            by_namespace.retain(|_, settings| !settings.is_empty());
        }
        self.broadcasts.retain(|_, by_namespace| !by_namespace.is_empty());
    }
}

fn merge_into(target: &mut Settings, update: &Settings) {
    for (key, value) in update {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => merge_into(existing, nested),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Remove the leaf paths named by `cancel`; returns what was removed.
fn remove_from(target: &mut Settings, cancel: &Settings) -> Option<Settings> {
    let mut removed = Settings::new();
    for (key, value) in cancel {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) if !nested.is_empty() => {
                if let Some(inner) = remove_from(existing, nested) {
                    removed.insert(key.clone(), Value::Object(inner));
                }
                if existing.is_empty() {
                    target.remove(key);
                }
            }
            (Some(_), _) => {
                if let Some(old) = target.remove(key) {
                    removed.insert(key.clone(), old);
                }
            }
            (None, _) => {}
        }
    }
    if removed.is_empty() {
        None
    } else {
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(value: Value) -> Settings {
        value.as_object().cloned().unwrap_or_default()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn put_merges_and_closer_namespace_wins() {
        let mut mgr = BroadcastMgr::new();
        mgr.put(
            &strings(&["*"]),
            &strings(&["root"]),
            &[settings(json!({"environment": {"A": "1", "B": "root"}}))],
        );
        let modified = mgr.put(
            &strings(&["1"]),
            &strings(&["foo"]),
            &[settings(json!({"environment": {"B": "foo"}}))],
        );
        assert_eq!(modified.len(), 1);

        let effective = mgr.get("1", &strings(&["root", "FAM", "foo"]));
        assert_eq!(effective["environment"], json!({"A": "1", "B": "foo"}));
        let elsewhere = mgr.get("2", &strings(&["root", "FAM", "foo"]));
        assert_eq!(elsewhere["environment"], json!({"A": "1", "B": "root"}));
    }

    #[test]
    fn clear_specific_leaf_then_everything() {
        let mut mgr = BroadcastMgr::new();
        mgr.put(
            &strings(&["1"]),
            &strings(&["foo"]),
            &[settings(json!({"environment": {"A": "1", "B": "2"}, "script": "true"}))],
        );
        let cleared = mgr.clear(&[], &[], &[settings(json!({"environment": {"A": null}}))]);
        assert_eq!(cleared[0].setting, settings(json!({"environment": {"A": "1"}})));
        assert_eq!(
            mgr.get("1", &strings(&["foo"])),
            settings(json!({"environment": {"B": "2"}, "script": "true"}))
        );

        let cleared = mgr.clear(&strings(&["1"]), &strings(&["foo"]), &[]);
        assert_eq!(cleared.len(), 1);
        assert!(mgr.is_empty());
    }

    #[test]
    fn expire_compares_integer_points_numerically() {
        let mut mgr = BroadcastMgr::new();
        for point in ["*", "2", "9", "10"] {
            mgr.put(
                &strings(&[point]),
                &strings(&["root"]),
                &[settings(json!({"script": point}))],
            );
        }
        let expired = mgr.expire("10");
        let mut points: Vec<_> = expired.iter().map(|c| c.point.as_str()).collect();
        points.sort();
        assert_eq!(points, vec!["2", "9"]);
        assert_eq!(mgr.get("10", &strings(&["root"]))["script"], json!("10"));
    }
}
