//! Conjunctive node filters shared by every list field.

use serde_json::{Map, Value};
use wfrt_common::{IdParts, IdPattern};

pub const LIST_ARGS: [&str; 7] = [
    "ids", "exids", "states", "exstates", "mindepth", "maxdepth", "is_held",
];

/// What a filter sees of one element.
#[derive(Debug, Clone, Copy, Default)]
pub struct Candidate<'a> {
    pub parts: IdParts<'a>,
    pub depth: Option<u32>,
    pub is_held: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    ids: Vec<IdPattern>,
    exids: Vec<IdPattern>,
    states: Vec<String>,
    exstates: Vec<String>,
    mindepth: Option<u32>,
    maxdepth: Option<u32>,
    is_held: Option<bool>,
}

impl NodeFilter {
    /// Build from resolved field arguments. `null` means absent and a
    /// negative depth means unbounded.
    pub fn from_args(args: &Map<String, Value>) -> Result<Self, String> {
        let mut filter = NodeFilter::default();
        for (key, value) in args {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "ids" => filter.ids = patterns(key, value)?,
                "exids" => filter.exids = patterns(key, value)?,
                "states" => filter.states = strings(key, value)?,
                "exstates" => filter.exstates = strings(key, value)?,
                "mindepth" => filter.mindepth = depth(key, value)?,
                "maxdepth" => filter.maxdepth = depth(key, value)?,
                "is_held" => {
                    filter.is_held = Some(
                        value
                            .as_bool()
                            .ok_or_else(|| format!("Argument \"is_held\" expects a Boolean, got {value}"))?,
                    )
                }
                other => return Err(format!("Unknown filter argument \"{other}\"")),
            }
        }
        Ok(filter)
    }

    pub fn matches(&self, candidate: &Candidate<'_>) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|p| p.matches(&candidate.parts)) {
            return false;
        }
        if self.exids.iter().any(|p| p.matches(&candidate.parts)) {
            return false;
        }
        let state = candidate.parts.state;
        if !self.states.is_empty() {
            match state {
                Some(state) if self.states.iter().any(|s| s == state) => {}
                _ => return false,
            }
        }
        if let Some(state) = state {
            if self.exstates.iter().any(|s| s == state) {
                return false;
            }
        }
        if let Some(depth) = candidate.depth {
            if self.mindepth.is_some_and(|min| depth < min) {
                return false;
            }
            if self.maxdepth.is_some_and(|max| depth > max) {
                return false;
            }
        }
        if let (Some(wanted), Some(held)) = (self.is_held, candidate.is_held) {
            if wanted != held {
                return false;
            }
        }
        true
    }
}

fn strings(key: &str, value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(single) => Ok(vec![single.clone()]),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("Argument \"{key}\" expects a list of strings, got {item}"))
            })
            .collect(),
        other => Err(format!("Argument \"{key}\" expects a list of strings, got {other}")),
    }
}

fn patterns(key: &str, value: &Value) -> Result<Vec<IdPattern>, String> {
    strings(key, value)?
        .iter()
        .map(|raw| IdPattern::parse(raw).map_err(|err| format!("Argument \"{key}\": {err}")))
        .collect()
}

fn depth(key: &str, value: &Value) -> Result<Option<u32>, String> {
    let depth = value
        .as_i64()
        .ok_or_else(|| format!("Argument \"{key}\" expects an Int, got {value}"))?;
    Ok(u32::try_from(depth).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filter(args: Value) -> NodeFilter {
        NodeFilter::from_args(args.as_object().unwrap()).unwrap()
    }

    fn proxy<'a>(point: &'a str, name: &'a str, state: &'a str, depth: u32) -> Candidate<'a> {
        Candidate {
            parts: IdParts {
                workflow: "flow",
                point: Some(point),
                name,
                submit_num: None,
                state: Some(state),
            },
            depth: Some(depth),
            is_held: Some(false),
        }
    }

    #[test]
    fn filters_are_conjunctive() {
        let f = filter(json!({"ids": ["1/*"], "exstates": ["succeeded"], "maxdepth": 1}));
        assert!(f.matches(&proxy("1", "foo", "running", 1)));
        assert!(!f.matches(&proxy("2", "foo", "running", 1)));
        assert!(!f.matches(&proxy("1", "foo", "succeeded", 1)));
        assert!(!f.matches(&proxy("1", "foo", "running", 2)));
    }

    #[test]
    fn exids_and_state_suffixes() {
        let f = filter(json!({"exids": ["*/root"], "states": "waiting"}));
        assert!(!f.matches(&proxy("1", "root", "waiting", 0)));
        assert!(f.matches(&proxy("1", "FAM", "waiting", 1)));
        assert!(!f.matches(&proxy("1", "FAM", "running", 1)));

        let f = filter(json!({"ids": ["foo.1:running"]}));
        assert!(f.matches(&proxy("1", "foo", "running", 1)));
        assert!(!f.matches(&proxy("1", "foo", "waiting", 1)));
    }

    #[test]
    fn null_and_negative_mean_unbounded() {
        let f = filter(json!({"ids": null, "mindepth": -1, "maxdepth": -1, "is_held": null}));
        assert!(f.matches(&proxy("9", "deep", "failed", 7)));
    }

    #[test]
    fn bad_arguments_are_reported() {
        let args = json!({"mindepth": "deep"});
        assert!(NodeFilter::from_args(args.as_object().unwrap()).is_err());
        let args = json!({"ids": [1, 2]});
        assert!(NodeFilter::from_args(args.as_object().unwrap()).is_err());
        let args = json!({"sort": {"keys": ["name"]}});
        assert!(NodeFilter::from_args(args.as_object().unwrap()).is_err());
    }
}
