//! Universal identifiers and task glob patterns.
//!
//! A full identifier reads `workflow//cycle/task/job`; the relative form drops
//! the workflow (`//cycle/task` or `cycle/task`). A trailing `:state`
//! selector may follow the last component.

use std::fmt;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("Invalid identifier: {0}")]
    Invalid(String),
    #[error("No tokens provided")]
    NoTokens,
    #[error("Invalid glob pattern '{0}'")]
    BadGlob(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Tokens {
    pub workflow: Option<String>,
    pub cycle: Option<String>,
    pub task: Option<String>,
    pub job: Option<String>,
    pub selector: Option<String>,
}

impl Tokens {
    /// Parse an identifier. With `relative` set, a string without `//` is read
    /// as `cycle[/task[/job]]`; otherwise it names a workflow.
    pub fn parse(raw: &str, relative: bool) -> Result<Self, IdError> {
        let raw = raw.trim();
        let (workflow, rest) = match raw.split_once("//") {
            Some((workflow, rest)) => (non_empty(workflow), rest),
            None if relative => (None, raw),
            None => (non_empty(raw), ""),
        };
        if workflow.is_none() && rest.is_empty() {
            return Err(IdError::Invalid(format!("{raw}//")));
        }

        let (rest, selector) = match rest.rsplit_once(':') {
            Some((head, state)) if !state.is_empty() => (head, Some(state.to_string())),
            _ => (rest, None),
        };

        let mut tokens = Tokens {
            workflow,
            selector,
            ..Tokens::default()
        };
        if rest.is_empty() {
            return Ok(tokens);
        }

        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() > 3 || parts.iter().any(|part| part.is_empty()) {
            return Err(IdError::Invalid(raw.to_string()));
        }
        tokens.cycle = parts.first().map(|s| s.to_string());
        tokens.task = parts.get(1).map(|s| s.to_string());
        tokens.job = parts.get(2).map(|s| s.to_string());
        Ok(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.workflow.is_none() && self.cycle.is_none() && self.task.is_none() && self.job.is_none()
    }

    /// Drop the most specific component present.
    pub fn pop_token(&mut self) -> Option<String> {
        self.selector = None;
        if let Some(job) = self.job.take() {
            return Some(job);
        }
        if let Some(task) = self.task.take() {
            return Some(task);
        }
        if let Some(cycle) = self.cycle.take() {
            return Some(cycle);
        }
        self.workflow.take()
    }

    /// `cycle/task/job` without the workflow or leading slashes.
    pub fn relative_id(&self) -> String {
        [&self.cycle, &self.task, &self.job]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn id(&self) -> String {
        let relative = self.relative_id();
        match (&self.workflow, relative.is_empty()) {
            (Some(workflow), true) => workflow.clone(),
            (Some(workflow), false) => format!("{workflow}//{relative}"),
            (None, _) => format!("//{relative}"),
        }
    }
}

impl fmt::Display for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())?;
        if let Some(selector) = &self.selector {
            write!(f, ":{selector}")?;
        }
        Ok(())
    }
}

fn non_empty(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Remove the last element of a node id.
pub fn idpop(id: &str) -> Result<String, IdError> {
    let relative = !id.contains("//");
    let mut tokens = Tokens::parse(id, relative)?;
    tokens.pop_token();
    if tokens.is_empty() {
        return Err(IdError::NoTokens);
    }
    Ok(tokens.id())
}

pub fn workflow_id(workflow: &str) -> String {
    workflow.to_string()
}

pub fn cycle_id(workflow: &str, point: &str) -> String {
    format!("{workflow}//{point}")
}

pub fn proxy_id(workflow: &str, point: &str, name: &str) -> String {
    format!("{workflow}//{point}/{name}")
}

pub fn job_id(workflow: &str, point: &str, name: &str, submit_num: u32) -> String {
    format!("{workflow}//{point}/{name}/{submit_num:02}")
}

/// Components of a job or task reference in either accepted spelling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobItem {
    pub point: Option<String>,
    pub name: String,
    pub submit_num: Option<String>,
    pub state: Option<String>,
}

/// Split `point/name/submit:state` or `name.point.submit:state`.
pub fn parse_job_item(item: &str) -> JobItem {
    let (head, state) = match item.rsplit_once(':') {
        Some((head, state)) => (head, Some(state.to_string())),
        None => (item, None),
    };
    let (point, name, submit_num) = if head.contains('/') {
        let mut parts = head.splitn(3, '/');
        let point = parts.next().map(str::to_string);
        let name = parts.next().unwrap_or_default().to_string();
        (point, name, parts.next().map(str::to_string))
    } else if head.contains('.') {
        let mut parts = head.splitn(3, '.');
        let name = parts.next().unwrap_or_default().to_string();
        let point = parts.next().map(str::to_string);
        (point, name, parts.next().map(str::to_string))
    } else {
        (None, head.to_string(), None)
    };
    JobItem {
        point,
        name,
        submit_num,
        state,
    }
}

#[derive(Debug, Clone)]
struct Glob {
    raw: String,
    regex: Regex,
}

impl Glob {
    fn new(raw: &str) -> Result<Self, IdError> {
        let mut pattern = String::from("^");
        for ch in raw.chars() {
            match ch {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(&other.to_string())),
            }
        }
        pattern.push('$');
        let regex = Regex::new(&pattern).map_err(|_| IdError::BadGlob(raw.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
        })
    }

    fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    fn is_wildcard(&self) -> bool {
        self.raw.chars().all(|c| c == '*')
    }
}

/// The identifying parts of a stored element, as seen by [`IdPattern`].
#[derive(Debug, Clone, Copy, Default)]
pub struct IdParts<'a> {
    pub workflow: &'a str,
    pub point: Option<&'a str>,
    pub name: &'a str,
    pub submit_num: Option<u32>,
    pub state: Option<&'a str>,
}

/// A glob-capable selector over workflow elements.
///
/// Accepts full ids (`flow//1/foo/01`), relative ids (`1/foo`, `//1/foo`)
/// and the legacy `name[.point[.submit]]` form, each with an optional
/// `:state` suffix.
#[derive(Debug, Clone)]
pub struct IdPattern {
    raw: String,
    workflow: Option<Glob>,
    point: Option<Glob>,
    name: Option<Glob>,
    submit_num: Option<Glob>,
    state: Option<String>,
}

impl IdPattern {
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdError::Invalid(raw.to_string()));
        }
        let (workflow, relative) = match trimmed.split_once("//") {
            Some((workflow, rest)) => (non_empty(workflow), rest.to_string()),
            None => (None, trimmed.to_string()),
        };
        let mut item = parse_job_item(&relative);
        if trimmed.contains("//") && !relative.contains('/') {
            // `flow//1` or `//1` names a cycle point, not a task
            item.point = non_empty(&item.name);
            item.name = String::new();
        }
        if item.name.is_empty() && item.point.is_none() && workflow.is_none() {
            return Err(IdError::Invalid(raw.to_string()));
        }

        let glob = |value: Option<&str>| -> Result<Option<Glob>, IdError> {
            value.filter(|v| !v.is_empty()).map(Glob::new).transpose()
        };
        Ok(Self {
            raw: trimmed.to_string(),
            workflow: glob(workflow.as_deref())?,
            point: glob(item.point.as_deref())?,
            name: glob(Some(item.name.as_str()))?,
            submit_num: glob(item.submit_num.as_deref())?,
            state: item.state,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn matches(&self, parts: &IdParts<'_>) -> bool {
        if let Some(glob) = &self.workflow {
            if !glob.matches(parts.workflow) {
                return false;
            }
        }
        if let Some(glob) = &self.point {
            match parts.point {
                Some(point) if glob.matches(point) => {}
                None if glob.is_wildcard() => {}
                _ => return false,
            }
        }
        if let Some(glob) = &self.name {
            if !glob.matches(parts.name) {
                return false;
            }
        }
        if let Some(glob) = &self.submit_num {
            let Some(submit) = parts.submit_num else {
                return false;
            };
            let matched = match glob.raw.parse::<u32>() {
                Ok(wanted) => wanted == submit,
                Err(_) => glob.matches(&format!("{submit:02}")),
            };
            if !matched {
                return false;
            }
        }
        if let Some(state) = &self.state {
            if parts.state != Some(state.as_str()) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for IdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idpop_strips_last_component() {
        assert_eq!(idpop("w//c/t/j").unwrap(), "w//c/t");
        assert_eq!(idpop("c/t/j").unwrap(), "//c/t");
        assert_eq!(idpop("c/t").unwrap(), "//c");
        assert_eq!(idpop("flow//1/root").unwrap(), "flow//1");
        assert_eq!(idpop("c"), Err(IdError::NoTokens));
        assert!(matches!(idpop(""), Err(IdError::Invalid(_))));
    }

    #[test]
    fn tokens_render_with_selector() {
        let tokens = Tokens::parse("flow//1/foo:running", false).unwrap();
        assert_eq!(tokens.workflow.as_deref(), Some("flow"));
        assert_eq!(tokens.task.as_deref(), Some("foo"));
        assert_eq!(tokens.to_string(), "flow//1/foo:running");
        assert_eq!(tokens.relative_id(), "1/foo");
        assert!(Tokens::parse("flow//1//foo", false).is_err());
    }

    #[test]
    fn job_items_split_both_spellings() {
        let slash = parse_job_item("1/foo/01:running");
        let dotted = parse_job_item("foo.1.01:running");
        assert_eq!(slash, dotted);
        assert_eq!(slash.point.as_deref(), Some("1"));
        assert_eq!(slash.submit_num.as_deref(), Some("01"));
        assert_eq!(parse_job_item("foo").point, None);
    }

    #[test]
    fn patterns_match_globs_and_states() {
        let parts = IdParts {
            workflow: "flow",
            point: Some("20200101T00"),
            name: "model_run",
            submit_num: Some(2),
            state: Some("running"),
        };
        assert!(IdPattern::parse("model*").unwrap().matches(&parts));
        assert!(IdPattern::parse("model_run.2020*").unwrap().matches(&parts));
        assert!(IdPattern::parse("*/model_run/02:running").unwrap().matches(&parts));
        assert!(IdPattern::parse("flow//*/model_?un").unwrap().matches(&parts));
        assert!(!IdPattern::parse("other//*/model_run").unwrap().matches(&parts));
        assert!(!IdPattern::parse("model_run:failed").unwrap().matches(&parts));
        assert!(!IdPattern::parse("1/model_run").unwrap().matches(&parts));
        assert!(IdPattern::parse("//2020*").unwrap().matches(&parts));
    }

    #[test]
    fn formats_element_ids() {
        assert_eq!(job_id("flow", "1", "foo", 1), "flow//1/foo/01");
        assert_eq!(proxy_id("flow", "1", "FAM"), "flow//1/FAM");
        assert_eq!(cycle_id("flow", "1"), "flow//1");
    }
}
