//! # Template path expansion.
//!
//! Collaborators describe dynamic subscriptions with templated paths such as
//! `/SwitchableOutput/{type}/State`. [`expand_wildcard_paths`] turns one
//! template into every concrete path currently present for a service, with a
//! display name where each `{placeholder}` is replaced by something readable.
//!
//! ```text
//! "/SwitchableOutput/{type}/State"  ──►  ^/SwitchableOutput/([^/]+)/State$
//!                                          │
//!   cache keys ──────────────────────────►  match each key
//!                                          │
//!   name "{type} state" ◄── live custom name (switch/type only)
//!                       ◄── family table  (family, placeholder, token)
//!                       ◄── universal table (placeholder, token)
//!                       ◄── raw token
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::ServiceValues;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid")
});

/// Display names specific to one service family: (family, placeholder, token, name).
const FAMILY_NAMES: &[(&str, &str, &str, &str)] = &[
    ("solarcharger", "tracker", "0", "PV tracker 1"),
    ("solarcharger", "tracker", "1", "PV tracker 2"),
    ("solarcharger", "tracker", "2", "PV tracker 3"),
    ("solarcharger", "tracker", "3", "PV tracker 4"),
    ("switch", "type", "output_1", "Output 1"),
    ("switch", "type", "output_2", "Output 2"),
    ("switch", "type", "output_3", "Output 3"),
    ("switch", "type", "output_4", "Output 4"),
    ("system", "relay", "0", "Relay 1"),
    ("system", "relay", "1", "Relay 2"),
    ("vebus", "phase", "L1", "AC out L1"),
    ("vebus", "phase", "L2", "AC out L2"),
    ("vebus", "phase", "L3", "AC out L3"),
];

/// Display names shared by all families: (placeholder, token, name).
const UNIVERSAL_NAMES: &[(&str, &str, &str)] = &[
    ("phase", "L1", "Phase 1"),
    ("phase", "L2", "Phase 2"),
    ("phase", "L3", "Phase 3"),
    ("input", "0", "Input 1"),
    ("input", "1", "Input 2"),
    ("output", "0", "Output 1"),
    ("output", "1", "Output 2"),
    ("output", "2", "Output 3"),
    ("tracker", "0", "Tracker 1"),
    ("tracker", "1", "Tracker 2"),
];

/// Sub-paths holding a user-given name for a switch channel, in priority order.
const CUSTOM_NAME_PATHS: &[&str] = &["/Settings/CustomName", "/Name"];

/// A subscription template as supplied by collaborators.
///
/// Attributes other than `path` and `name` are carried through untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PathTemplate {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PathTemplate {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            extra: BTreeMap::new(),
        }
    }

    /// True if the path contains at least one `{placeholder}`.
    pub fn is_wildcard(&self) -> bool {
        PLACEHOLDER.is_match(&self.path)
    }
}

/// Expands `template` against the values of one service.
///
/// `family` is the service type (`switch`, `battery`, …) used for name lookups.
/// Results are ordered by path.
///
/// ```
/// use std::collections::BTreeMap;
/// use busbridge::expand::{PathTemplate, expand_wildcard_paths};
/// use serde_json::json;
///
/// let values: BTreeMap<String, serde_json::Value> =
///     [("/DeviceInstance".to_string(), json!(0))].into_iter().collect();
/// let t = PathTemplate::new("/DeviceInstance", "Instance");
///
/// assert_eq!(expand_wildcard_paths(&t, &values, "x"), vec![t.clone()]);
/// assert!(expand_wildcard_paths(&t, &BTreeMap::new(), "x").is_empty());
/// ```
pub fn expand_wildcard_paths(
    template: &PathTemplate,
    values: &ServiceValues,
    family: &str,
) -> Vec<PathTemplate> {
    let placeholders: Vec<String> = PLACEHOLDER
        .captures_iter(&template.path)
        .map(|c| c[1].to_string())
        .collect();

    if placeholders.is_empty() {
        return if values.contains_key(&template.path) {
            vec![template.clone()]
        } else {
            Vec::new()
        };
    }

    let Some(pattern) = compile(&template.path) else {
        return Vec::new();
    };

    values
        .keys()
        .filter_map(|key| {
            let caps = pattern.captures(key)?;
            let mut name = template.name.clone();
            for (i, placeholder) in placeholders.iter().enumerate() {
                let Some(m) = caps.get(i + 1) else { continue };
                let display = display_name(family, placeholder, m.as_str(), &key[..m.end()], values);
                name = name.replace(&format!("{{{placeholder}}}"), &display);
            }
            Some(PathTemplate {
                path: key.clone(),
                name,
                extra: template.extra.clone(),
            })
        })
        .collect()
}

/// Builds `^…$` with every placeholder turned into a non-separator capture.
fn compile(path: &str) -> Option<Regex> {
    let mut pattern = String::from("^");
    let mut last = 0;
    for m in PLACEHOLDER.find_iter(path) {
        pattern.push_str(&regex::escape(&path[last..m.start()]));
        pattern.push_str("([^/]+)");
        last = m.end();
    }
    pattern.push_str(&regex::escape(&path[last..]));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!(%path, error = %e, "template path did not compile");
            None
        }
    }
}

fn display_name(
    family: &str,
    placeholder: &str,
    token: &str,
    base: &str,
    values: &ServiceValues,
) -> String {
    if family == "switch" && placeholder == "type" {
        if let Some(custom) = custom_name(base, values) {
            return custom;
        }
    }
    FAMILY_NAMES
        .iter()
        .find(|(f, p, t, _)| *f == family && *p == placeholder && *t == token)
        .map(|(_, _, _, name)| *name)
        .or_else(|| {
            UNIVERSAL_NAMES
                .iter()
                .find(|(p, t, _)| *p == placeholder && *t == token)
                .map(|(_, _, name)| *name)
        })
        .unwrap_or(token)
        .to_string()
}

fn custom_name(base: &str, values: &ServiceValues) -> Option<String> {
    CUSTOM_NAME_PATHS.iter().find_map(|suffix| {
        values
            .get(&format!("{base}{suffix}"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}
