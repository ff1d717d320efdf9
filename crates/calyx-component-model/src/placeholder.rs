//! Deferred configuration values: the `${...}` placeholder grammar
//!
//! A configuration value matching the placeholder grammar is not a literal; it
//! is substituted at workflow-launch time from a value map collected by the
//! execution front end. The grammar is `${[attr1.][*.]name}`: an optional
//! first attribute (e.g. `global`), an optional `*` marker flagging the value
//! as encrypted, and the bare placeholder name.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

/// Attribute value marking a placeholder as shared per component type
pub const GLOBAL_ATTRIBUTE: &str = "global";

/// Marker segment flagging a placeholder value as encrypted
pub const ENCRYPTED_ATTRIBUTE: &str = "*";

fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\$\{(?:(\w*)\.)?(?:(\*)\.)?(\w*)\}$").expect("placeholder grammar is valid")
    })
}

/// A parsed placeholder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Optional first attribute, e.g. `global`
    pub attribute1: Option<String>,
    /// Optional literal `*` segment
    pub marker: Option<String>,
    /// The bare placeholder name
    pub name: String,
}

impl Placeholder {
    /// Whether this placeholder is shared per component type rather than
    /// per instance
    pub fn is_global(&self) -> bool {
        self.attribute1.as_deref() == Some(GLOBAL_ATTRIBUTE)
            || self.marker.as_deref() == Some(GLOBAL_ATTRIBUTE)
    }

    /// Whether the value of this placeholder must be stored encrypted
    pub fn is_encrypted(&self) -> bool {
        self.attribute1.as_deref() == Some(ENCRYPTED_ATTRIBUTE)
            || self.marker.as_deref() == Some(ENCRYPTED_ATTRIBUTE)
    }
}

/// Check whether the given configuration value is a placeholder
pub fn is_placeholder(value: &str) -> bool {
    placeholder_regex().is_match(value)
}

/// Parse a configuration value into a [`Placeholder`], if it is one
pub fn parse_placeholder(value: &str) -> Option<Placeholder> {
    let captures = placeholder_regex().captures(value)?;
    Some(Placeholder {
        attribute1: captures.get(1).map(|m| m.as_str().to_string()),
        marker: captures.get(2).map(|m| m.as_str().to_string()),
        name: captures.get(3).map_or_else(String::new, |m| m.as_str().to_string()),
    })
}

/// Launch-time index of all placeholders occurring in a workflow
///
/// Partitions placeholder names into per-component-type (global) and
/// per-instance maps and tracks which placeholders carry encrypted values.
/// The execution front end fills in values through [`PlaceholderIndex::set_value`]
/// before component instantiation.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderIndex {
    component_type_placeholders: BTreeMap<String, BTreeMap<String, Option<serde_json::Value>>>,
    component_instance_placeholders: BTreeMap<String, BTreeMap<String, Option<serde_json::Value>>>,
    component_instances_of_type: BTreeMap<String, Vec<String>>,
    encrypted_placeholders: BTreeSet<String>,
}

impl PlaceholderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one placeholder occurrence found in the configuration of the
    /// component instance `instance_id` of type `component_id`
    pub fn add_placeholder(&mut self, raw: &str, component_id: &str, instance_id: &str) {
        let Some(placeholder) = parse_placeholder(raw) else {
            return;
        };

        let instances = self
            .component_instances_of_type
            .entry(component_id.to_string())
            .or_default();
        if !instances.iter().any(|id| id == instance_id) {
            instances.push(instance_id.to_string());
        }

        if placeholder.is_global() {
            self.component_type_placeholders
                .entry(component_id.to_string())
                .or_default()
                .entry(placeholder.name.clone())
                .or_insert(None);
        } else {
            self.component_instance_placeholders
                .entry(instance_id.to_string())
                .or_default()
                .entry(placeholder.name.clone())
                .or_insert(None);
        }

        if placeholder.is_encrypted() {
            self.encrypted_placeholders
                .insert(format!("{}.{}", component_id, placeholder.name));
        }
    }

    /// Store a value for the given placeholder, routed to the type-level or
    /// instance-level map depending on the placeholder's attributes
    pub fn set_value(
        &mut self,
        raw: &str,
        component_id: &str,
        instance_id: &str,
        value: serde_json::Value,
    ) {
        let Some(placeholder) = parse_placeholder(raw) else {
            return;
        };
        if placeholder.is_global() {
            if let Some(map) = self.component_type_placeholders.get_mut(component_id) {
                map.insert(placeholder.name, Some(value));
            }
        } else if let Some(map) = self.component_instance_placeholders.get_mut(instance_id) {
            map.insert(placeholder.name, Some(value));
        }
    }

    /// Value of an instance-level placeholder, if set
    pub fn value_of(&self, name: &str, instance_id: &str) -> Option<&serde_json::Value> {
        self.component_instance_placeholders
            .get(instance_id)
            .and_then(|map| map.get(name))
            .and_then(Option::as_ref)
    }

    /// Value of a type-level (global) placeholder, if set
    pub fn global_value_of(&self, name: &str, component_id: &str) -> Option<&serde_json::Value> {
        self.component_type_placeholders
            .get(component_id)
            .and_then(|map| map.get(name))
            .and_then(Option::as_ref)
    }

    /// Placeholder names registered for the given component instance
    pub fn placeholders_of_instance(&self, instance_id: &str) -> Vec<&str> {
        self.component_instance_placeholders
            .get(instance_id)
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Placeholder names registered for the given component type
    pub fn placeholders_of_type(&self, component_id: &str) -> Vec<&str> {
        self.component_type_placeholders
            .get(component_id)
            .map(|map| map.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Instances of the given component type that carry placeholders
    pub fn instances_of_type(&self, component_id: &str) -> &[String] {
        self.component_instances_of_type
            .get(component_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether the given placeholder of the given component type is encrypted
    pub fn is_encrypted(&self, component_id: &str, name: &str) -> bool {
        self.encrypted_placeholders
            .contains(&format!("{}.{}", component_id, name))
    }

    /// Resolved values of all placeholders of one component instance,
    /// combining its instance-level and type-level entries
    pub fn resolved_values_for(
        &self,
        component_id: &str,
        instance_id: &str,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut resolved = BTreeMap::new();
        if let Some(map) = self.component_type_placeholders.get(component_id) {
            for (name, value) in map {
                if let Some(value) = value {
                    resolved.insert(name.clone(), value.clone());
                }
            }
        }
        if let Some(map) = self.component_instance_placeholders.get(instance_id) {
            for (name, value) in map {
                if let Some(value) = value {
                    resolved.insert(name.clone(), value.clone());
                }
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_placeholder() {
        assert!(is_placeholder("${path}"));
        assert!(is_placeholder("${global.path}"));
        assert!(is_placeholder("${*.secret}"));
        assert!(is_placeholder("${global.*.secret}"));
        assert!(!is_placeholder("plain value"));
        assert!(!is_placeholder("${unclosed"));
        assert!(!is_placeholder("prefix ${path}"));
    }

    #[test]
    fn test_parse_groups() {
        let ph = parse_placeholder("${global.*.secret}").unwrap();
        assert_eq!(ph.attribute1.as_deref(), Some("global"));
        assert_eq!(ph.marker.as_deref(), Some("*"));
        assert_eq!(ph.name, "secret");

        let ph = parse_placeholder("${path}").unwrap();
        assert_eq!(ph.attribute1, None);
        assert_eq!(ph.marker, None);
        assert_eq!(ph.name, "path");
    }

    #[test]
    fn test_global_and_encrypted_flags() {
        assert!(parse_placeholder("${global.path}").unwrap().is_global());
        assert!(parse_placeholder("${global.*.pw}").unwrap().is_global());
        assert!(!parse_placeholder("${path}").unwrap().is_global());

        assert!(parse_placeholder("${*.pw}").unwrap().is_encrypted());
        assert!(parse_placeholder("${global.*.pw}").unwrap().is_encrypted());
        assert!(!parse_placeholder("${global.path}").unwrap().is_encrypted());
    }

    #[test]
    fn test_index_partitions_by_scope() {
        let mut index = PlaceholderIndex::new();
        index.add_placeholder("${global.python}", "script", "node-1");
        index.add_placeholder("${workdir}", "script", "node-1");
        index.add_placeholder("${workdir}", "script", "node-2");

        assert_eq!(index.placeholders_of_type("script"), vec!["python"]);
        assert_eq!(index.placeholders_of_instance("node-1"), vec!["workdir"]);
        assert_eq!(index.instances_of_type("script"), ["node-1", "node-2"]);
    }

    #[test]
    fn test_index_values() {
        let mut index = PlaceholderIndex::new();
        index.add_placeholder("${global.python}", "script", "node-1");
        index.add_placeholder("${workdir}", "script", "node-1");

        assert_eq!(index.global_value_of("python", "script"), None);
        index.set_value("${global.python}", "script", "node-1", serde_json::json!("/usr/bin/python"));
        index.set_value("${workdir}", "script", "node-1", serde_json::json!("/tmp/wd"));

        assert_eq!(
            index.global_value_of("python", "script"),
            Some(&serde_json::json!("/usr/bin/python"))
        );
        assert_eq!(index.value_of("workdir", "node-1"), Some(&serde_json::json!("/tmp/wd")));

        let resolved = index.resolved_values_for("script", "node-1");
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved.get("python"), Some(&serde_json::json!("/usr/bin/python")));
    }

    #[test]
    fn test_index_tracks_encrypted() {
        let mut index = PlaceholderIndex::new();
        index.add_placeholder("${*.password}", "ssh", "node-1");
        assert!(index.is_encrypted("ssh", "password"));
        assert!(!index.is_encrypted("ssh", "user"));
    }
}
