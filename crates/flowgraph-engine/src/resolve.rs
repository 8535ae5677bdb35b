use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use flowgraph_schemas::Node;

use crate::condition::get_nested_value;

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolves `{{source.path}}` tokens inside parameter values against the
/// outputs reachable from a node (§4.5, §6 "Template syntax").
///
/// `source` is a source-node id, a source-node type (unique in the graph),
/// or the reserved `$json` for the primary upstream output. Resolution is a
/// single pass: the substituted text is never re-scanned for tokens.
pub struct ParameterResolver<'a> {
    outputs_by_id: &'a HashMap<String, Value>,
    type_to_id: HashMap<&'a str, &'a str>,
    primary_output: Option<&'a Value>,
    token: Regex,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(
        nodes: &'a [Node],
        outputs: &'a HashMap<String, Value>,
        primary_output: Option<&'a Value>,
    ) -> Self {
        let mut type_to_id: HashMap<&'a str, &'a str> = HashMap::new();
        let mut seen_twice = std::collections::HashSet::new();
        for node in nodes {
            if seen_twice.contains(node.node_type.as_str()) {
                continue;
            }
            if type_to_id.insert(node.node_type.as_str(), node.id.as_str()).is_some() {
                // Ambiguous type across multiple nodes: not unique, drop it.
                type_to_id.remove(node.node_type.as_str());
                seen_twice.insert(node.node_type.as_str());
            }
        }

        Self {
            outputs_by_id: outputs,
            type_to_id,
            primary_output,
            token: Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("static regex"),
        }
    }

    fn lookup_source(&self, source: &str) -> Option<&Value> {
        if source == "$json" {
            return self.primary_output;
        }
        if let Some(v) = self.outputs_by_id.get(source) {
            return Some(v);
        }
        self.type_to_id
            .get(source)
            .and_then(|id| self.outputs_by_id.get(*id))
    }

    fn resolve_token(&self, token: &str) -> String {
        let mut parts = token.splitn(2, '.');
        let source = parts.next().unwrap_or("").trim();
        let path = parts.next().unwrap_or("").trim();

        let Some(output) = self.lookup_source(source) else {
            return String::new();
        };
        if path.is_empty() {
            return stringify(output);
        }
        get_nested_value(output, path).map(stringify).unwrap_or_default()
    }

    pub fn resolve_string(&self, input: &str) -> String {
        self.token
            .replace_all(input, |caps: &regex::Captures| self.resolve_token(&caps[1]))
            .into_owned()
    }

    /// Recursively resolves string leaves of a JSON value; other types pass
    /// through unchanged.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_string(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn resolve_parameters(&self, parameters: &HashMap<String, Value>) -> HashMap<String, Value> {
        parameters
            .iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }
}
