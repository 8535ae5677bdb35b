use serde_json::Value;

use flowgraph_schemas::{Condition, ConditionOperator};

/// Dot-notation lookup, with numeric path segments indexing arrays
/// (e.g. `items.0.name`).
pub fn get_nested_value<'a>(data: &'a Value, field_path: &str) -> Option<&'a Value> {
    if field_path.is_empty() {
        return None;
    }
    let mut current = data;
    for part in field_path.split('.') {
        current = if let Ok(index) = part.parse::<usize>() {
            current.as_array()?.get(index)?
        } else {
            current.as_object()?.get(part)?
        };
    }
    Some(current)
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str()?.parse().ok())
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        _ => false,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates a single condition against a node's output (§4.6.3). Any
/// runtime mismatch (wrong types, bad regex) yields `false` rather than
/// propagating an error — matching the "unknown operator yields false"
/// and "invalid regex yields false" forgiving-fallback requirements.
pub fn evaluate_condition(condition: &Condition, output: &Value) -> bool {
    let actual = get_nested_value(output, &condition.field);
    let target = condition.value.as_ref();

    match condition.operator {
        ConditionOperator::Eq => actual == target,
        ConditionOperator::Neq => actual != target,
        ConditionOperator::Gt => compare_numeric_or_string(actual, target, |a, b| a > b, |a, b| a > b),
        ConditionOperator::Lt => compare_numeric_or_string(actual, target, |a, b| a < b, |a, b| a < b),
        ConditionOperator::Gte => compare_numeric_or_string(actual, target, |a, b| a >= b, |a, b| a >= b),
        ConditionOperator::Lte => compare_numeric_or_string(actual, target, |a, b| a <= b, |a, b| a <= b),
        ConditionOperator::Contains => contains(actual, target),
        ConditionOperator::NotContains => !contains(actual, target),
        ConditionOperator::In => in_list(actual, target),
        ConditionOperator::NotIn => !in_list(actual, target),
        ConditionOperator::Exists => actual.is_some() && actual != Some(&Value::Null),
        ConditionOperator::NotExists => actual.is_none() || actual == Some(&Value::Null),
        ConditionOperator::IsEmpty => is_empty_value(actual),
        ConditionOperator::IsNotEmpty => !is_empty_value(actual),
        ConditionOperator::StartsWith => match (actual, target) {
            (Some(a), Some(t)) => stringify(a).starts_with(&stringify(t)),
            _ => false,
        },
        ConditionOperator::EndsWith => match (actual, target) {
            (Some(a), Some(t)) => stringify(a).ends_with(&stringify(t)),
            _ => false,
        },
        ConditionOperator::Matches => match (actual, target) {
            (Some(a), Some(t)) => regex::Regex::new(&stringify(t))
                .map(|re| re.is_match(&stringify(a)))
                .unwrap_or(false),
            _ => false,
        },
        ConditionOperator::IsTrue => matches!(actual, Some(Value::Bool(true)))
            || matches!(actual, Some(Value::String(s)) if s == "true")
            || matches!(actual, Some(Value::Number(n)) if n.as_i64() == Some(1)),
        ConditionOperator::IsFalse => matches!(actual, Some(Value::Bool(false)))
            || matches!(actual, Some(Value::String(s)) if s == "false")
            || matches!(actual, Some(Value::Number(n)) if n.as_i64() == Some(0)),
        ConditionOperator::IsString => matches!(actual, Some(Value::String(_))),
        ConditionOperator::IsNumber => matches!(actual, Some(Value::Number(_))),
        ConditionOperator::IsBoolean => matches!(actual, Some(Value::Bool(_))),
        ConditionOperator::IsArray => matches!(actual, Some(Value::Array(_))),
        ConditionOperator::IsObject => matches!(actual, Some(Value::Object(_))),
        ConditionOperator::Unknown => false,
    }
}

fn compare_numeric_or_string(
    actual: Option<&Value>,
    target: Option<&Value>,
    numeric: impl Fn(f64, f64) -> bool,
    string: impl Fn(&str, &str) -> bool,
) -> bool {
    let (Some(actual), Some(target)) = (actual, target) else {
        return false;
    };
    if let (Some(a), Some(t)) = (as_f64(actual), as_f64(target)) {
        return numeric(a, t);
    }
    string(&stringify(actual), &stringify(target))
}

fn contains(actual: Option<&Value>, target: Option<&Value>) -> bool {
    let (Some(actual), Some(target)) = (actual, target) else {
        return false;
    };
    match actual {
        Value::String(s) => s.contains(&stringify(target)),
        Value::Array(items) => items.contains(target),
        Value::Object(map) => target.as_str().map(|k| map.contains_key(k)).unwrap_or(false),
        _ => false,
    }
}

fn in_list(actual: Option<&Value>, target: Option<&Value>) -> bool {
    match (actual, target) {
        (Some(actual), Some(Value::Array(items))) => items.contains(actual),
        (actual, target) => actual == target,
    }
}

/// AND/OR combinator over a condition list (§4.6.3). Empty list always
/// matches.
pub fn evaluate_conditions(conditions: &[Condition], output: &Value, require_all: bool) -> bool {
    if conditions.is_empty() {
        return true;
    }
    if require_all {
        conditions.iter().all(|c| evaluate_condition(c, output))
    } else {
        conditions.iter().any(|c| evaluate_condition(c, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: ConditionOperator, value: Option<Value>) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn eq_and_neq() {
        let output = json!({"status": "ok"});
        assert!(evaluate_condition(&cond("status", ConditionOperator::Eq, Some(json!("ok"))), &output));
        assert!(!evaluate_condition(&cond("status", ConditionOperator::Neq, Some(json!("ok"))), &output));
    }

    #[test]
    fn numeric_comparison_coerces_strings() {
        let output = json!({"count": "10"});
        assert!(evaluate_condition(&cond("count", ConditionOperator::Gt, Some(json!(5))), &output));
    }

    #[test]
    fn unknown_operator_yields_false() {
        let output = json!({"a": 1});
        assert!(!evaluate_condition(&cond("a", ConditionOperator::Unknown, None), &output));
    }

    #[test]
    fn invalid_regex_yields_false() {
        let output = json!({"s": "hello"});
        assert!(!evaluate_condition(&cond("s", ConditionOperator::Matches, Some(json!("("))), &output));
    }

    #[test]
    fn nested_array_index_path() {
        let output = json!({"items": [{"name": "a"}, {"name": "b"}]});
        assert_eq!(
            get_nested_value(&output, "items.1.name"),
            Some(&json!("b"))
        );
    }
}
