use serde_json::{Map, Value};

pub fn matches(document: &Value, query: &Value) -> bool {
    let Some(clauses) = query.as_object() else {
        return false;
    };
    clauses.iter().all(|(key, expected)| match key.as_str() {
        "$and" => all_of(document, expected),
        "$or" => any_of(document, expected),
        "$nor" => !any_of(document, expected),
        path => field_matches(lookup(document, path), expected),
    })
}

pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |value, segment| value.get(segment))
}

// Applies an inclusion (`{"f": 1}`) or exclusion (`{"f": 0}`) projection.
// `_id` is kept unless explicitly excluded.
pub fn project(document: &Value, projection: &Value) -> Value {
    let Some(fields) = projection.as_object().filter(|fields| !fields.is_empty()) else {
        return document.clone();
    };
    let Some(source) = document.as_object() else {
        return document.clone();
    };

    let keep_id = fields.get("_id").map(is_truthy).unwrap_or(true);
    let inclusive = fields
        .iter()
        .any(|(key, flag)| is_truthy(flag) && (key != "_id" || fields.len() == 1));

    let mut projected = Map::new();
    if inclusive {
        if keep_id {
            if let Some(id) = source.get("_id") {
                projected.insert("_id".to_string(), id.clone());
            }
        }
        for (key, flag) in fields {
            if key == "_id" || !is_truthy(flag) {
                continue;
            }
            if let Some(value) = source.get(key) {
                projected.insert(key.clone(), value.clone());
            }
        }
    } else {
        for (key, value) in source {
            if fields.get(key).is_some_and(|flag| !is_truthy(flag)) {
                continue;
            }
            projected.insert(key.clone(), value.clone());
        }
    }
    Value::Object(projected)
}

fn all_of(document: &Value, clauses: &Value) -> bool {
    clauses
        .as_array()
        .is_some_and(|clauses| clauses.iter().all(|query| matches(document, query)))
}

fn any_of(document: &Value, clauses: &Value) -> bool {
    clauses
        .as_array()
        .is_some_and(|clauses| clauses.iter().any(|query| matches(document, query)))
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(value) => value == expected,
    }
}

fn is_truthy(flag: &Value) -> bool {
    match flag {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::Null => false,
        _ => true,
    }
}
