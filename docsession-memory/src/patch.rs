//! Patch scripts understood by the in-memory server.
//!
//! A script is a list of `;`-separated statements:
//!
//! - `this.Path = <value>;` assigns a value
//! - `this.Path += <value>;` and `this.Path -= <value>;` adjust a number (`+=` also appends
//!   to strings)
//! - `delete this.Path;` removes a field
//!
//! A value is either `args.<name>`, read from the request's values, or a JSON literal.
//! Single-quoted strings are accepted as well.

use serde_json::{Map, Number, Value};

use docsession_core::{
    commands::PatchRequest,
    error::{SessionError, SessionResult},
};

fn invalid(message: impl Into<String>) -> SessionError {
    SessionError::Server { status: 400, message: message.into() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    Set,
    Add,
    Subtract,
}

/// Runs `patch` against `document` in place.
///
/// On error `document` may be partly patched; callers run scripts against a copy.
pub(crate) fn apply(patch: &PatchRequest, document: &mut Map<String, Value>) -> SessionResult<()> {
    let statements = patch
        .script
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty());

    for statement in statements {
        if let Some(target) = statement.strip_prefix("delete ") {
            let path = target_path(target)?;
            remove_path(document, &path);
            continue;
        }

        let (target, expression) = statement
            .split_once('=')
            .ok_or_else(|| invalid(format!("unsupported patch statement: {statement}")))?;

        let (target, assignment) = if let Some(target) = target.strip_suffix('+') {
            (target, Assignment::Add)
        } else if let Some(target) = target.strip_suffix('-') {
            (target, Assignment::Subtract)
        } else {
            (target, Assignment::Set)
        };

        let path = target_path(target)?;
        let value = evaluate(expression.trim(), patch)?;

        let value = match assignment {
            Assignment::Set => value,
            _ => combine(get_path(document, &path), value, assignment, statement)?,
        };
        set_path(document, &path, value)?;
    }

    Ok(())
}

fn target_path(target: &str) -> SessionResult<Vec<&str>> {
    let path = target
        .trim()
        .strip_prefix("this.")
        .ok_or_else(|| invalid(format!("patch target must start with 'this.': {target}")))?;

    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid(format!("invalid patch target: {target}")));
    }
    Ok(segments)
}

fn evaluate(expression: &str, patch: &PatchRequest) -> SessionResult<Value> {
    if let Some(name) = expression.strip_prefix("args.") {
        return patch
            .values
            .get(name)
            .cloned()
            .ok_or_else(|| invalid(format!("patch argument {name} was not provided")));
    }

    if let Some(text) = expression.strip_prefix('\'').and_then(|rest| rest.strip_suffix('\'')) {
        return Ok(Value::String(text.to_string()));
    }

    serde_json::from_str(expression).map_err(|_| invalid(format!("unsupported patch value: {expression}")))
}

fn combine(current: Option<&Value>, value: Value, assignment: Assignment, statement: &str) -> SessionResult<Value> {
    let current = current.cloned().unwrap_or_else(|| Value::from(0));

    match (&current, &value, assignment) {
        (Value::String(left), Value::String(right), Assignment::Add) => Ok(Value::String(format!("{left}{right}"))),
        (Value::Number(left), Value::Number(right), _) => {
            if let (Some(left), Some(right)) = (left.as_i64(), right.as_i64()) {
                let result = match assignment {
                    Assignment::Subtract => left.checked_sub(right),
                    _ => left.checked_add(right),
                };
                if let Some(result) = result {
                    return Ok(Value::from(result));
                }
            }

            let left = left.as_f64().unwrap_or_default();
            let right = right.as_f64().unwrap_or_default();
            let result = match assignment {
                Assignment::Subtract => left - right,
                _ => left + right,
            };
            Number::from_f64(result)
                .map(Value::Number)
                .ok_or_else(|| invalid(format!("patch produced an invalid number: {statement}")))
        }
        _ => Err(invalid(format!("cannot combine {current} and {value} in: {statement}"))),
    }
}

fn get_path<'a>(document: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (last, parents) = path.split_last()?;
    let mut current = document;
    for segment in parents {
        current = current.get(*segment)?.as_object()?;
    }
    current.get(*last)
}

fn set_path(document: &mut Map<String, Value>, path: &[&str], value: Value) -> SessionResult<()> {
    let Some((last, parents)) = path.split_last() else {
        return Err(invalid("empty patch target"));
    };

    let mut current = document;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry
            .as_object_mut()
            .ok_or_else(|| invalid(format!("{segment} is not an object")))?;
    }

    current.insert(last.to_string(), value);
    Ok(())
}

fn remove_path(document: &mut Map<String, Value>, path: &[&str]) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut current = document;
    for segment in parents {
        match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
    current.remove(*last);
}
