//! Path-based access into description documents.
//!
//! Paths use JSON Pointer syntax (`/Objects/services`). An empty path or `/`
//! addresses the whole document.

use crate::error::{OrchestratorError, Result};
use serde_json::{Map, Value};

/// JSON path of the services node inside an environment or template description
pub const SERVICES_PATH: &str = "/Objects/services";

fn tokens(path: &str) -> Result<Vec<String>> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    let rest = path.strip_prefix('/').ok_or_else(|| {
        OrchestratorError::InvalidInput(format!("Path must start with '/': {}", path))
    })?;

    Ok(rest
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Read the node at `path`, if present
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    let mut node = doc;
    for token in tokens(path)? {
        let next = match node {
            Value::Object(map) => map.get(&token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(n) => node = n,
            None => return Ok(None),
        }
    }
    Ok(Some(node))
}

/// Write `value` at `path`, creating missing intermediate objects
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<()> {
    let tokens = tokens(path)?;
    let Some((last, parents)) = tokens.split_last() else {
        *doc = value;
        return Ok(());
    };

    let mut node = doc;
    for token in parents {
        node = child_mut(node, token, path)?;
    }

    match node {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = array_index(last, items.len() + 1, path)?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        _ => Err(not_a_container(path)),
    }
}

fn child_mut<'a>(node: &'a mut Value, token: &str, path: &str) -> Result<&'a mut Value> {
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => Ok(map
            .entry(token.to_string())
            .or_insert_with(|| Value::Object(Map::new()))),
        Value::Array(items) => {
            let index = array_index(token, items.len(), path)?;
            Ok(&mut items[index])
        }
        _ => Err(not_a_container(path)),
    }
}

/// Parse an array index, which must be below `bound`
fn array_index(token: &str, bound: usize, path: &str) -> Result<usize> {
    token
        .parse::<usize>()
        .ok()
        .filter(|i| *i < bound)
        .ok_or_else(|| {
            OrchestratorError::InvalidInput(format!("Invalid array index '{}' in {}", token, path))
        })
}

fn not_a_container(path: &str) -> OrchestratorError {
    OrchestratorError::InvalidInput(format!("Path {} traverses a non-container value", path))
}
