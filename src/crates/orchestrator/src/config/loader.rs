//! YAML loading with `$include` and `${VAR:default}` expansion
//!
//! Used for the arm registry. A mapping holding an `$include` key (a path or
//! a list of paths, relative to the including file) is replaced by the
//! included documents merged in order, with the mapping's own keys applied
//! on top.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::env;
use std::fs;
use std::path::Path;

use crate::{OrchestratorError, Result};

const INCLUDE_KEY: &str = "$include";
const MAX_INCLUDE_DEPTH: usize = 8;

static ENV_VAR: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").ok());

/// Read a YAML file with includes resolved and variables expanded
pub fn load_yaml_file(path: impl AsRef<Path>) -> Result<Value> {
    load_at_depth(path.as_ref(), 0)
}

/// Read a YAML file and deserialize it
pub fn load_yaml_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let value = load_yaml_file(path)?;
    serde_yaml::from_value(value)
        .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))
}

fn load_at_depth(path: &Path, depth: usize) -> Result<Value> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(OrchestratorError::Config(format!(
            "{}: includes nested deeper than {}",
            path.display(),
            MAX_INCLUDE_DEPTH
        )));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let mut value: Value = serde_yaml::from_str(&content)
        .map_err(|e| OrchestratorError::Config(format!("cannot parse {}: {}", path.display(), e)))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    resolve_includes(&mut value, base_dir, depth)?;
    expand_variables(&mut value);
    Ok(value)
}

fn resolve_includes(value: &mut Value, base_dir: &Path, depth: usize) -> Result<()> {
    match value {
        Value::Mapping(map) => {
            if let Some(include) = map.remove(INCLUDE_KEY) {
                let paths = match include {
                    Value::String(p) => vec![p],
                    Value::Sequence(items) => items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(p) => Ok(p),
                            other => Err(OrchestratorError::Config(format!(
                                "{} entries must be paths, got {:?}",
                                INCLUDE_KEY, other
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        return Err(OrchestratorError::Config(format!(
                            "{} must be a path or a list of paths, got {:?}",
                            INCLUDE_KEY, other
                        )))
                    }
                };

                let mut merged = Value::Mapping(Mapping::new());
                for p in paths {
                    let included = load_at_depth(&base_dir.join(p), depth + 1)?;
                    deep_merge(&mut merged, &included);
                }
                let own = Value::Mapping(std::mem::take(map));
                deep_merge(&mut merged, &own);
                *value = merged;
            }

            if let Value::Mapping(map) = value {
                for (_, v) in map.iter_mut() {
                    resolve_includes(v, base_dir, depth)?;
                }
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                resolve_includes(item, base_dir, depth)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_variables(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand_env(s) {
                *s = expanded;
            }
        }
        Value::Mapping(map) => map.iter_mut().for_each(|(_, v)| expand_variables(v)),
        Value::Sequence(items) => items.iter_mut().for_each(expand_variables),
        _ => {}
    }
}

/// `${VAR}` or `${VAR:default}`; unset without default becomes empty
fn expand_env(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }
    let re = ENV_VAR.as_ref()?;
    let expanded = re.replace_all(s, |caps: &Captures<'_>| {
        env::var(&caps[1]).unwrap_or_else(|_| caps.get(2).map_or("", |m| m.as_str()).to_string())
    });
    Some(expanded.into_owned())
}

/// Merge `other` into `base`; mappings merge by key, anything else is replaced
pub fn deep_merge(base: &mut Value, other: &Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, other_value),
                    None => {
                        base_map.insert(key.clone(), other_value.clone());
                    }
                }
            }
        }
        (base, other) => *base = other.clone(),
    }
}
