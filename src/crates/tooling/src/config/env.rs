//! Environment variable loading utilities

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;

/// Read a variable, treating "not set" as `None`
///
/// Fails only when the value is not valid UTF-8.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::General(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Read and parse a variable
///
/// ```rust,ignore
/// let port: Option<u16> = get_env_parse("PORT")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => val.trim().parse::<T>().map(Some).map_err(|e| {
            ToolingError::General(format!(
                "Failed to parse environment variable {}: {}",
                key, e
            ))
        }),
        None => Ok(None),
    }
}

/// Read a boolean variable
///
/// Accepts true/1/yes/on and false/0/no/off, case-insensitive.
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    let Some(val) = get_env(key)? else {
        return Ok(None);
    };

    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ToolingError::General(format!(
            "Invalid boolean value for {}: {}",
            key, val
        ))),
    }
}

/// `build_env_key("APP_", "port")` is `"APP_PORT"`
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

/// Replace `field` with the parsed value of `{prefix}{NAME}` when it is set
pub fn override_parse<T>(field: &mut T, prefix: &str, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = get_env_parse(&build_env_key(prefix, name))? {
        *field = value;
    }
    Ok(())
}

/// Boolean flavour of [`override_parse`]
pub fn override_bool(field: &mut bool, prefix: &str, name: &str) -> Result<()> {
    if let Some(value) = get_env_bool(&build_env_key(prefix, name))? {
        *field = value;
    }
    Ok(())
}
