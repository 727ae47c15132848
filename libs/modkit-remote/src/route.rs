//! Path template resolution.
//!
//! Templates name their placeholders in braces: `/users/{id}/orders/{oid}`.

use crate::error::RemoteError;
use std::collections::BTreeMap;

/// Check that `name` can appear as a placeholder.
pub fn validate_placeholder(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("route placeholder name is empty".to_owned());
    }
    if let Some(c) = name.chars().find(|c| matches!(c, '{' | '}' | '/')) {
        return Err(format!("route placeholder '{name}' contains '{c}'"));
    }
    Ok(())
}

/// Substitute every `{name}` in `template` with its percent-encoded route value.
///
/// Placeholders are resolved left to right; the first one without a value
/// fails the whole template.
///
/// # Errors
///
/// - `RemoteError::MissingRouteParam` for the first unresolved placeholder
/// - `RemoteError::UrlConstruction` for an unterminated `{`
pub fn resolve_path(
    template: &str,
    routes: &BTreeMap<String, String>,
) -> Result<String, RemoteError> {
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        resolved.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(RemoteError::UrlConstruction {
                url: template.to_owned(),
                reason: "unterminated route placeholder".to_owned(),
            });
        };

        let name = &after[..close];
        let value = routes
            .get(name)
            .ok_or_else(|| RemoteError::MissingRouteParam {
                param: name.to_owned(),
            })?;
        resolved.push_str(&urlencoding::encode(value));
        rest = &after[close + 1..];
    }

    resolved.push_str(rest);
    Ok(resolved)
}
