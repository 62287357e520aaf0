//! Plugin name validation and scoped-name parsing.
//!
//! Names follow the npm convention: non-empty, lowercase, an optional
//! `@scope/` prefix, and never a relative or traversing path.

use crate::error::PluginError;

/// Validates a plugin name against the registry-name rules.
///
/// # Errors
///
/// Returns [`PluginError::InvalidPluginName`] if the name is empty, is (or
/// contains) a relative/traversing path segment, or fails the scoped-name
/// shape check.
pub fn validate_plugin_name(name: &str) -> Result<(), PluginError> {
    let reject = |reason: &str| {
        Err(PluginError::InvalidPluginName { name: name.to_string(), reason: reason.to_string() })
    };

    if name.is_empty() {
        return reject("name must not be empty");
    }
    if name.starts_with('.') || name.starts_with('/') || name.contains("..") {
        return reject("name must not be a relative or traversing path");
    }
    if name.contains('\\') {
        return reject("name must not contain path separators");
    }

    let (scope, rest) = split_scope(name);
    if let Some(scope) = scope {
        if scope.is_empty() {
            return reject("scope must not be empty");
        }
        if scope.chars().any(|c| !is_name_char(c)) {
            return reject("scope contains invalid characters");
        }
    }
    if rest.is_empty() {
        return reject("name must not be empty after scope");
    }
    if rest.chars().any(|c| !is_name_char(c)) {
        return reject("name contains invalid characters");
    }
    if rest != rest.to_lowercase() {
        return reject("name must be lowercase");
    }

    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Splits `name` into `(Some(scope), rest)` for `@scope/rest`, or `(None, name)`
/// for an unscoped name.
#[must_use]
pub fn split_scope(name: &str) -> (Option<&str>, &str) {
    if let Some(stripped) = name.strip_prefix('@') {
        if let Some((scope, rest)) = stripped.split_once('/') {
            return (Some(scope), rest);
        }
        return (Some(stripped), "");
    }
    (None, name)
}

/// The directory-safe form of a name: `@scope/name` becomes `@scope/name`
/// (scoped names already use the path-shaped form as their active-view
/// directory, per the on-disk layout) and `name@version` for versioned-store
/// entries.
#[must_use]
pub fn versioned_dir_name(name: &str, version: &str) -> String {
    format!("{name}@{version}")
}

/// Splits a bare `require()` specifier into `(head, rest)` where `head` is
/// `@scope/name` or `name` and `rest` is the remaining path, if any (without a
/// leading slash).
#[must_use]
pub fn split_require_spec(spec: &str) -> (String, Option<String>) {
    if let Some(stripped) = spec.strip_prefix('@') {
        let mut parts = stripped.splitn(2, '/');
        let scope = parts.next().unwrap_or_default();
        match parts.next() {
            Some(after_scope) => {
                let mut inner = after_scope.splitn(2, '/');
                let name = inner.next().unwrap_or_default();
                let head = format!("@{scope}/{name}");
                let rest = inner.next().map(str::to_string);
                (head, rest)
            }
            None => (format!("@{scope}"), None),
        }
    } else {
        let mut parts = spec.splitn(2, '/');
        let head = parts.next().unwrap_or_default().to_string();
        let rest = parts.next().map(str::to_string);
        (head, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        assert!(validate_plugin_name("basic").is_ok());
        assert!(validate_plugin_name("my-plugin-with-diff-dep").is_ok());
    }

    #[test]
    fn accepts_scoped_names() {
        assert!(validate_plugin_name("@myorg/my-plugin").is_ok());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(validate_plugin_name("").is_err());
    }

    #[test]
    fn rejects_relative_paths() {
        assert!(validate_plugin_name("./local").is_err());
        assert!(validate_plugin_name("../escape").is_err());
        assert!(validate_plugin_name("a/../b").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(validate_plugin_name("MyPlugin").is_err());
    }

    #[test]
    fn split_scope_handles_both_shapes() {
        assert_eq!(split_scope("lodash"), (None, "lodash"));
        assert_eq!(split_scope("@myorg/my-plugin"), (Some("myorg"), "my-plugin"));
    }

    #[test]
    fn split_require_spec_separates_head_and_rest() {
        assert_eq!(split_require_spec("debug"), ("debug".to_string(), None));
        assert_eq!(
            split_require_spec("debug/package.json"),
            ("debug".to_string(), Some("package.json".to_string()))
        );
        assert_eq!(
            split_require_spec("@myorg/pkg/lib/foo.js"),
            ("@myorg/pkg".to_string(), Some("lib/foo.js".to_string()))
        );
        assert_eq!(split_require_spec("@myorg/pkg"), ("@myorg/pkg".to_string(), None));
    }

    #[test]
    fn versioned_dir_name_formats_as_name_at_version() {
        assert_eq!(versioned_dir_name("debug", "2.6.9"), "debug@2.6.9");
        assert_eq!(versioned_dir_name("@myorg/pkg", "1.0.0"), "@myorg/pkg@1.0.0");
    }
}
