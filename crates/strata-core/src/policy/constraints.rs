//! Path-prefix containment.
//!
//! Restricts a capability to a filesystem subtree. Containment is decided
//! component-wise, so a prefix of `/tmp` admits `/tmp` and `/tmp/x` but
//! never `/tmpevil`.

use std::path::Path;

use super::PolicyError;

/// Enforces the `path_prefix` constraint against the request path.
///
/// An empty prefix passes (unconstrained capability); an absent or empty
/// path passes (the method carries no path context). Any path containing
/// `..` is rejected as traversal before resolution. Path and prefix both
/// resolve against the process working directory, so relative and absolute
/// spellings are handled symmetrically.
///
/// # Errors
///
/// Returns `PermissionDenied` on traversal, unresolvable paths, or a path
/// outside the prefix.
pub fn enforce_path_prefix(prefix: &str, path: Option<&str>) -> Result<(), PolicyError> {
    if prefix.is_empty() {
        return Ok(());
    }
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(());
    };

    if path.contains("..") {
        return Err(PolicyError::permission_denied("path traversal not allowed"));
    }

    let abs_path = std::path::absolute(Path::new(path))
        .map_err(|e| PolicyError::permission_denied(format!("cannot resolve path: {e}")))?;
    let abs_prefix = std::path::absolute(Path::new(prefix))
        .map_err(|e| PolicyError::permission_denied(format!("cannot resolve prefix: {e}")))?;

    if abs_path.starts_with(&abs_prefix) {
        Ok(())
    } else {
        Err(PolicyError::permission_denied(format!(
            "path {} outside allowed prefix {}",
            abs_path.display(),
            abs_prefix.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::ErrorCode;

    fn check(prefix: &str, path: &str) -> Result<(), PolicyError> {
        enforce_path_prefix(prefix, Some(path))
    }

    #[test]
    fn empty_prefix_passes_everything() {
        enforce_path_prefix("", Some("/etc/passwd")).unwrap();
        enforce_path_prefix("", None).unwrap();
    }

    #[test]
    fn absent_path_passes() {
        enforce_path_prefix("/tmp", None).unwrap();
        enforce_path_prefix("/tmp", Some("")).unwrap();
    }

    #[test]
    fn boundary_table() {
        for allowed in ["/tmp", "/tmp/x", "/tmp/a/b"] {
            check("/tmp", allowed).unwrap_or_else(|e| panic!("{allowed} denied: {e}"));
        }
        for denied in ["/tmpevil", "/tmpevil/x", "/var", "/tmp/../etc/passwd"] {
            let err = check("/tmp", denied).unwrap_err();
            assert_eq!(err.code, ErrorCode::PermissionDenied, "{denied}");
        }
    }

    #[test]
    fn any_dotdot_is_traversal() {
        for path in ["/tmp/../tmp/x", "..", "a/../b", "/tmp/a..b"] {
            let err = check("/tmp", path).unwrap_err();
            assert!(err.message.contains("traversal"), "{path}: {}", err.message);
        }
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let name = "strata-constraint-test";
        // Relative path inside a CWD-relative prefix.
        check(cwd.to_str().unwrap(), name).unwrap();
        // Same comparison with both sides relative.
        check(".", name).unwrap();
    }

    #[test]
    fn outside_prefix_message_names_both_paths() {
        let err = check("/tmp", "/var/log").unwrap_err();
        assert!(err.message.contains("/var/log"));
        assert!(err.message.contains("/tmp"));
    }
}
