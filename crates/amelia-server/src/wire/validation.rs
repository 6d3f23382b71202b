//! Request validation rules from spec §4.5: `issue_id` pattern, absolute
//! `worktree_path`, lowercase profile identifiers. Compiled once via
//! `LazyLock`, the way `plan-forge` compiles its policy-extraction regexes.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use amelia_core::OrchestratorError;

static ISSUE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").expect("static regex compiles"));

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("static regex compiles"));

/// `issue_id`: 1-100 chars, `[A-Za-z0-9_-]+`, no path-traversal or shell
/// metacharacters (the pattern itself already excludes those).
pub fn validate_issue_id(issue_id: &str) -> Result<(), OrchestratorError> {
    if !ISSUE_ID_RE.is_match(issue_id) {
        return Err(OrchestratorError::Validation(format!(
            "issue_id {issue_id:?} must be 1-100 chars matching [A-Za-z0-9_-]+"
        )));
    }
    Ok(())
}

/// `worktree_path`: must be absolute, must not contain a NUL byte, and is
/// canonicalized (spec.md "must be absolute; canonicalized; rejected if
/// containing null bytes"). The worktree directory routinely doesn't exist
/// yet when a workflow is queued (the tooling that creates it runs after
/// this validation, outside the core's concern per spec §1), so this
/// resolves `.`/`..` segments lexically rather than calling
/// `std::fs::canonicalize` — symlinks are left untouched. Returns the
/// canonicalized path, which the caller stores in place of the raw input.
pub fn validate_worktree_path(path: &str) -> Result<String, OrchestratorError> {
    if path.contains('\0') {
        return Err(OrchestratorError::Validation(
            "worktree_path must not contain a null byte".into(),
        ));
    }
    if !path.starts_with('/') {
        return Err(OrchestratorError::Validation(format!(
            "worktree_path {path:?} must be an absolute path"
        )));
    }
    Ok(canonicalize_lexically(Path::new(path)))
}

/// Resolve `.`/`..` path components without touching the filesystem. A
/// leading `..` past the root is absorbed rather than erroring, matching
/// `std::fs::canonicalize`'s own behavior of never escaping `/`.
fn canonicalize_lexically(path: &Path) -> String {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out.to_string_lossy().into_owned()
}

/// Optional profile/driver identifiers: lowercased `[a-z0-9_-]+`.
pub fn validate_identifier(label: &str, value: &str) -> Result<(), OrchestratorError> {
    if !IDENTIFIER_RE.is_match(value) {
        return Err(OrchestratorError::Validation(format!(
            "{label} {value:?} must be a lowercase identifier matching [a-z0-9_-]+"
        )));
    }
    Ok(())
}
