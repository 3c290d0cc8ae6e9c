//! The single authoritative list of runtime-only paths (spec §3 invariant 7,
//! §9 design notes).
//!
//! These paths hold orchestrator state — session archives, pending-commit
//! markers, per-attempt scratch — and must never reach `main`. WIP-commit,
//! merge auto-resolve, and worktree cleanup all consult *this* list so the
//! three call sites can't drift out of sync with each other.

/// Path prefixes (relative to repo root) excluded from every commit the
/// orchestrator makes, and auto-resolved (by deletion) when they conflict
/// during a merge.
pub const RUNTIME_EXCLUDE_PATHS: &[&str] = &[
    ".opensprint/pending-commits.json",
    ".opensprint/sessions/",
    ".opensprint/active/",
];

/// `true` if `path` (repo-root-relative, `/`-separated) falls under one of
/// the runtime-exclude prefixes.
#[must_use]
pub fn is_runtime_excluded(path: &str) -> bool {
    RUNTIME_EXCLUDE_PATHS.iter().any(|prefix| {
        if prefix.ends_with('/') {
            path.starts_with(prefix)
        } else {
            path == *prefix
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_exact_file() {
        assert!(is_runtime_excluded(".opensprint/pending-commits.json"));
    }

    #[test]
    fn matches_directory_prefix() {
        assert!(is_runtime_excluded(".opensprint/sessions/t1-1.json"));
        assert!(is_runtime_excluded(".opensprint/active/t1.lock"));
    }

    #[test]
    fn does_not_match_unrelated_path() {
        assert!(!is_runtime_excluded("src/main.rs"));
        assert!(!is_runtime_excluded(".opensprint/config.toml"));
    }
}
