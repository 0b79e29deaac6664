//! Repository Resolver (C3): maps a URL repo segment to an on-disk directory,
//! rejecting any path traversal attempt.

use std::path::{Path, PathBuf};

pub enum ResolveError {
    /// Segment decodes to something outside `gitbase`, or the directory does
    /// not exist. Both cases are reported identically to the client (404) so
    /// as not to leak which repositories exist.
    NotFound,
}

/// Resolves `segment` against `gitbase`, which must already be canonicalised.
///
/// Canonicalisation handles `..`, absolute-looking segments, and symlinks
/// escaping the base directory all at once: `std::fs::canonicalize` both
/// resolves the real path on disk and fails outright if any component does
/// not exist, so there is no separate "reject `..`" step to get wrong.
pub fn resolve(gitbase: &Path, segment: &str) -> Result<PathBuf, ResolveError> {
    if segment.is_empty() {
        return Err(ResolveError::NotFound);
    }

    let joined = gitbase.join(segment);
    let canonical = joined.canonicalize().map_err(|_| ResolveError::NotFound)?;

    if !canonical.starts_with(gitbase) {
        return Err(ResolveError::NotFound);
    }

    if !canonical.is_dir() {
        return Err(ResolveError::NotFound);
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_a_repo_under_base() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir(base.path().join("repo.git")).unwrap();
        let base_canonical = base.path().canonicalize().unwrap();

        let resolved = resolve(&base_canonical, "repo.git").unwrap();
        assert_eq!(resolved, base_canonical.join("repo.git"));
    }

    #[test]
    fn rejects_missing_repo() {
        let base = tempfile::tempdir().unwrap();
        let base_canonical = base.path().canonicalize().unwrap();
        assert!(resolve(&base_canonical, "nope.git").is_err());
    }

    #[test]
    fn rejects_traversal_outside_base() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path().join("repos");
        fs::create_dir(&base).unwrap();
        fs::create_dir(root.path().join("secret")).unwrap();
        let base_canonical = base.canonicalize().unwrap();

        assert!(resolve(&base_canonical, "../secret").is_err());
    }
}
