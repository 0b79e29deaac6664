//! Authenticator (C4): decides `(may_read, may_write)` for a request from an
//! INI-style access-policy file, loaded once at startup and read-only
//! thereafter (see DESIGN.md for the "no reload" Open Question).

use std::collections::{HashMap, HashSet};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ini::Ini;

/// `[users]` maps username -> plaintext password; `[access]` maps username ->
/// the set of repository segments they may push to. Plaintext storage mirrors
/// the original GitTornado access file format for drop-in compatibility.
pub struct Policy {
    users: HashMap<String, String>,
    access: HashMap<String, HashSet<String>>,
}

/// Outcome of a permission check, in enough detail for the handler to choose
/// between 401 (no usable credentials were presented at all) and 403
/// (credentials were valid but don't grant the requested access) — a
/// distinction the bare `(may_read, may_write)` pair named in SPEC_FULL.md
/// §4.4 can't make on its own, but which the worked example in §8 S3 needs.
pub struct AuthDecision {
    pub may_read: bool,
    pub may_write: bool,
    /// True iff the request carried an `Authorization: Basic` header that
    /// decoded to a known user with the correct password.
    pub authenticated: bool,
}

impl Policy {
    pub fn empty() -> Self {
        Self {
            users: HashMap::new(),
            access: HashMap::new(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to parse access file {path:?}: {e}"))?;

        let mut users = HashMap::new();
        if let Some(section) = ini.section(Some("users")) {
            for (user, pw) in section.iter() {
                users.insert(user.to_owned(), pw.to_owned());
            }
        }

        let mut access = HashMap::new();
        if let Some(section) = ini.section(Some("access")) {
            for (user, repos) in section.iter() {
                let set = repos.split(',').map(str::trim).map(str::to_owned).collect();
                access.insert(user.to_owned(), set);
            }
        }

        Ok(Self { users, access })
    }

    /// Decides `(may_read, may_write)` for the given `Authorization` header
    /// value (if any) and the repository segment being accessed.
    ///
    /// `may_read` is always true in this version: every repository is
    /// publicly readable and only write access is gated. The original
    /// source's code path never produces `false` for it either, but the
    /// result keeps the field so a future policy extension doesn't need a
    /// signature change.
    pub fn authenticate(&self, authorization: Option<&str>, repo_segment: &str) -> AuthDecision {
        let anonymous = AuthDecision {
            may_read: true,
            may_write: false,
            authenticated: false,
        };

        let Some(header) = authorization else {
            return anonymous;
        };

        let trimmed = header.trim();
        if trimmed.len() < 5 || !trimmed[..5].eq_ignore_ascii_case("basic") {
            return anonymous;
        }

        let encoded = trimmed[5..].trim();
        let Ok(decoded) = BASE64.decode(encoded) else {
            return anonymous;
        };
        let Ok(credentials) = String::from_utf8(decoded) else {
            return anonymous;
        };
        let Some((user, password)) = credentials.split_once(':') else {
            return anonymous;
        };

        match self.users.get(user) {
            Some(stored) if stored == password => {
                let may_write = self
                    .access
                    .get(user)
                    .is_some_and(|repos| repos.contains(repo_segment));
                AuthDecision {
                    may_read: true,
                    may_write,
                    authenticated: true,
                }
            }
            _ => anonymous,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn policy_with(contents: &str) -> Policy {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Policy::load(file.path()).unwrap()
    }

    #[test]
    fn no_credentials_is_public_read_only() {
        let policy = policy_with("[users]\nalice = secret\n");
        let decision = policy.authenticate(None, "repo.git");
        assert!(decision.may_read);
        assert!(!decision.may_write);
        assert!(!decision.authenticated);
    }

    #[test]
    fn correct_credentials_with_access_grants_write() {
        let policy = policy_with("[users]\nalice = secret\n\n[access]\nalice = repo.git,other.git\n");
        let header = format!("Basic {}", BASE64.encode("alice:secret"));
        let decision = policy.authenticate(Some(&header), "repo.git");
        assert!(decision.may_write);
        assert!(decision.authenticated);
    }

    #[test]
    fn correct_credentials_without_listed_repo_denies_write() {
        let policy = policy_with("[users]\nalice = secret\n\n[access]\nalice = other.git\n");
        let header = format!("Basic {}", BASE64.encode("alice:secret"));
        let decision = policy.authenticate(Some(&header), "repo.git");
        assert!(!decision.may_write);
        assert!(decision.authenticated, "password was correct even though access was denied");
    }

    #[test]
    fn wrong_password_denies_write_and_is_unauthenticated() {
        let policy = policy_with("[users]\nalice = secret\n\n[access]\nalice = repo.git\n");
        let header = format!("Basic {}", BASE64.encode("alice:wrong"));
        let decision = policy.authenticate(Some(&header), "repo.git");
        assert!(!decision.may_write);
        assert!(!decision.authenticated);
    }

    #[test]
    fn malformed_header_is_public_read_only() {
        let policy = policy_with("[users]\nalice = secret\n");
        assert!(!policy.authenticate(Some("Bearer xyz"), "repo.git").authenticated);
        assert!(!policy.authenticate(Some("Basic not-base64!"), "repo.git").authenticated);
    }
}
