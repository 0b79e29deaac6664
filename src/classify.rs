//! Request Classifier (C2): parses the URL path into a repository segment and
//! an RPC name, the way the original source's handlers did it inline.

pub const UPLOAD_PACK: &str = "git-upload-pack";
pub const RECEIVE_PACK: &str = "git-receive-pack";

/// Splits a request path into non-empty path segments, stripping leading and
/// trailing `/`.
pub fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// The repository segment is always the first path element; everything after
/// it (beyond the RPC-determining last element) is ignored, matching the
/// original lookup which only ever consulted `pathlets[0]`.
pub fn repo_segment<'a>(parts: &[&'a str]) -> Option<&'a str> {
    parts.first().copied()
}

/// For the RPC handler: the RPC name is the path's last element and must be
/// one of the two supported stateless-RPC sub-commands.
pub fn rpc_from_last_segment(parts: &[&str]) -> Option<&'static str> {
    match *parts.last()? {
        UPLOAD_PACK => Some(UPLOAD_PACK),
        RECEIVE_PACK => Some(RECEIVE_PACK),
        _ => None,
    }
}

/// For the info/refs handler: the RPC name comes from `?service=`, defaulting
/// to `git-upload-pack` when absent.
pub fn rpc_from_service_param(service: Option<&str>) -> Option<&'static str> {
    match service {
        None | Some("") => Some(UPLOAD_PACK),
        Some(UPLOAD_PACK) => Some(UPLOAD_PACK),
        Some(RECEIVE_PACK) => Some(RECEIVE_PACK),
        Some(_) => None,
    }
}

/// Recognises the "dumb" protocol surface (`.../HEAD`, `.../objects/...`) so
/// it can be answered with a deliberate 501 instead of falling through to a
/// misleading 404.
pub fn is_dumb_protocol_path(parts: &[&str]) -> bool {
    parts.last() == Some(&"HEAD") || parts.iter().any(|p| *p == "objects")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_trims_slashes() {
        assert_eq!(split_path("/repo.git/git-upload-pack/"), vec!["repo.git", "git-upload-pack"]);
    }

    #[test]
    fn repo_is_first_segment_only() {
        let parts = split_path("repo.git/info/refs");
        assert_eq!(repo_segment(&parts), Some("repo.git"));
    }

    #[test]
    fn rpc_from_last_segment_rejects_unknown_rpc() {
        let parts = split_path("repo.git/git-unknown-pack");
        assert_eq!(rpc_from_last_segment(&parts), None);
    }

    #[test]
    fn rpc_from_service_param_defaults_to_upload_pack() {
        assert_eq!(rpc_from_service_param(None), Some(UPLOAD_PACK));
        assert_eq!(rpc_from_service_param(Some("")), Some(UPLOAD_PACK));
        assert_eq!(rpc_from_service_param(Some(RECEIVE_PACK)), Some(RECEIVE_PACK));
        assert_eq!(rpc_from_service_param(Some("bogus")), None);
    }

    #[test]
    fn dumb_protocol_paths_are_recognised() {
        assert!(is_dumb_protocol_path(&split_path("repo.git/HEAD")));
        assert!(is_dumb_protocol_path(&split_path("repo.git/objects/ab/cdef")));
        assert!(!is_dumb_protocol_path(&split_path("repo.git/git-upload-pack")));
    }
}
