//! Info/Refs Handler (C6): `GET /<repo>/info/refs?service=git-{upload,receive}-pack`.
//!
//! Identical to the RPC handler except for three things: the RPC name comes
//! from a query parameter instead of the path, the child is spawned with
//! `--advertise-refs`, and the response carries a pkt-line prelude plus
//! explicit cache-suppression headers (see SPEC_FULL.md §4.5/4.6).

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::authorize;
use crate::bridge::{self, BridgeRequest};
use crate::classify;
use crate::config::ServerContext;

pub async fn handle(ctx: Arc<ServerContext>, repo_segment: &str, service: Option<&str>, headers: HeaderMap) -> Response {
    let Some(rpc) = classify::rpc_from_service_param(service) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let path = match authorize(&ctx, &headers, repo_segment, rpc) {
        Ok(path) => path,
        Err(response) => return response,
    };

    let sub_command = rpc.strip_prefix("git-").expect("rpc is always prefixed git-");

    let content_type = match HeaderValue::from_str(&format!("application/x-git-{rpc}-advertisement")) {
        Ok(value) => value,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let request = BridgeRequest {
        args: vec![
            sub_command.to_owned(),
            "--stateless-rpc".to_owned(),
            "--advertise-refs".to_owned(),
            path.to_string_lossy().into_owned(),
        ],
        body: None,
        gzip: false,
        content_type,
        extra_headers: no_cache_headers(),
        prelude: Some(advertisement_prelude(rpc)),
    };

    bridge::run(request).await
}

/// `Expires`/`Pragma`/`Cache-Control` forbidding any caching of the ref
/// advertisement, matching the original GitTornado handler's headers.
fn no_cache_headers() -> Vec<(HeaderName, HeaderValue)> {
    vec![
        (header::EXPIRES, HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT")),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
        (
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
        ),
    ]
}

/// The pkt-line `# service=git-<rpc>\n` followed by a flush packet: a
/// four-hex-digit length (inclusive of its own four bytes), the text, then
/// the literal `0000`. The trailing `\n` is part of the length-prefixed text,
/// matching what real `git http-backend` emits on the wire.
fn advertisement_prelude(rpc: &str) -> Bytes {
    let text = format!("# service={rpc}\n");
    let len = text.len() + 4;
    Bytes::from(format!("{len:04x}{text}0000"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_length_includes_trailing_newline_and_header_bytes() {
        let prelude = advertisement_prelude("git-upload-pack");
        assert_eq!(&prelude[..], b"001e# service=git-upload-pack\n0000");
    }

    #[test]
    fn prelude_length_is_len_plus_four() {
        let prelude = advertisement_prelude("git-receive-pack");
        let len_field = std::str::from_utf8(&prelude[..4]).unwrap();
        let declared = usize::from_str_radix(len_field, 16).unwrap();
        assert_eq!(declared, "# service=git-receive-pack\n".len() + 4);
    }
}
