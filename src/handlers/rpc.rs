//! RPC Handler (C5): `POST /<repo>/git-upload-pack` and
//! `POST /<repo>/git-receive-pack`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::authorize;
use crate::bridge::{self, BridgeRequest};
use crate::config::ServerContext;

pub async fn handle(ctx: Arc<ServerContext>, repo_segment: &str, rpc: &'static str, headers: HeaderMap, body: Body) -> Response {
    let path = match authorize(&ctx, &headers, repo_segment, rpc) {
        Ok(path) => path,
        Err(response) => return response,
    };

    let sub_command = rpc.strip_prefix("git-").expect("rpc is always prefixed git-");
    let gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("gzip"));

    let content_type = match HeaderValue::from_str(&format!("application/x-git-{rpc}-result")) {
        Ok(value) => value,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };

    let request = BridgeRequest {
        args: vec![
            sub_command.to_owned(),
            "--stateless-rpc".to_owned(),
            path.to_string_lossy().into_owned(),
        ],
        body: Some(body),
        gzip,
        content_type,
        extra_headers: Vec::new(),
        prelude: None,
    };

    bridge::run(request).await
}
