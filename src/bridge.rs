//! Process Bridge (C1): the full-duplex coupler between an HTTP request and a
//! `git ... --stateless-rpc` child process. This is the hard engineering the
//! rest of the crate exists to set up correctly (see SPEC_FULL.md §4.1).
//!
//! The original source hand-rolls an evented chunk reader and a manual
//! chunked-response encoder because it runs on a single-threaded callback
//! event loop with no async primitives. Here, hyper/axum already dechunk the
//! inbound body and chunk the outbound one (since the body is a stream of
//! unknown length), so this module concentrates on exactly the parts that
//! don't come for free: gzip decode, the stdout/stderr race that decides
//! between a 200 and a stderr-driven 500, and back-pressured streaming.

use std::io;
use std::process::Stdio;

use async_compression::tokio::bufread::GzipDecoder;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;

/// Bounded so a slow client cannot make the bridge buffer the whole of a large
/// pack file in memory; see SPEC_FULL.md §5 Backpressure.
const OUTBOUND_CHANNEL_CAPACITY: usize = 8;
const READ_BLOCK_SIZE: usize = 8192;

/// Everything the bridge needs to spawn `git` and answer the client. The
/// caller (an RPC or info/refs handler) is responsible for everything before
/// this point: routing, repository resolution, and authentication.
pub struct BridgeRequest {
    pub args: Vec<String>,
    pub body: Option<Body>,
    pub gzip: bool,
    pub content_type: HeaderValue,
    pub extra_headers: Vec<(HeaderName, HeaderValue)>,
    pub prelude: Option<Bytes>,
}

pub async fn run(req: BridgeRequest) -> Response {
    let BridgeRequest {
        args,
        body,
        gzip,
        content_type,
        extra_headers,
        prelude,
    } = req;

    let mut command = Command::new("git");
    command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(error = %e, argv = ?args, "failed to spawn git child process");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to start git process");
        }
    };

    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::error!(%status, argv = ?args, "git child exited before accepting any input");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "subprocess returned prematurely");
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "failed to poll git child status after spawn");
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to start git process");
        }
    }

    let stdin = child.stdin.take().expect("stdin was piped at spawn");
    let mut stdout = child.stdout.take().expect("stdout was piped at spawn");
    let mut stderr = child.stderr.take().expect("stderr was piped at spawn");

    match body {
        Some(body) => {
            tokio::spawn(forward_inbound(body, gzip, stdin));
        }
        None => drop(stdin),
    }

    let mut stdout_buf = BytesMut::with_capacity(READ_BLOCK_SIZE);
    let mut stderr_buf = BytesMut::with_capacity(READ_BLOCK_SIZE);
    let mut stdout_eof = false;
    let mut stderr_eof = false;

    loop {
        if stdout_eof && stderr_eof {
            tracing::warn!(argv = ?args, "git child produced no output on stdout or stderr");
            tokio::spawn(log_child_exit(child));
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "did not produce any data");
        }

        tokio::select! {
            result = stdout.read_buf(&mut stdout_buf), if !stdout_eof => {
                match result {
                    Ok(0) => stdout_eof = true,
                    Ok(_) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading git child stdout");
                        stdout_eof = true;
                    }
                }
            }
            result = stderr.read_buf(&mut stderr_buf), if !stderr_eof => {
                match result {
                    Ok(0) => stderr_eof = true,
                    Ok(_) => {
                        let mut rest = Vec::new();
                        let _ = stderr.read_to_end(&mut rest).await;
                        stderr_buf.extend_from_slice(&rest);
                        tracing::error!(
                            argv = ?args,
                            stderr = %String::from_utf8_lossy(&stderr_buf),
                            "git child wrote to stderr before producing any stdout",
                        );
                        tokio::spawn(drain_and_wait(child, stdout));
                        return error_with_payload(StatusCode::INTERNAL_SERVER_ERROR, stderr_buf.freeze());
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading git child stderr");
                        stderr_eof = true;
                    }
                }
            }
        }
    }

    // stdout won the race: headers go out now and never again.
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type);
    for (name, value) in extra_headers {
        headers.insert(name, value);
    }
    headers.insert(header::DATE, date_header());

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(OUTBOUND_CHANNEL_CAPACITY);

    if let Some(prelude) = prelude {
        let _ = tx.send(Ok(prelude)).await;
    }
    let _ = tx.send(Ok(stdout_buf.freeze())).await;

    tokio::spawn(forward_outbound(stdout, stderr, child, tx));

    (headers, Body::from_stream(ReceiverStream::new(rx))).into_response()
}

/// Copies the (optionally gzip-wrapped) request body into the child's stdin,
/// closing it when the copy ends. `tokio::io::copy` gives us the inbound-path
/// discipline from SPEC_FULL.md §4.1 items 1-4 for free: it only pulls more
/// bytes from the body once the previous write to `stdin` has been accepted,
/// and it drops (closes) `stdin` as soon as the body is exhausted.
async fn forward_inbound(body: Body, gzip: bool, mut stdin: ChildStdin) {
    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader = StreamReader::new(stream);

    let result = if gzip {
        let mut decoder = GzipDecoder::new(BufReader::new(reader));
        tokio::io::copy(&mut decoder, &mut stdin).await
    } else {
        let mut reader = reader;
        tokio::io::copy(&mut reader, &mut stdin).await
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "inbound copy to git child stdin ended early (client abort or decode error)");
    }
}

/// Streams the remainder of stdout to the client, logging (but not framing)
/// any stderr bytes that arrive after headers have already been sent, then
/// waits on the child for exit-status logging once both pipes are closed.
async fn forward_outbound(mut stdout: ChildStdout, mut stderr: ChildStderr, child: Child, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = [0u8; READ_BLOCK_SIZE];
    let mut stdout_eof = false;
    let mut stderr_eof = false;
    let mut client_gone = false;

    while !(stdout_eof && stderr_eof) {
        tokio::select! {
            result = stdout.read(&mut buf), if !stdout_eof => {
                match result {
                    Ok(0) => stdout_eof = true,
                    Ok(n) => {
                        if !client_gone && tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                            tracing::debug!("client went away mid-response, draining git child without forwarding");
                            client_gone = true;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading git child stdout");
                        stdout_eof = true;
                    }
                }
            }
            result = stderr.read(&mut buf), if !stderr_eof => {
                match result {
                    Ok(0) => stderr_eof = true,
                    Ok(n) => tracing::warn!(
                        stderr = %String::from_utf8_lossy(&buf[..n]),
                        "git child wrote to stderr after headers were already sent",
                    ),
                    Err(e) => {
                        tracing::warn!(error = %e, "error reading git child stderr");
                        stderr_eof = true;
                    }
                }
            }
        }
    }

    drop(tx);
    log_child_exit(child).await;
}

/// Used on the stderr-wins-the-race path: stdout is almost certainly empty,
/// but it must still be drained and the child reaped so no descriptor or
/// zombie process is leaked (SPEC_FULL.md invariant 5).
async fn drain_and_wait(child: Child, mut stdout: ChildStdout) {
    let mut sink = Vec::new();
    let _ = stdout.read_to_end(&mut sink).await;
    log_child_exit(child).await;
}

async fn log_child_exit(mut child: Child) {
    match child.wait().await {
        Ok(status) if status.success() => tracing::debug!("git child exited successfully"),
        Ok(status) => tracing::warn!(%status, "git child exited with non-zero status"),
        Err(e) => tracing::warn!(error = %e, "failed to wait for git child"),
    }
}

fn plain_error(status: StatusCode, message: &'static str) -> Response {
    error_with_payload(status, Bytes::from_static(message.as_bytes()))
}

fn error_with_payload(status: StatusCode, body: Bytes) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::DATE, date_header());
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&body.len().to_string()).expect("digits are valid header bytes"),
    );
    (status, headers, body).into_response()
}

/// RFC 1123 (`Sun, 06 Nov 1994 08:49:37 GMT`) formatted in UTC, as the
/// original source's `get_date_header` helper produced.
fn date_header() -> HeaderValue {
    const FORMAT: &[time::format_description::FormatItem] =
        format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

    let formatted = OffsetDateTime::now_utc()
        .format(FORMAT)
        .unwrap_or_else(|_| "Thu, 01 Jan 1970 00:00:00 GMT".to_owned());
    HeaderValue::from_str(&formatted).unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Mutex;

    use axum::body::to_bytes;

    use super::*;

    /// `PATH` is process-global, so the tests below that need a stand-in
    /// `git` binary serialise on this lock rather than risk one test's
    /// `PATH` mutation leaking into another running concurrently.
    static PATH_LOCK: Mutex<()> = Mutex::new(());

    fn date_header_matches_rfc1123_shape() {
        let value = date_header();
        let text = value.to_str().unwrap();
        // "Thu, 01 Jan 1970 00:00:00 GMT"
        assert!(text.ends_with(" GMT"));
        assert_eq!(text.len(), "Sun, 06 Nov 1994 08:49:37 GMT".len());
    }

    #[test]
    fn date_header_is_well_formed() {
        date_header_matches_rfc1123_shape();
    }

    /// Writes an executable shell script named `git` into a fresh temp
    /// directory and prepends that directory to `PATH`, so `Command::new("git")`
    /// in [`run`] resolves to it for the duration of the returned guard.
    struct FakeGit {
        _dir: tempfile::TempDir,
        original_path: Option<std::ffi::OsString>,
    }

    impl Drop for FakeGit {
        fn drop(&mut self) {
            match self.original_path.take() {
                Some(path) => std::env::set_var("PATH", path),
                None => std::env::remove_var("PATH"),
            }
        }
    }

    fn install_fake_git(script: &str) -> FakeGit {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("git");
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(format!("#!/bin/sh\n{script}\n").as_bytes()).unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let original_path = std::env::var_os("PATH");
        let mut new_path = std::ffi::OsString::from(dir.path());
        if let Some(existing) = &original_path {
            new_path.push(":");
            new_path.push(existing);
        }
        std::env::set_var("PATH", &new_path);

        FakeGit {
            _dir: dir,
            original_path,
        }
    }

    fn noop_request() -> BridgeRequest {
        BridgeRequest {
            args: vec!["upload-pack".to_owned()],
            body: None,
            gzip: false,
            content_type: HeaderValue::from_static("application/x-git-upload-pack-result"),
            extra_headers: Vec::new(),
            prelude: None,
        }
    }

    #[tokio::test]
    async fn child_exiting_with_no_output_is_a_500() {
        let _lock = PATH_LOCK.lock().unwrap();
        let _fake_git = install_fake_git("exit 0");

        let response = run(noop_request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"did not produce any data");
    }

    #[tokio::test]
    async fn stderr_before_stdout_becomes_500_with_stderr_payload() {
        let _lock = PATH_LOCK.lock().unwrap();
        let _fake_git = install_fake_git("echo 'fatal: not a git repository' >&2; exit 1");

        let response = run(noop_request()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"fatal: not a git repository\n");
    }

    #[tokio::test]
    async fn stdout_wins_the_race_and_streams_through() {
        let _lock = PATH_LOCK.lock().unwrap();
        let _fake_git = install_fake_git("printf 'hello from git'");

        let response = run(noop_request()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-git-upload-pack-result",
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"hello from git");
    }

    #[tokio::test]
    async fn prelude_is_emitted_before_child_stdout() {
        let _lock = PATH_LOCK.lock().unwrap();
        let _fake_git = install_fake_git("printf 'refs'");

        let mut request = noop_request();
        request.prelude = Some(Bytes::from_static(b"0000"));

        let response = run(request).await;
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"0000refs");
    }
}
