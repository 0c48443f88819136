//! Request guards: host/origin validation, token auth and path containment.
//!
//! Every check here runs before any filesystem access.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::AppState;
use super::error::ApiError;
use super::state_file::STATE_FILE_NAME;
use crate::keybox::KEYBOX_DIR;
use crate::observer::TriggerKind;

/// Header carrying the auth token.
pub const AUTH_HEADER: &str = "x-auth-token";

/// Routes served without a token (the UI shell only).
const PUBLIC_PATHS: [&str; 2] = ["/", "/index.html"];

/// Single-file keybox read by the hook layer.
const LEGACY_KEYBOX_FILE: &str = "keybox.xml";

const MAX_FILENAME_LEN: usize = 255;

/// Whether a `Host` header value names the loopback server.
///
/// The port is ignored. A missing or empty host is accepted.
pub fn is_safe_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return true;
    };
    let name = if host.starts_with('[') {
        // IPv6 literal; the server only binds IPv4 loopback
        match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        }
    } else {
        host.split(':').next().unwrap_or("")
    };
    matches!(
        name.to_ascii_lowercase().as_str(),
        "" | "localhost" | "127.0.0.1"
    )
}

/// Whether an `Origin` header matches the request's own host.
pub fn is_same_origin(origin: &str, host: Option<&str>) -> bool {
    match host {
        Some(host) if !host.is_empty() => {
            let origin = origin.to_ascii_lowercase();
            let host = host.to_ascii_lowercase();
            origin == format!("http://{}", host) || origin == format!("https://{}", host)
        }
        _ => false,
    }
}

/// Constant-time token comparison.
pub fn token_matches(expected: &str, presented: &str) -> bool {
    let (a, b) = (expected.as_bytes(), presented.as_bytes());
    let mut diff = a.len() ^ b.len();
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= (x ^ y) as usize;
    }
    diff == 0 && !a.is_empty()
}

/// Pull the token from the header, bearer auth or the `token` query parameter.
pub fn presented_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    if let Some(value) = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(value.trim().to_string());
    }
    query.get("token").cloned()
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Rejects requests addressed to anything but loopback, and cross-origin requests.
pub async fn host_guard(req: Request, next: Next) -> Result<Response, ApiError> {
    let headers = req.headers();
    let host = header_str(headers, header::HOST);
    if !is_safe_host(host) {
        tracing::warn!(host = ?host, "rejected request with foreign Host header");
        return Err(ApiError::HostValidation);
    }
    if let Some(origin) = header_str(headers, header::ORIGIN) {
        if !is_same_origin(origin, host) {
            tracing::warn!(origin = %origin, "rejected cross-origin request");
            return Err(ApiError::HostValidation);
        }
    }
    Ok(next.run(req).await)
}

/// Requires the auth token on everything but the UI shell.
pub async fn auth_guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let query: HashMap<String, String> = Query::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    match presented_token(req.headers(), &query) {
        Some(token) if token_matches(&state.token, &token) => Ok(next.run(req).await),
        _ => {
            tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
            Err(ApiError::Auth)
        }
    }
}

/// How a resolved path will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn is_reserved(first_component: &str) -> bool {
    first_component == STATE_FILE_NAME
        || first_component == LEGACY_KEYBOX_FILE
        || first_component == KEYBOX_DIR
        || first_component.starts_with(".keyward-")
        || TriggerKind::from_file_name(first_component).is_some()
}

fn check_reserved(relative: &Path) -> Result<(), ApiError> {
    let first = relative
        .components()
        .next()
        .and_then(|c| c.as_os_str().to_str())
        .unwrap_or("");
    if is_reserved(first) {
        return Err(ApiError::PathTraversal);
    }
    Ok(())
}

fn contained(base: &Path, resolved: &Path) -> Result<(), ApiError> {
    let relative = resolved
        .strip_prefix(base)
        .map_err(|_| ApiError::PathTraversal)?;
    if relative.as_os_str().is_empty() {
        return Err(ApiError::PathTraversal);
    }
    check_reserved(relative)
}

fn canonicalize(path: &Path) -> Result<PathBuf, ApiError> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ApiError::NotFound,
        _ => ApiError::Internal(format!("canonicalize failed: {}", e)),
    })
}

/// Resolve a client-supplied file name against the canonical config directory.
///
/// The name must be relative with every component in `[A-Za-z0-9._-]`, never
/// `.` or `..`. The resolved target (symlinks followed) must stay inside
/// `base` and must not be one of the daemon's own files. For writes the
/// parent directory must already exist.
pub fn resolve_safe_path(base: &Path, name: &str, access: Access) -> Result<PathBuf, ApiError> {
    if name.is_empty() || name.len() > MAX_FILENAME_LEN || !name.split('/').all(is_valid_component)
    {
        return Err(ApiError::PathTraversal);
    }
    check_reserved(Path::new(name))?;

    let joined = base.join(name);
    match access {
        Access::Read => {
            let resolved = canonicalize(&joined)?;
            contained(base, &resolved)?;
            if !resolved.is_file() {
                return Err(ApiError::NotFound);
            }
            Ok(resolved)
        }
        Access::Write => {
            let file_name = joined.file_name().ok_or(ApiError::PathTraversal)?;
            let parent = joined.parent().ok_or(ApiError::PathTraversal)?;
            let parent = canonicalize(parent)?;
            if parent != base {
                contained(base, &parent)?;
            }
            let target = parent.join(file_name);

            match fs::symlink_metadata(&target) {
                Ok(_) => {
                    let resolved = canonicalize(&target)?;
                    contained(base, &resolved)?;
                    if resolved.is_dir() {
                        return Err(ApiError::Validation("not a file".to_string()));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(ApiError::Internal(format!("stat failed: {}", e))),
            }
            Ok(target)
        }
    }
}
