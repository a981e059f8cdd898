//! Outgoing URI resolution

use crate::proxy::types::*;
use http::uri::Authority;
use hyper::Uri;

/// Resolve the URI a request is forwarded to.
///
/// With a target, the target base is joined with the original path and query
/// (a target that already carries a path is used as-is). Without one, the
/// request must be in absolute form, as sent to a forward proxy.
pub fn resolve_target_uri(target: Option<&TargetUrl>, original_uri: &Uri) -> ProxyResult<Uri> {
    let Some(target) = target else {
        return if original_uri.scheme().is_some() && original_uri.authority().is_some() {
            Ok(original_uri.clone())
        } else {
            Err(ProxyError::MissingTarget(original_uri.to_string()))
        };
    };

    let target_uri: Uri = target
        .as_ref()
        .parse()
        .map_err(|_| ProxyError::InvalidTargetUrl(target.as_ref().to_string()))?;

    let resolved = if target_uri.path() != DEFAULT_PATH && !target_uri.path().is_empty() {
        target.as_ref().to_string()
    } else {
        let path_and_query = original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(DEFAULT_PATH);
        format!("{}{}", target.as_ref().trim_end_matches('/'), path_and_query)
    };

    resolved
        .parse()
        .map_err(|_| ProxyError::InvalidTargetUrl(resolved))
}

/// Authority to send in the `host` header for `uri`
pub fn host_of(uri: &Uri) -> Option<&Authority> {
    uri.authority()
}
