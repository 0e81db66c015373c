//! Protected views: token plus Referer/Origin validation on GET.

use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use url::Url;

use super::Lifecycle;
use super::error::PipelineError;
use super::request::RequestContext;
use crate::log;

/// Request parameter carrying the session token for protected views.
pub const TOKEN_PARAM: &str = "jakarta.faces.Token";

/// Characters left alone by form encoding.
const FORM_ENCODE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'*').remove(b'_');

/// Reject a request for a protected `view_id` unless it carries the
/// session token and any Referer/Origin header points back into this
/// application.
pub(super) fn check(lifecycle: &Lifecycle, ctx: &RequestContext, view_id: &str) -> Result<(), PipelineError> {
    let protected = &lifecycle.options().protected_views;
    if !is_protected(view_id, protected) {
        return Ok(());
    }

    let incoming = ctx.request().param(TOKEN_PARAM).map(form_encode);
    let expected = lifecycle.state_manager().token();
    if incoming.as_deref() != Some(expected) {
        log!("lifecycle"; "token mismatch for protected view {}", view_id);
        return Err(PipelineError::protected(format!("missing or invalid token for {view_id}")));
    }

    for header in ["referer", "origin"] {
        let Some(value) = ctx.request().header(header) else {
            continue;
        };
        if is_protected(value, protected) {
            continue;
        }
        if !originates_in_webapp(lifecycle, ctx, value)? {
            log!("lifecycle"; "{} {} does not originate in this application ({})", header, value, view_id);
            return Err(PipelineError::protected(format!("invalid {header} {value} for {view_id}")));
        }
    }
    Ok(())
}

fn is_protected(view: &str, protected: &[String]) -> bool {
    protected.iter().any(|p| p == view)
}

/// URLEncoder-style encoding: space becomes `+`.
fn form_encode(value: &str) -> String {
    utf8_percent_encode(value, FORM_ENCODE).to_string().replace("%20", "+")
}

fn originates_in_webapp(lifecycle: &Lifecycle, ctx: &RequestContext, view: &str) -> Result<bool, PipelineError> {
    let request = ctx.request();
    let invalid = |e: url::ParseError| PipelineError::protected(format!("malformed url {view}: {e}"));

    let url = if is_absolute(view) {
        Url::parse(view).map_err(invalid)?
    } else {
        let base = format!("{}://{}:{}", request.scheme(), request.server_name(), request.server_port());
        Url::parse(&base).and_then(|base| base.join(view)).map_err(invalid)?
    };

    let hosts_match = url.host_str() == Some(request.server_name());
    let ports_match = match url.port() {
        None => matches!(request.server_port(), 80 | 443),
        Some(port) => port == request.server_port(),
    };
    let path = url.path();
    let context_matches = path.contains(request.context_path());
    if hosts_match && ports_match && context_matches {
        return Ok(true);
    }

    // last chance: the final segment names one of our views
    let last = path.rfind('/').map_or(path, |idx| &path[idx..]);
    Ok(lifecycle.factory().view_exists(last))
}

fn is_absolute(view: &str) -> bool {
    static RE_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z]+://").unwrap());
    RE_ABSOLUTE.is_match(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_encode() {
        assert_eq!(form_encode("a b+c"), "a+b%2Bc");
        assert_eq!(form_encode("x.y-z_*"), "x.y-z_*");
    }

    #[test]
    fn test_is_absolute() {
        assert!(is_absolute("http://localhost/app"));
        assert!(!is_absolute("/app/page.xhtml"));
        assert!(!is_absolute("HTTP://x"));
    }
}
