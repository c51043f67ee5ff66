//! Wire codec for the access-check message bus protocol.
//!
//! Outbound, every checked item becomes one relation line,
//! `<resource-action>@user:<principal>`, and the lines of a batch are joined
//! with `\n` (no trailing newline). Inbound, the decision backend answers with
//! one result per line.
//!
//! The backend has no structured error channel: when it fails it replies with
//! a human-readable sentence instead of result lines. [`parse_reply`] detects
//! this by looking for a space in the first [`SANITY_WINDOW`] bytes. A result
//! line that legitimately contains a space early on is therefore misread as an
//! error. The heuristic is kept as-is because deployed backends rely on it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

/// Separator between the checked resource and the subject of a relation line.
pub const USER_RELATION: &str = "@user:";

/// Number of leading reply bytes inspected by the error heuristic.
pub const SANITY_WINDOW: usize = 20;

/// Errors raised while decoding a backend reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The reply looks like a free-text error message rather than result lines.
    #[error("unexpected response from access check service")]
    UnexpectedResponse {
        /// Lossy UTF-8 rendering of the inspected window, for logging.
        preview: String,
    },
}

/// Format a single relation line.
#[must_use]
pub fn relation_line(resource: &str, principal: &str) -> String {
    let mut line = String::with_capacity(resource.len() + USER_RELATION.len() + principal.len());
    line.push_str(resource);
    line.push_str(USER_RELATION);
    line.push_str(principal);
    line
}

/// Build the outbound message for a batch of checks.
///
/// Empty elements are skipped. When nothing is left the result is an empty
/// string and the caller must not send it.
#[must_use]
pub fn build_message<S: AsRef<str>>(principal: &str, requests: &[S]) -> String {
    requests
        .iter()
        .map(AsRef::as_ref)
        .filter(|r| !r.is_empty())
        .map(|resource| relation_line(resource, principal))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Returns `true` when the reply trips the free-text error heuristic.
#[must_use]
pub fn looks_like_error(reply: &[u8]) -> bool {
    reply[..reply.len().min(SANITY_WINDOW)].contains(&b' ')
}

/// Decode a backend reply into result lines.
///
/// Lines are split on `\n`, trimmed, and blank lines are dropped. Order is
/// preserved exactly as received; no attempt is made to align results with
/// the request elements they answer.
pub fn parse_reply(reply: &[u8]) -> Result<Vec<String>, WireError> {
    if looks_like_error(reply) {
        let window = &reply[..reply.len().min(SANITY_WINDOW)];
        return Err(WireError::UnexpectedResponse {
            preview: String::from_utf8_lossy(window).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(reply)
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn relation_line_joins_resource_and_principal() {
        assert_eq!(
            relation_line("project:123:read", "alice"),
            "project:123:read@user:alice"
        );
    }

    #[test]
    fn build_message_joins_lines_without_trailing_newline() {
        let message = build_message("test-user", &["resource1", "resource2"]);
        assert_eq!(message, "resource1@user:test-user\nresource2@user:test-user");
    }

    #[test]
    fn build_message_skips_empty_elements() {
        let message = build_message("bob", &["", "committee:456:write", "", "project:1:read", ""]);
        assert_eq!(
            message,
            "committee:456:write@user:bob\nproject:1:read@user:bob"
        );
        assert!(!message.starts_with('\n'));
        assert!(!message.ends_with('\n'));
    }

    #[test]
    fn build_message_is_empty_for_no_usable_elements() {
        let none: [&str; 0] = [];
        assert_eq!(build_message("bob", &none), "");
        assert_eq!(build_message("bob", &["", "", ""]), "");
    }

    #[test]
    fn build_message_accepts_owned_strings() {
        let requests = vec!["a:1:read".to_string()];
        assert_eq!(build_message("p", &requests), "a:1:read@user:p");
    }

    #[test]
    fn parse_reply_splits_lines_in_order() {
        assert_eq!(
            parse_reply(b"true\nfalse\ntrue").unwrap(),
            vec!["true", "false", "true"]
        );
    }

    #[test]
    fn parse_reply_drops_blank_lines() {
        assert_eq!(parse_reply(b"true\n\nfalse\n").unwrap(), vec!["true", "false"]);
    }

    #[test]
    fn parse_reply_trims_surrounding_whitespace() {
        assert_eq!(parse_reply(b"allow\r\n\tdeny\n").unwrap(), vec!["allow", "deny"]);
    }

    #[test]
    fn parse_reply_of_empty_payload_is_empty() {
        assert!(parse_reply(b"").unwrap().is_empty());
    }

    #[test]
    fn parse_reply_rejects_space_in_window() {
        let err = parse_reply(b"error message here").unwrap_err();
        assert_eq!(
            err,
            WireError::UnexpectedResponse {
                preview: "error message here".to_string()
            }
        );
    }

    #[test]
    fn parse_reply_only_inspects_the_window() {
        // Space at byte 20 is outside the window and passes through.
        let reply = b"aaaaaaaaaaaaaaaaaaaa b";
        assert_eq!(parse_reply(reply).unwrap(), vec!["aaaaaaaaaaaaaaaaaaaa b"]);

        // Space at byte 19 is inside.
        let reply = b"aaaaaaaaaaaaaaaaaaa b";
        assert!(parse_reply(reply).is_err());
    }

    #[test]
    fn error_preview_is_truncated_to_window() {
        let err = parse_reply(b"backend failed to evaluate relation tuples").unwrap_err();
        let WireError::UnexpectedResponse { preview } = err;
        assert_eq!(preview.len(), SANITY_WINDOW);
    }
}
