//! Transform Pipeline - per-chunk rewriting before forwarding and logging
//!
//! Three steps run in order on every chunk:
//! 1. Token substitution (affects forwarded bytes and the transcript)
//! 2. One-shot credential censorship (client chunks, transcript only)
//! 3. Escaping of `\`, `\n` and `\r` so each record stays on one line

use bytes::Bytes;
use std::borrow::Cow;

use super::pump::Direction;

/// Client asks to upgrade the stream
pub const CLIENT_TLS_MARKER: &[u8] = b"<starttls";

/// Server approves the upgrade
pub const SERVER_TLS_MARKER: &[u8] = b"<proceed";

/// Start of the SASL authentication element
pub const CLIENT_AUTH_MARKER: &[u8] = b"<auth";

/// Logged in place of the first chunk carrying credentials
pub const CENSORED_AUTH: &[u8] = b"<auth>CENSORED</auth>";

/// Substring containment on raw bytes
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Replace every non-overlapping occurrence of `from` with `to`
pub fn replace_all<'a>(haystack: &'a [u8], from: &[u8], to: &[u8]) -> Cow<'a, [u8]> {
    if from.is_empty() || !contains(haystack, from) {
        return Cow::Borrowed(haystack);
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while !rest.is_empty() {
        if rest.starts_with(from) {
            out.extend_from_slice(to);
            rest = &rest[from.len()..];
        } else {
            out.push(rest[0]);
            rest = &rest[1..];
        }
    }
    Cow::Owned(out)
}

/// Escape a chunk so it fits on a single transcript line
pub fn escape(chunk: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    for &byte in chunk {
        match byte {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Address token substitution between the client's and the server's view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubstitution {
    local: Vec<u8>,
    remote: Vec<u8>,
}

impl TokenSubstitution {
    /// Returns `None` unless both tokens are non-empty
    pub fn new(local: impl Into<Vec<u8>>, remote: impl Into<Vec<u8>>) -> Option<Self> {
        let local = local.into();
        let remote = remote.into();
        if local.is_empty() || remote.is_empty() {
            return None;
        }
        Some(Self { local, remote })
    }

    /// Rewrite a chunk travelling in `direction`
    pub fn apply<'a>(&self, direction: Direction, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        match direction {
            Direction::ClientToServer => replace_all(chunk, &self.local, &self.remote),
            Direction::ServerToClient => replace_all(chunk, &self.remote, &self.local),
        }
    }
}

/// Output of the pipeline for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transformed {
    /// Bytes to write to the opposite endpoint
    pub forward: Bytes,
    /// Escaped transcript payload
    pub record: Vec<u8>,
}

/// Per-session transform pipeline
///
/// The censorship flag is the only state: it is cleared the first time a
/// client chunk carrying [`CLIENT_AUTH_MARKER`] is seen, for the rest of the
/// session, across both phases.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    substitution: Option<TokenSubstitution>,
    censor: bool,
}

impl TransformPipeline {
    pub fn new(substitution: Option<TokenSubstitution>, censor: bool) -> Self {
        Self {
            substitution,
            censor,
        }
    }

    /// Pipeline that forwards and logs chunks verbatim (escaping aside)
    pub fn passthrough() -> Self {
        Self::new(None, false)
    }

    /// Whether the next credential chunk will still be censored
    pub fn censoring(&self) -> bool {
        self.censor
    }

    /// Run all steps over one chunk
    pub fn apply(&mut self, direction: Direction, chunk: Bytes) -> Transformed {
        let forward = match &self.substitution {
            Some(substitution) => match substitution.apply(direction, &chunk) {
                Cow::Borrowed(_) => chunk.clone(),
                Cow::Owned(rewritten) => Bytes::from(rewritten),
            },
            None => chunk.clone(),
        };

        let censored = self.censor
            && direction == Direction::ClientToServer
            && contains(&chunk, CLIENT_AUTH_MARKER);

        let record = if censored {
            self.censor = false;
            escape(CENSORED_AUTH)
        } else {
            escape(&forward)
        };

        Transformed { forward, record }
    }
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self::passthrough()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_markers() {
        assert!(contains(b"<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>", CLIENT_TLS_MARKER));
        assert!(contains(b"...<proceed/>", SERVER_TLS_MARKER));
        assert!(!contains(b"<stream:features/>", SERVER_TLS_MARKER));
        assert!(!contains(b"<proc", SERVER_TLS_MARKER));
    }

    #[test]
    fn test_escape_backslash_newline_carriage_return() {
        assert_eq!(escape(b"a\\b\nc\rd"), b"a\\\\b\\nc\\rd".to_vec());
        assert_eq!(escape(b"<presence/>"), b"<presence/>".to_vec());
    }

    #[test]
    fn test_escape_keeps_other_bytes() {
        let chunk = [0u8, 0x7f, 0xff, b'\t', b'"'];
        assert_eq!(escape(&chunk), chunk.to_vec());
    }

    #[test]
    fn test_replace_all_every_occurrence() {
        let out = replace_all(b"to='a.test' from='a.test'", b"a.test", b"b.example");
        assert_eq!(&*out, b"to='b.example' from='b.example'");
    }

    #[test]
    fn test_replace_all_borrowed_when_absent() {
        let out = replace_all(b"<message/>", b"a.test", b"b.example");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_substitution_requires_both_tokens() {
        assert!(TokenSubstitution::new("", "remote").is_none());
        assert!(TokenSubstitution::new("local", "").is_none());
        assert!(TokenSubstitution::new("local", "remote").is_some());
    }

    #[test]
    fn test_substitution_directions() {
        let subst = TokenSubstitution::new("localhost", "jabber.example").unwrap();
        assert_eq!(
            &*subst.apply(Direction::ClientToServer, b"<stream to='localhost'>"),
            b"<stream to='jabber.example'>"
        );
        assert_eq!(
            &*subst.apply(Direction::ServerToClient, b"<stream from='jabber.example'>"),
            b"<stream from='localhost'>"
        );
        assert_eq!(
            &*subst.apply(Direction::ClientToServer, b"<stream from='jabber.example'>"),
            b"<stream from='jabber.example'>"
        );
    }

    #[test]
    fn test_pipeline_forward_and_record() {
        let mut pipeline =
            TransformPipeline::new(TokenSubstitution::new("localhost", "remote.test"), false);
        let out = pipeline.apply(
            Direction::ClientToServer,
            Bytes::from_static(b"<stream to='localhost'>\n"),
        );
        assert_eq!(&out.forward[..], b"<stream to='remote.test'>\n");
        assert_eq!(out.record, b"<stream to='remote.test'>\\n".to_vec());
    }

    #[test]
    fn test_censorship_is_one_shot() {
        let mut pipeline = TransformPipeline::new(None, true);
        let auth = Bytes::from_static(b"<auth mechanism='PLAIN'>AGFsaWNlAHNlY3JldA==</auth>");

        let first = pipeline.apply(Direction::ClientToServer, auth.clone());
        assert_eq!(first.record, CENSORED_AUTH.to_vec());
        assert_eq!(first.forward, auth);
        assert!(!pipeline.censoring());

        let second = pipeline.apply(Direction::ClientToServer, auth.clone());
        assert_eq!(second.record, auth.to_vec());
    }

    #[test]
    fn test_censorship_ignores_server_chunks() {
        let mut pipeline = TransformPipeline::new(None, true);
        let out = pipeline.apply(Direction::ServerToClient, Bytes::from_static(b"<auth/>"));
        assert_eq!(out.record, b"<auth/>".to_vec());
        assert!(pipeline.censoring());
    }

    #[test]
    fn test_censorship_disabled() {
        let mut pipeline = TransformPipeline::passthrough();
        let out = pipeline.apply(Direction::ClientToServer, Bytes::from_static(b"<auth>x</auth>"));
        assert_eq!(out.record, b"<auth>x</auth>".to_vec());
    }
}
