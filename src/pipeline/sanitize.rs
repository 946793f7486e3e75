//! Filesystem-safe output naming.

use url::Url;

/// Maximum length of a sanitized filename, in characters.
pub const MAX_NAME_LEN: usize = 180;

/// Deterministic fallback when nothing usable can be derived.
pub const DEFAULT_NAME: &str = "audio.wav";

/// Make a derived name filesystem-safe: runs of `\ / : * ? " < > |`
/// collapse to a single underscore, and the result is capped at
/// [`MAX_NAME_LEN`] characters. Empty input yields [`DEFAULT_NAME`].
pub fn sanitize_name(name: &str) -> String {
    let base = if name.trim().is_empty() { DEFAULT_NAME } else { name };
    let mut out = String::with_capacity(base.len());
    let mut in_run = false;
    for ch in base.chars() {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
        if out.chars().count() >= MAX_NAME_LEN {
            break;
        }
    }
    out.chars().take(MAX_NAME_LEN).collect()
}

/// Positional fallback name for the asset at `index` (0-based).
pub fn fallback_name(index: usize) -> String {
    format!("audio_{}.wav", index + 1)
}

/// Derive an output name from a URL: the last non-empty path segment,
/// percent-decoded, relative URLs resolved against `base`. Falls back to
/// the positional name when nothing usable remains.
pub fn name_from_url(raw: &str, base: Option<&str>, index: usize) -> String {
    let parsed = match Url::parse(raw) {
        Ok(u) => Some(u),
        Err(_) => base
            .and_then(|b| Url::parse(b).ok())
            .and_then(|b| b.join(raw).ok()),
    };
    let segment = parsed
        .as_ref()
        .and_then(|u| u.path_segments())
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
        .map(percent::decode)
        .unwrap_or_default();
    if segment.is_empty() {
        fallback_name(index)
    } else {
        segment
    }
}

/// Minimal percent-decoding, the counterpart of `decodeURIComponent` for
/// path segments. Invalid escapes pass through untouched.
mod percent {
    pub fn decode(s: &str) -> String {
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                if let (Some(h), Some(l)) = (
                    bytes.get(i + 1).and_then(|b| hex_val(*b)),
                    bytes.get(i + 2).and_then(|b| hex_val(*b)),
                ) {
                    out.push(h * 16 + l);
                    i += 3;
                    continue;
                }
            }
            out.push(bytes[i]);
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_reserved_runs() {
        assert_eq!(sanitize_name("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_name("x://*??y"), "x_y");
        assert_eq!(sanitize_name("call 42.wav"), "call 42.wav");
    }

    #[test]
    fn test_sanitize_empty_yields_default() {
        assert_eq!(sanitize_name(""), DEFAULT_NAME);
        assert_eq!(sanitize_name("   "), DEFAULT_NAME);
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_name(&long).chars().count(), MAX_NAME_LEN);
    }

    #[test]
    fn test_sanitize_output_charset() {
        let hostile = r#"a\b/c:d*e?f"g<h>i|j"#;
        let out = sanitize_name(hostile);
        assert!(!out
            .chars()
            .any(|c| matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')));
    }

    #[test]
    fn test_name_from_url_last_segment() {
        assert_eq!(
            name_from_url("https://h/a/b/call%20one.wav?sig=x", None, 0),
            "call one.wav"
        );
    }

    #[test]
    fn test_name_from_url_relative_against_base() {
        assert_eq!(
            name_from_url("media/rec7.mp3", Some("https://h/app/page"), 3),
            "rec7.mp3"
        );
    }

    #[test]
    fn test_name_from_url_positional_fallback() {
        assert_eq!(name_from_url("https://h/", None, 2), "audio_3.wav");
        assert_eq!(name_from_url("not a url", None, 0), "audio_1.wav");
    }

    #[test]
    fn test_fallback_name_is_one_based() {
        assert_eq!(fallback_name(0), "audio_1.wav");
        assert_eq!(fallback_name(9), "audio_10.wav");
    }
}
