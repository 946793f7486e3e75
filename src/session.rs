//! Authenticated-session establishment and cookie plumbing.
//!
//! Two paths into an authenticated context, both best-effort:
//!
//! 1. A base64-encoded storage-state blob (`HARVEST_STORAGE_STATE_B64`),
//!    captured earlier with `audioharvest capture-session`, whose cookies
//!    are installed before navigation.
//! 2. A form login with credentials and an optional time-based one-time
//!    code, filled through recognized selectors.
//!
//! Neither path aborts the run on failure; the readiness predicate decides
//! whether content is actually reachable.

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};
use url::Url;

use crate::config::Config;
use crate::renderer::{js_string, PageContext};

/// One cookie of the authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Serialized session state, compatible with the Playwright
/// `storageState()` JSON shape (unknown fields such as `origins` are
/// ignored on decode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
}

/// Decode a base64-encoded storage-state blob.
pub fn decode_storage_state(b64: &str) -> Result<StorageState> {
    let json = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .context("storage state is not valid base64")?;
    serde_json::from_slice(&json).context("storage state is not valid JSON")
}

/// Encode a storage state as a base64 blob.
pub fn encode_storage_state(state: &StorageState) -> Result<String> {
    let json = serde_json::to_vec(state)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(json))
}

/// Build a `Cookie` request header from the cookies applicable to `url`,
/// or `None` when nothing matches. Domain matching follows the usual
/// suffix rule (`.example.com` matches `app.example.com`); path must be a
/// prefix of the request path.
pub fn cookie_header(cookies: &[SessionCookie], url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let req_path = url.path();
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| domain_matches(&c.domain, host))
        .filter(|c| c.path.is_empty() || req_path.starts_with(c.path.as_str()))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    if cookie_domain.is_empty() {
        return true;
    }
    let d = cookie_domain.trim_start_matches('.');
    host == d || host.ends_with(&format!(".{d}"))
}

/// Generate the current time-based one-time code from a base32 seed.
pub fn totp_code(secret: &str) -> Result<String> {
    let bytes = Secret::Encoded(secret.trim().to_string())
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("invalid TOTP seed: {e:?}"))?;
    let totp = TOTP::new(Algorithm::SHA1, 6, 1, 30, bytes)
        .map_err(|e| anyhow::anyhow!("invalid TOTP parameters: {e}"))?;
    totp.generate_current()
        .context("failed to generate one-time code")
}

const EMAIL_SELECTOR: &str = "input[type=\"email\"], input[name=\"email\"], input#email";
const PASSWORD_SELECTOR: &str = "input[type=\"password\"], input[name=\"password\"], input#password";
const SUBMIT_SELECTOR: &str = "button[type=\"submit\"], input[type=\"submit\"]";
const OTP_SELECTOR: &str = "input[autocomplete=\"one-time-code\"], input[name*=\"otp\" i], input[type=\"tel\"]";

/// Fill a form field and dispatch an input event so framework bindings
/// notice the change.
fn fill_script(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) return false;
            el.value = '{}';
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        }})()"#,
        js_string(selector),
        js_string(value)
    )
}

fn click_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (!el) return false;
            el.click();
            return true;
        }})()"#,
        js_string(selector)
    )
}

/// Whether the current URL still looks like a login page.
fn looks_like_login(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("login") || lower.contains("signin") || lower.contains("sign-in")
}

/// Best-effort form login. Never fails the run: every miss is a warning,
/// and the caller proceeds relying on the readiness predicate.
pub async fn login_if_needed(page: &dyn PageContext, cfg: &Config) -> Result<()> {
    let url = page.current_url().await.unwrap_or_default();
    if !looks_like_login(&url) {
        return Ok(());
    }
    if !cfg.has_credentials() {
        warn!("page looks like a login form but no credentials are configured");
        return Ok(());
    }

    if !page.wait_for_selector(EMAIL_SELECTOR, 15_000).await? {
        warn!("login form did not appear; continuing unauthenticated");
        return Ok(());
    }

    let filled_email = page
        .evaluate(&fill_script(EMAIL_SELECTOR, &cfg.email))
        .await?
        .as_bool()
        .unwrap_or(false);
    let filled_password = page
        .evaluate(&fill_script(PASSWORD_SELECTOR, &cfg.password))
        .await?
        .as_bool()
        .unwrap_or(false);
    if !filled_email || !filled_password {
        warn!("could not fill credential fields; continuing unauthenticated");
        return Ok(());
    }
    let _ = page.evaluate(&click_script(SUBMIT_SELECTOR)).await;
    info!("submitted login form");

    if !cfg.totp_secret.is_empty() {
        if page.wait_for_selector(OTP_SELECTOR, 8_000).await? {
            match totp_code(&cfg.totp_secret) {
                Ok(code) => {
                    let _ = page.evaluate(&fill_script(OTP_SELECTOR, &code)).await;
                    let _ = page.evaluate(&click_script(SUBMIT_SELECTOR)).await;
                    info!("submitted one-time code");
                }
                Err(e) => warn!("one-time code generation failed: {e:#}"),
            }
        } else {
            warn!("one-time-code prompt never appeared");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_state_roundtrip() {
        let state = StorageState {
            cookies: vec![SessionCookie {
                name: "sid".to_string(),
                value: "abc123".to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                http_only: true,
                secure: true,
            }],
        };
        let blob = encode_storage_state(&state).unwrap();
        let decoded = decode_storage_state(&blob).unwrap();
        assert_eq!(decoded.cookies.len(), 1);
        assert_eq!(decoded.cookies[0].name, "sid");
        assert!(decoded.cookies[0].http_only);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let json = r#"{"cookies":[{"name":"a","value":"b"}],"origins":[{"origin":"x"}]}"#;
        let blob = base64::engine::general_purpose::STANDARD.encode(json);
        let state = decode_storage_state(&blob).unwrap();
        assert_eq!(state.cookies.len(), 1);
        assert_eq!(state.cookies[0].domain, "");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_storage_state("not base64 at all!!!").is_err());
    }

    #[test]
    fn test_cookie_header_domain_and_path_rules() {
        let cookies = vec![
            SessionCookie {
                name: "sid".into(),
                value: "1".into(),
                domain: ".example.com".into(),
                path: "/".into(),
                http_only: false,
                secure: false,
            },
            SessionCookie {
                name: "other".into(),
                value: "2".into(),
                domain: "elsewhere.net".into(),
                path: "/".into(),
                http_only: false,
                secure: false,
            },
            SessionCookie {
                name: "scoped".into(),
                value: "3".into(),
                domain: "app.example.com".into(),
                path: "/admin".into(),
                http_only: false,
                secure: false,
            },
        ];
        let url = Url::parse("https://app.example.com/reports").unwrap();
        let header = cookie_header(&cookies, &url).unwrap();
        assert_eq!(header, "sid=1");

        let admin = Url::parse("https://app.example.com/admin/calls").unwrap();
        let header = cookie_header(&cookies, &admin).unwrap();
        assert!(header.contains("sid=1"));
        assert!(header.contains("scoped=3"));
    }

    #[test]
    fn test_cookie_header_none_when_no_match() {
        let cookies = vec![SessionCookie {
            name: "sid".into(),
            value: "1".into(),
            domain: "elsewhere.net".into(),
            path: "/".into(),
            http_only: false,
            secure: false,
        }];
        let url = Url::parse("https://app.example.com/").unwrap();
        assert!(cookie_header(&cookies, &url).is_none());
    }

    #[test]
    fn test_totp_code_is_six_digits() {
        // RFC 6238 test seed, base32-encoded.
        let code = totp_code("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_looks_like_login() {
        assert!(looks_like_login("https://app.example.com/login?next=/"));
        assert!(looks_like_login("https://example.com/SignIn"));
        assert!(!looks_like_login("https://app.example.com/reports/calls"));
    }
}
