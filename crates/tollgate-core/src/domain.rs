//! Domain keys and URL normalization.
//!
//! A [`DomainKey`] partitions rate-limit and circuit state per remote target.
//! [`normalize_url`] produces the canonical form that dedup keys are derived
//! from, so two spellings of the same posting collapse onto one record.

use std::fmt;

use url::Url;

use crate::error::AppError;

/// Lowercased authority (host plus non-default port) identifying a remote target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey(String);

impl DomainKey {
    /// Extract the domain key from a URL.
    ///
    /// Falls back to the trimmed raw input when the string has no parseable
    /// authority, so the key is never empty for non-empty input.
    pub fn from_url(raw: &str) -> Result<Self, AppError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::ValidationError(
                "cannot derive a domain from an empty URL".into(),
            ));
        }

        let authority = Url::parse(trimmed).ok().and_then(|url| {
            let host = url.host_str()?.to_lowercase();
            Some(match url.port() {
                Some(port) => format!("{host}:{port}"),
                None => host,
            })
        });

        Ok(Self(authority.unwrap_or_else(|| trimmed.to_string())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a URL into its canonical absolute form.
///
/// 1. Anything not starting with `http://` or `https://` is resolved against `base`
/// 2. Authority is lowercased
/// 3. Trailing slashes are stripped from non-root paths
/// 4. The fragment is dropped
///
/// Query strings are kept verbatim.
pub fn normalize_url(raw: &str, base: Option<&str>) -> Result<String, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::ValidationError("URL is empty".into()));
    }

    let lowered = raw.to_ascii_lowercase();
    let is_absolute = lowered.starts_with("http://") || lowered.starts_with("https://");

    let mut url = match base {
        Some(base) if !is_absolute => {
            let base = Url::parse(base.trim())
                .map_err(|e| AppError::ValidationError(format!("invalid base URL '{base}': {e}")))?;
            base.join(raw)
                .map_err(|e| AppError::ValidationError(format!("cannot resolve '{raw}': {e}")))?
        }
        _ => Url::parse(raw)
            .map_err(|e| AppError::ValidationError(format!("invalid URL '{raw}': {e}")))?,
    };

    if let Some(host) = url.host_str().map(str::to_owned) {
        let lowered = host.to_lowercase();
        if lowered != host {
            url.set_host(Some(&lowered))
                .map_err(|e| AppError::ValidationError(format!("invalid host '{host}': {e}")))?;
        }
    }

    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed = match url.path().trim_end_matches('/') {
            "" => "/".to_string(),
            rest => rest.to_string(),
        };
        url.set_path(&trimmed);
    }

    url.set_fragment(None);

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_key_lowercases_host() {
        let key = DomainKey::from_url("https://Jobs.Example.COM/careers?x=1").unwrap();
        assert_eq!(key.as_str(), "jobs.example.com");
    }

    #[test]
    fn domain_key_keeps_non_default_port() {
        let key = DomainKey::from_url("http://example.com:8080/page").unwrap();
        assert_eq!(key.as_str(), "example.com:8080");

        let key = DomainKey::from_url("https://example.com:443/page").unwrap();
        assert_eq!(key.as_str(), "example.com");
    }

    #[test]
    fn domain_key_falls_back_to_raw_input() {
        let key = DomainKey::from_url("not-a-url").unwrap();
        assert_eq!(key.as_str(), "not-a-url");
    }

    #[test]
    fn domain_key_rejects_empty_input() {
        assert!(matches!(
            DomainKey::from_url("   "),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn normalize_strips_trailing_slash_and_fragment() {
        assert_eq!(
            normalize_url("http://Ex.com/a/#apply", None).unwrap(),
            "http://ex.com/a"
        );
        assert_eq!(
            normalize_url("http://ex.com/a", None).unwrap(),
            "http://ex.com/a"
        );
    }

    #[test]
    fn normalize_keeps_root_path() {
        assert_eq!(normalize_url("https://ex.com/", None).unwrap(), "https://ex.com/");
        assert_eq!(normalize_url("https://ex.com", None).unwrap(), "https://ex.com/");
    }

    #[test]
    fn normalize_resolves_relative_paths() {
        let base = "https://acme.com/careers/";
        assert_eq!(
            normalize_url("/jobs/123/", Some(base)).unwrap(),
            "https://acme.com/jobs/123"
        );
        assert_eq!(
            normalize_url("swe-42", Some(base)).unwrap(),
            "https://acme.com/careers/swe-42"
        );
    }

    #[test]
    fn normalize_ignores_base_for_absolute_urls() {
        assert_eq!(
            normalize_url(
                "https://boards.greenhouse.io/acme/jobs/456",
                Some("https://acme.com/careers")
            )
            .unwrap(),
            "https://boards.greenhouse.io/acme/jobs/456"
        );
    }

    #[test]
    fn normalize_keeps_query_string() {
        assert_eq!(
            normalize_url("https://ex.com/jobs/?id=7", None).unwrap(),
            "https://ex.com/jobs?id=7"
        );
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(
            normalize_url("", None),
            Err(AppError::ValidationError(_))
        ));
        assert!(matches!(
            normalize_url("/relative/without/base", None),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn normalize_lowercases_host_for_any_scheme() {
        assert_eq!(
            normalize_url("HTTPS://Jobs.ACME.com/Careers/", None).unwrap(),
            "https://jobs.acme.com/Careers"
        );
        assert_eq!(
            normalize_url("feed://Board.Example.COM/a/", None).unwrap(),
            "feed://board.example.com/a"
        );
    }
}
