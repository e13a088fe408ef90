use reqwest::Url;
use semver::Version;

use crate::error::UpgradeError;

pub fn broker_name(name: &str) -> Result<(), UpgradeError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(UpgradeError::InvalidInput("invalid broker name format".to_string()))
    }
}

pub fn batch_size(size: usize) -> Result<(), UpgradeError> {
    if size == 0 {
        return Err(UpgradeError::InvalidInput(
            "batch size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub fn token(token: &str) -> Result<(), UpgradeError> {
    if token.trim().is_empty() {
        return Err(UpgradeError::InvalidInput(
            "you must authenticate before running this command; supply an access token".to_string(),
        ));
    }
    Ok(())
}

/// Oldest platform API that reports `upgrade_available` on instances.
pub const MIN_API_VERSION: Version = Version::new(3, 99, 0);

pub fn api_version(raw: &str) -> Result<(), UpgradeError> {
    let version = Version::parse(raw.trim()).map_err(|e| {
        UpgradeError::InvalidInput(format!("error parsing api version {raw:?}: {e}"))
    })?;
    if version < MIN_API_VERSION {
        return Err(UpgradeError::InvalidInput(format!(
            "plugin requires CF API version >= {MIN_API_VERSION}"
        )));
    }
    Ok(())
}

pub fn api_url(url: &str) -> Result<(), UpgradeError> {
    let parsed = Url::parse(url)
        .map_err(|e| UpgradeError::InvalidInput(format!("invalid API URL {url:?}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(UpgradeError::InvalidInput(format!(
            "invalid API URL {url:?}: unsupported scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_names() {
        for ok in ["csb", "my-broker_2", "ABC"] {
            assert!(broker_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "has space", "semi;colon", "slash/", "ünïcode"] {
            assert!(broker_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn zero_batch_size_rejected() {
        assert!(batch_size(0).is_err());
        assert!(batch_size(1).is_ok());
    }

    #[test]
    fn blank_token_rejected() {
        assert!(token("  ").is_err());
        assert!(token("bearer abc").is_ok());
    }

    #[test]
    fn api_versions() {
        assert!(api_version("3.99.0").is_ok());
        assert!(api_version("3.181.0").is_ok());
        let err = api_version("3.98.9").unwrap_err();
        assert_eq!(err.to_string(), "plugin requires CF API version >= 3.99.0");
        assert!(api_version("2.0.0").is_err());
        assert!(api_version("not-a-version").is_err());
    }

    #[test]
    fn api_urls() {
        assert!(api_url("https://api.example.com").is_ok());
        assert!(api_url("http://127.0.0.1:8080").is_ok());
        assert!(api_url("ftp://example.com").is_err());
        assert!(api_url("not a url").is_err());
    }
}
