//! Boundary validation: source URLs and output filenames.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{CoreError, Result};

/// Maximum filename length accepted (Linux NAME_MAX).
const NAME_MAX: usize = 255;

/// Validate a submitted source URL: non-empty, http(s), and hosted on one
/// of the allowed source domains (exact match or subdomain).
pub fn validate_source_url(raw: &str, allowed_hosts: &[String]) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CoreError::Validation("URL is required".to_string()));
    }

    let url = Url::parse(raw)
        .map_err(|_| CoreError::Validation(format!("Invalid URL: {raw}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::Validation(format!(
            "Unsupported URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| CoreError::Validation("URL has no host".to_string()))?;

    let allowed = allowed_hosts.iter().any(|allowed| {
        host == allowed || host.ends_with(&format!(".{allowed}"))
    });
    if !allowed {
        return Err(CoreError::Validation(format!(
            "URL host {host} is not a supported source"
        )));
    }

    Ok(url)
}

/// Resolve a client-supplied filename inside the download directory,
/// rejecting anything that could escape it (separators, traversal,
/// control characters).
pub fn safe_output_path(download_dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(CoreError::Validation("Invalid filename".to_string()));
    }

    let has_separator = name.contains(['/', '\\']);
    let has_control = name.chars().any(|c| c.is_control());
    if has_separator || has_control || name == "." || name == ".." {
        return Err(CoreError::Validation(format!("Unsafe filename: {name}")));
    }

    Ok(download_dir.join(name))
}
