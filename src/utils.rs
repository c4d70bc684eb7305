use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{BotError, Result};

// For signature verification
use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_256_HEADER: &str = "X-Hub-Signature-256";
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Helper function for verifying GitHub webhook signature
///
/// `signature_header` is expected in the form `sha256=<hex>`.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(git_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    verify_hex(mac, git_signature)
}

/// Legacy `sha1=<hex>` variant, only used when GitHub sends no SHA-256 header.
pub fn verify_github_signature_sha1(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(git_signature) = signature_header.strip_prefix("sha1=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    verify_hex(mac, git_signature)
}

fn verify_hex<M: Mac>(mac: M, git_signature: &str) -> bool {
    // GitHub provides the signature as hex
    match hex_decode(git_signature) {
        // Constant-time comparison
        Ok(git_signature_bytes) => mac.verify_slice(&git_signature_bytes).is_ok(),
        Err(_) => {
            debug!("Signature is not valid hex");
            false
        }
    }
}

/// Checks the request against the shared secret, preferring SHA-256 over SHA-1.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    sha256_header: Option<&str>,
    sha1_header: Option<&str>,
) -> Result<()> {
    let valid = match (sha256_header, sha1_header) {
        (Some(signature), _) => verify_github_signature(secret, payload, signature),
        (None, Some(signature)) => verify_github_signature_sha1(secret, payload, signature),
        (None, None) => return Err(BotError::MissingSignature),
    };
    if valid {
        Ok(())
    } else {
        Err(BotError::InvalidSignature)
    }
}

/// Whether an RFC 8288 `Link` header announces a following page.
pub fn has_next_page(link_header: Option<&str>) -> bool {
    link_header
        .map(|link| {
            link.split(',')
                .any(|relation| relation.contains("rel=\"next\""))
        })
        .unwrap_or(false)
}

static TEMPLATE_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    match Regex::new(r"\$\{([A-Za-z0-9_]+)\}|\$([A-Za-z0-9]+)") {
        Ok(regex) => regex,
        Err(e) => panic!("invalid template pattern: {e}"),
    }
});

/// Expands `$VAR` and `${VAR}` references; unknown variables are left untouched.
pub fn template(template_string: &str, mapping: &HashMap<&str, String>) -> String {
    TEMPLATE_VAR_RE
        .replace_all(template_string, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|name| name.as_str())
                .unwrap_or_default();
            match mapping.get(name) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Cuts `text` down to `max_chars` characters for log and error output.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
