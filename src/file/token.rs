//! Download token generation.

use rand::Rng;

use super::TOKEN_LENGTH;

/// Alphabet used for download tokens. URL-safe, no escaping needed.
const TOKEN_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a fresh download token.
///
/// 43 characters over a 62-symbol alphabet gives over 255 bits of entropy,
/// drawn from the OS-seeded CSPRNG. Uniqueness is additionally enforced by
/// the UNIQUE constraint on the token column.
pub fn download_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..TOKEN_CHARS.len());
            TOKEN_CHARS[idx] as char
        })
        .collect()
}

/// Render the public download link for a token.
///
/// Called by the messenger front end when it announces a registered file:
/// it reads the serving domain from [`SETTING_DOWNLOAD_DOMAIN`] and hands
/// the resulting link to the user. The engine itself resolves raw tokens
/// and never parses these URLs back.
///
/// [`SETTING_DOWNLOAD_DOMAIN`]: crate::db::SETTING_DOWNLOAD_DOMAIN
pub fn download_url(domain: &str, token: &str) -> String {
    format!("https://{}/d/{}", domain.trim_end_matches('/'), token)
}

/// Short, safe-to-log prefix of a token.
///
/// Full tokens never appear in logs; eight characters is enough to
/// correlate entries without making the log a credential store.
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    &token[..end]
}
