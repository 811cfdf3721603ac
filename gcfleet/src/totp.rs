// gcfleet/src/totp.rs
//
// Steam Guard two-factor code generation — RFC 6238 TOTP over HMAC-SHA1,
// with Steam's own base32 secret alphabet and 30s step. Device registration
// and confirmation flows for the Mobile Authenticator live outside this
// crate; this is just the pure `secret -> code` function a login needs.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::FleetError;

type HmacSha1 = Hmac<Sha1>;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 5; // Steam Guard codes are 5 alphanumeric characters
const STEAM_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";

/// Derive the current Steam Guard code from a base32-encoded TOTP seed.
///
/// `secret` is the long-lived shared secret (`shared_secret` in Steam's own
/// terms); `unix_time` is the current time in seconds, passed in rather than
/// read internally so the function stays pure and testable.
pub fn totp(secret: &str, unix_time: u64) -> Result<String, FleetError> {
    let key = base32::decode(base32::Alphabet::Rfc4648 { padding: false }, secret)
        .ok_or_else(|| FleetError::AuthInvalid("malformed TOTP secret".into()))?;

    let counter = unix_time / STEP_SECONDS;
    let mut mac = HmacSha1::new_from_slice(&key)
        .map_err(|e| FleetError::AuthInvalid(format!("bad TOTP key: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let truncated = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let mut code_val = truncated;
    let mut chars = Vec::with_capacity(DIGITS as usize);
    for _ in 0..DIGITS {
        let idx = (code_val as usize) % STEAM_ALPHABET.len();
        chars.push(STEAM_ALPHABET[idx]);
        code_val /= STEAM_ALPHABET.len() as u32;
    }
    Ok(String::from_utf8(chars).expect("alphabet is ASCII"))
}

/// A supplied `auth_secret` of length ≤ 5 is treated as a direct one-time
/// code (already typed by a human); anything longer is a TOTP seed the bot
/// derives a fresh code from.
pub fn resolve_auth_code(auth_secret: &str, unix_time: u64) -> Result<String, FleetError> {
    if auth_secret.len() <= 5 {
        Ok(auth_secret.to_string())
    } else {
        totp(auth_secret, unix_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_fixed_time() {
        let a = totp("JBSWY3DPEHPK3PXP", 1_700_000_000).unwrap();
        let b = totp("JBSWY3DPEHPK3PXP", 1_700_000_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn changes_across_step_boundary() {
        let a = totp("JBSWY3DPEHPK3PXP", 1_700_000_000).unwrap();
        let b = totp("JBSWY3DPEHPK3PXP", 1_700_000_031).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_malformed_secret() {
        assert!(totp("not base32!!", 0).is_err());
    }

    #[test]
    fn short_secret_passes_through_as_direct_code() {
        assert_eq!(resolve_auth_code("AB12", 0).unwrap(), "AB12");
    }

    #[test]
    fn long_secret_is_derived() {
        let code = resolve_auth_code("JBSWY3DPEHPK3PXP", 1_700_000_000).unwrap();
        assert_eq!(code.len(), 5);
    }
}
