use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn compute_hmac_signature_hex(secret: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|error| anyhow!("invalid HMAC secret: {}", error))?;
    mac.update(payload);
    let digest = mac.finalize().into_bytes();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", byte);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_stable_and_hex() {
        let a = compute_hmac_signature_hex(b"secret", b"payload").expect("sign");
        let b = compute_hmac_signature_hex(b"secret", b"payload").expect("sign");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_secret() {
        let a = compute_hmac_signature_hex(b"secret-a", b"payload").expect("sign");
        let b = compute_hmac_signature_hex(b"secret-b", b"payload").expect("sign");
        assert_ne!(a, b);
    }
}
