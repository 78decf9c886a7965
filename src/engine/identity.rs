use rand::rngs::OsRng;
use rand::{CryptoRng, Rng, RngCore};
use subtle::ConstantTimeEq;

use crate::models::delivery::ProofPin;

const TRACKING_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TRACKING_PREFIX: &str = "DLV";
const TRACKING_GROUP_LEN: usize = 5;

/// Source of tracking codes and delivery PINs.
pub trait IdentityMinter: Send + Sync {
    fn tracking_code(&self) -> String;
    fn proof_pin(&self) -> ProofPin;
}

/// Production minter backed by the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngMinter;

impl IdentityMinter for OsRngMinter {
    fn tracking_code(&self) -> String {
        mint_tracking_code()
    }

    fn proof_pin(&self) -> ProofPin {
        mint_proof_pin()
    }
}

/// `DLV-XXXXX-XXXXX` drawn from the OS CSPRNG.
pub fn mint_tracking_code() -> String {
    mint_tracking_code_with(&mut OsRng)
}

pub fn mint_tracking_code_with<R: RngCore + CryptoRng>(rng: &mut R) -> String {
    let mut group = || -> String {
        (0..TRACKING_GROUP_LEN)
            .map(|_| TRACKING_ALPHABET[rng.gen_range(0..TRACKING_ALPHABET.len())] as char)
            .collect()
    };
    let first = group();
    let second = group();
    format!("{TRACKING_PREFIX}-{first}-{second}")
}

pub fn mint_proof_pin() -> ProofPin {
    mint_proof_pin_with(&mut OsRng)
}

pub fn mint_proof_pin_with<R: RngCore + CryptoRng>(rng: &mut R) -> ProofPin {
    ProofPin::new(format!("{:04}", rng.gen_range(0..10_000u32)))
}

/// Matches `^DLV-[A-Z0-9]{5}-[A-Z0-9]{5}$`.
pub fn is_valid_tracking_code(code: &str) -> bool {
    let mut parts = code.split('-');
    let well_formed_group = |part: Option<&str>| {
        part.is_some_and(|group| {
            group.len() == TRACKING_GROUP_LEN
                && group
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        })
    };

    parts.next() == Some(TRACKING_PREFIX)
        && well_formed_group(parts.next())
        && well_formed_group(parts.next())
        && parts.next().is_none()
}

/// Constant-time PIN check. PINs have a fixed public length, so only the
/// digits need protecting; `ct_eq` is false for slices of unequal length.
pub fn verify_pin(stored: &ProofPin, provided: &str) -> bool {
    provided.as_bytes().ct_eq(stored.expose().as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{is_valid_tracking_code, mint_proof_pin, mint_tracking_code, verify_pin};
    use crate::models::delivery::ProofPin;

    #[test]
    fn minted_codes_match_the_wire_format() {
        for _ in 0..200 {
            let code = mint_tracking_code();
            assert!(is_valid_tracking_code(&code), "{code}");
        }
    }

    #[test]
    fn minted_codes_do_not_repeat_in_practice() {
        let codes: HashSet<String> = (0..1_000).map(|_| mint_tracking_code()).collect();
        assert_eq!(codes.len(), 1_000);
    }

    #[test]
    fn tracking_code_validation_rejects_near_misses() {
        assert!(is_valid_tracking_code("DLV-AB12C-9XYZ0"));
        assert!(!is_valid_tracking_code("DLV-ab12c-9XYZ0"));
        assert!(!is_valid_tracking_code("DLV-AB12C-9XYZ"));
        assert!(!is_valid_tracking_code("DLX-AB12C-9XYZ0"));
        assert!(!is_valid_tracking_code("DLV-AB12C-9XYZ0-"));
        assert!(!is_valid_tracking_code("DLV-AB_2C-9XYZ0"));
    }

    #[test]
    fn pins_are_four_digits() {
        for _ in 0..200 {
            let pin = mint_proof_pin();
            assert_eq!(pin.expose().len(), 4);
            assert!(pin.expose().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn pin_verification() {
        let pin = ProofPin::new("0042".to_string());
        assert!(verify_pin(&pin, "0042"));
        assert!(!verify_pin(&pin, "42"));
        assert!(!verify_pin(&pin, "0043"));
        assert!(!verify_pin(&pin, ""));
        assert!(!verify_pin(&pin, "00420"));
        assert!(!verify_pin(&pin, "0042 "));
    }
}
