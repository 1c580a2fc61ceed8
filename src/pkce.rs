use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Verifier, challenge, and state for one authorization request.
///
/// The state is generated independently of the verifier: it binds the
/// callback to this browser (CSRF), nothing more, so knowing one must not
/// reveal anything about the other.
#[derive(Debug)]
#[non_exhaustive]
pub struct PkceTriple {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

/// Generates the full PKCE triple for a new login attempt.
#[must_use]
pub fn generate() -> PkceTriple {
    let verifier = generate_code_verifier();
    let challenge = generate_code_challenge(&verifier);
    let state = generate_state();
    PkceTriple {
        verifier,
        challenge,
        state,
    }
}

/// Generates a cryptographically random code verifier.
///
/// 48 random bytes encode to a 64-character URL-safe string, inside the
/// RFC 7636 bounds of 43-128 characters from the unreserved set.
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the S256 code challenge for a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates the random `state` parameter binding the callback to this login.
///
/// 32 random bytes (256 bits), so a guessed state is as hard as a guessed
/// session identifier.
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_length_within_rfc_bounds() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
        assert!((43..=128).contains(&verifier.len()));
    }

    #[test]
    fn verifier_uses_unreserved_characters() {
        let verifier = generate_code_verifier();
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {verifier}"
        );
    }

    #[test]
    fn challenge_matches_rfc_7636_vector() {
        // RFC 7636 appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_code_verifier();
        assert_eq!(
            generate_code_challenge(&verifier),
            generate_code_challenge(&verifier)
        );
    }

    #[test]
    fn challenge_has_no_padding() {
        let triple = generate();
        assert!(!triple.challenge.contains('='));
    }

    #[test]
    fn state_independent_of_verifier() {
        let triple = generate();
        assert_ne!(triple.state, triple.verifier);
        assert_ne!(triple.state, triple.challenge);
    }

    #[test]
    fn triples_unique_per_call() {
        let a = generate();
        let b = generate();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.state, b.state);
    }
}
