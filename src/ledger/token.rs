//! Short, human-typable undo tokens.

use rand::Rng;

/// Token alphabet: uppercase letters and digits without `0`, `O`, `1`, `I`.
pub const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const TOKEN_LEN: usize = 8;

/// Generate a token from the thread-local RNG.
pub fn generate_token() -> String {
    generate_token_with(&mut rand::thread_rng())
}

pub fn generate_token_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..TOKEN_LEN)
        .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

/// Canonical form used for lookups: trimmed and uppercased.
pub fn normalize_token(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
