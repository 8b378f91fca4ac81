//! Short-identifier alphabet and encoding.
//!
//! Identifiers are exactly [`ID_LENGTH`] characters over a 64-symbol
//! alphabet (`a-z`, `A-Z`, `0-9`, `-`, `_`), giving an ID space of 64^8.
//! Encoding is plain base-64 positional: the leading symbol `a` is the zero
//! digit, so short numbers come out left-padded with `a`. Identifiers are
//! stored literally; nothing in the runtime path ever decodes one.

use rand::Rng;

/// Length of every generated identifier.
pub const ID_LENGTH: usize = 8;

/// The 64-symbol identifier alphabet, in digit order.
pub const ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Cardinality of the identifier space: 64^8 = 2^48.
pub const ID_SPACE: u64 = 1 << 48;

/// Encodes `n` as an [`ID_LENGTH`]-character identifier.
///
/// Digits are emitted least-significant first into a fixed-width buffer, so
/// the result is left-padded with the zero digit `a`. Values are taken modulo
/// the ID space; callers draw from `[0, ID_SPACE)`.
pub fn encode_id(mut n: u64) -> String {
    let mut buf = [ALPHABET[0]; ID_LENGTH];
    let mut pos = ID_LENGTH;
    loop {
        pos -= 1;
        buf[pos] = ALPHABET[(n % 64) as usize];
        n /= 64;
        if n == 0 || pos == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Draws a uniform identifier from the full ID space.
pub fn random_id() -> String {
    encode_id(rand::rng().random_range(0..ID_SPACE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Inverse of `encode_id`, for round-trip checks only.
    fn decode_id(id: &str) -> u64 {
        id.bytes().fold(0u64, |acc, b| {
            let digit = ALPHABET.iter().position(|&c| c == b).unwrap() as u64;
            acc * 64 + digit
        })
    }

    #[test]
    fn zero_encodes_as_all_a() {
        assert_eq!(encode_id(0), "aaaaaaaa");
    }

    #[test]
    fn small_values_are_left_padded() {
        assert_eq!(encode_id(1), "aaaaaaab");
        assert_eq!(encode_id(63), "aaaaaaa_");
        assert_eq!(encode_id(64), "aaaaaaba");
    }

    #[test]
    fn max_value_uses_every_position() {
        assert_eq!(encode_id(ID_SPACE - 1), "________");
    }

    #[test]
    fn encode_decode_round_trips() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..10_000 {
            let n = rng.random_range(0..ID_SPACE);
            assert_eq!(decode_id(&encode_id(n)), n);
        }
    }

    #[test]
    fn random_ids_have_the_right_shape() {
        for _ in 0..1_000 {
            let id = random_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(id.bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn alphabet_has_no_duplicates() {
        for (i, a) in ALPHABET.iter().enumerate() {
            for b in &ALPHABET[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
