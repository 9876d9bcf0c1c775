pub mod password;

pub use password::{HashCost, Password, PasswordHasher};

use rand::Rng;

/// 32 random bytes, hex encoded. Used for confirmation and refresh ids.
pub fn generate_random_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_are_64_hex_chars_and_distinct() {
        let a = generate_random_token();
        let b = generate_random_token();

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
