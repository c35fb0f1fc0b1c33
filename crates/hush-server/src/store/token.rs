use rand::RngCore;

/// Generate a public redemption token: 16 bytes from the OS CSPRNG,
/// lowercase hex (32 chars, 128 bits of entropy). Guessing is
/// infeasible; uniqueness is still enforced by the store at insert.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a short internal record id.
pub fn generate_secret_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_32_hex_chars() {
        let t = generate_token();
        assert_eq!(t.len(), 32);
        assert!(t.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
    }

    #[test]
    fn id_is_16_hex_chars() {
        assert_eq!(generate_secret_id().len(), 16);
    }
}
