//! SQL Server login password obfuscation.

/// Scramble a password for the LOGIN7 password field.
///
/// The password is encoded as UTF-16LE and each byte has its nibbles
/// swapped and is then XORed with `0xA5`. This is obfuscation, not
/// encryption; the login packet itself is always sent over TLS unless
/// encryption is disabled entirely.
#[must_use]
pub fn scramble_password(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .map(|b| b.rotate_left(4) ^ 0xA5)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bytes() {
        // 'a' = 0x61 0x00: swap -> 0x16 0x00, xor -> 0xB3 0xA5
        assert_eq!(scramble_password("a"), vec![0xB3, 0xA5]);
        assert_eq!(scramble_password(""), Vec::<u8>::new());
    }

    #[test]
    fn test_length_follows_utf16() {
        assert_eq!(scramble_password("test").len(), 8);
        // one surrogate pair
        assert_eq!(scramble_password("🦀").len(), 4);
    }

    #[test]
    fn test_reversible() {
        let unscramble = |b: u8| (b ^ 0xA5).rotate_right(4);
        let bytes: Vec<u8> = scramble_password("Pässwörd")
            .into_iter()
            .map(unscramble)
            .collect();
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(String::from_utf16(&units).ok().as_deref(), Some("Pässwörd"));
    }
}
