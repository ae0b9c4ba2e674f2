//! Legacy "fantacrypt" obfuscation used by old clients.
//!
//! Ciphertext is a string of upper-case hex byte pairs. Each byte is XORed
//! with the high byte of a rolling 16-bit key, and the key then advances by
//! `(cipher_byte + key) * CRYPT_CONST_1 + CRYPT_CONST_2`.

const CRYPT_CONST_1: u16 = 53761;
const CRYPT_CONST_2: u16 = 32618;
const CRYPT_KEY: u16 = 5;

/// Value sent to every client right after accepting the connection
/// (`decryptor#34#%`). Clients wait for it before negotiating.
pub const DECRYPTOR_KEY: u32 = 34;

fn next_key(key: u16, byte: u8) -> u16 {
    (byte as u16)
        .wrapping_add(key)
        .wrapping_mul(CRYPT_CONST_1)
        .wrapping_add(CRYPT_CONST_2)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decrypt a hex ciphertext.
///
/// Never fails: a pair that is not valid hex, or a dangling odd character,
/// is copied through as-is and does not advance the key. Whatever comes out
/// is left for the validator to reject.
pub fn decrypt(data: &str) -> String {
    let bytes = data.as_bytes();
    let mut key = CRYPT_KEY;
    let mut out = String::with_capacity(bytes.len() / 2);
    let mut chunks = bytes.chunks(2);

    while let Some(pair) = chunks.next() {
        match pair {
            [hi, lo] => match (hex_value(*hi), hex_value(*lo)) {
                (Some(h), Some(l)) => {
                    let byte = (h << 4) | l;
                    out.push(char::from(byte ^ (key >> 8) as u8));
                    key = next_key(key, byte);
                }
                _ => {
                    out.push(char::from(*hi));
                    out.push(char::from(*lo));
                }
            },
            [single] => out.push(char::from(*single)),
            _ => {}
        }
    }
    out
}

/// Encrypt a string the way old clients do. Characters above U+00FF cannot be
/// represented and are replaced with `?`.
pub fn encrypt(data: &str) -> String {
    let mut key = CRYPT_KEY;
    let mut out = String::with_capacity(data.len() * 2);
    for c in data.chars() {
        let plain = u8::try_from(u32::from(c)).unwrap_or(b'?');
        let byte = plain ^ (key >> 8) as u8;
        out.push_str(&format!("{byte:02X}"));
        key = next_key(key, byte);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypts_known_client_payload() {
        assert_eq!(decrypt("615810BC07D12A5A"), "askchar2");
    }

    #[test]
    fn encrypt_matches_known_payload() {
        assert_eq!(encrypt("askchar2"), "615810BC07D12A5A");
    }

    #[test]
    fn roundtrip_printable_ascii() {
        let plain: String = (0x20u8..0x7F).map(char::from).collect();
        assert_eq!(decrypt(&encrypt(&plain)), plain);
        assert_eq!(decrypt(&encrypt("HI")), "HI");
    }

    #[test]
    fn lowercase_hex_is_accepted() {
        assert_eq!(decrypt("615810bc07d12a5a"), "askchar2");
    }

    #[test]
    fn garbage_degrades_without_panicking() {
        assert_eq!(decrypt("zz"), "zz");
        assert_eq!(decrypt("61z"), "az");
        assert_eq!(decrypt(""), "");
    }
}
