//! HMAC-SHA256 (RFC 2104 / FIPS 198-1), built on [`super::sha256`].

use super::sha256;

const BLOCK_SIZE: usize = 64;

fn block_key(key: &[u8]) -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    if key.len() > BLOCK_SIZE {
        let digest = sha256::hash(key);
        block[..sha256::DIGEST_LEN].copy_from_slice(&digest);
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    block
}

/// Compute HMAC-SHA256(key, message).
pub fn hmac(key: &[u8], message: &[u8]) -> [u8; sha256::DIGEST_LEN] {
    let key_block = block_key(key);

    let mut ipad = [0u8; BLOCK_SIZE];
    let mut opad = [0u8; BLOCK_SIZE];
    for i in 0..BLOCK_SIZE {
        ipad[i] = key_block[i] ^ 0x36;
        opad[i] = key_block[i] ^ 0x5c;
    }

    let mut inner_input = alloc::vec::Vec::with_capacity(BLOCK_SIZE + message.len());
    inner_input.extend_from_slice(&ipad);
    inner_input.extend_from_slice(message);
    let inner_digest = sha256::hash(&inner_input);

    let mut outer_input = alloc::vec::Vec::with_capacity(BLOCK_SIZE + sha256::DIGEST_LEN);
    outer_input.extend_from_slice(&opad);
    outer_input.extend_from_slice(&inner_digest);
    sha256::hash(&outer_input)
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> alloc::string::String {
        use alloc::string::String;
        use core::fmt::Write;
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }

    #[test]
    fn rfc4231_test_case_1() {
        let key = [0x0bu8; 20];
        let data = b"Hi There";
        let mac = hmac(&key, data);
        assert_eq!(
            hex(&mac),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff"
        );
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(hmac(b"key", b"message"), hmac(b"key", b"message"));
    }

    #[test]
    fn different_keys_produce_different_macs() {
        assert_ne!(hmac(b"key1", b"message"), hmac(b"key2", b"message"));
    }
}
