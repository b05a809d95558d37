use aes_gcm::aead::consts::U16;
use aes_gcm::aead::Aead;
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

// AES-256-GCM with a 16-byte IV. The ciphertext wire format is a fixed
// external contract consumed by other stacks, so the IV width and the
// hex(iv):hex(tag):hex(ct) layout must not change.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;
const TAG_LENGTH: usize = 16;

/// Errors produced by the secret cipher.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failure")]
    EncryptFailure,
    #[error("ciphertext corrupt")]
    Corrupt,
}

/// Process-wide cipher over the master passphrase.
///
/// The key is the SHA-256 digest of the passphrase, derived once at startup
/// and shared immutably across threads. Key rotation is a non-goal.
#[derive(Clone)]
pub struct SecretCipher(Zeroizing<[u8; KEY_LENGTH]>);

impl SecretCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&digest);
        Self(Zeroizing::new(key))
    }

    /// Encrypt a payload, returning `hex(iv):hex(tag):hex(ciphertext)`.
    ///
    /// Every call draws a fresh random IV.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let cipher =
            Aes256Gcm16::new_from_slice(&*self.0).map_err(|_| CipherError::EncryptFailure)?;
        let mut iv = [0u8; IV_LENGTH];
        OsRng.fill_bytes(&mut iv);
        let sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
            .map_err(|_| CipherError::EncryptFailure)?;
        let boundary = sealed.len() - TAG_LENGTH;
        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(&sealed[boundary..]),
            hex::encode(&sealed[..boundary])
        ))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Any structural mismatch (wrong field count, bad hex, wrong IV or tag
    /// width) and any authentication failure map to [`CipherError::Corrupt`].
    pub fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>, CipherError> {
        let mut fields = ciphertext.split(':');
        let (iv_hex, tag_hex, ct_hex) = match (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) {
            (Some(iv), Some(tag), Some(ct), None) => (iv, tag, ct),
            _ => return Err(CipherError::Corrupt),
        };

        let iv = hex::decode(iv_hex).map_err(|_| CipherError::Corrupt)?;
        let tag = hex::decode(tag_hex).map_err(|_| CipherError::Corrupt)?;
        let body = hex::decode(ct_hex).map_err(|_| CipherError::Corrupt)?;
        if iv.len() != IV_LENGTH || tag.len() != TAG_LENGTH {
            return Err(CipherError::Corrupt);
        }

        let cipher = Aes256Gcm16::new_from_slice(&*self.0).map_err(|_| CipherError::Corrupt)?;
        let mut sealed = body;
        sealed.extend_from_slice(&tag);
        cipher
            .decrypt(Nonce::<U16>::from_slice(&iv), sealed.as_slice())
            .map_err(|_| CipherError::Corrupt)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher")
            .field("key", &"***redacted***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::from_passphrase("correct horse battery staple")
    }

    #[test]
    fn round_trip() {
        let cipher = cipher();
        let plaintext = b"sensitive-data";
        let sealed = cipher.encrypt(plaintext).expect("encrypt");
        let opened = cipher.decrypt(&sealed).expect("decrypt");
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn round_trip_large_payload() {
        let cipher = cipher();
        let plaintext = vec![0xa5u8; 1 << 20];
        let sealed = cipher.encrypt(&plaintext).expect("encrypt");
        assert_eq!(cipher.decrypt(&sealed).expect("decrypt"), plaintext);
    }

    #[test]
    fn wire_format_has_three_hex_fields() {
        let sealed = cipher().encrypt(b"x").expect("encrypt");
        let fields: Vec<&str> = sealed.split(':').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].len(), IV_LENGTH * 2);
        assert_eq!(fields[1].len(), TAG_LENGTH * 2);
        assert!(fields
            .iter()
            .all(|field| field.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn ivs_are_unique_across_calls() {
        let cipher = cipher();
        let a = cipher.encrypt(b"same input").expect("encrypt");
        let b = cipher.encrypt(b"same input").expect("encrypt");
        assert_ne!(a, b);
        assert_ne!(a.split(':').next().unwrap(), b.split(':').next().unwrap());
    }

    #[test]
    fn flipping_any_ciphertext_nibble_fails() {
        let cipher = cipher();
        let sealed = cipher.encrypt(b"payload under test").expect("encrypt");
        for (index, original) in sealed.char_indices() {
            if original == ':' {
                continue;
            }
            let flipped = if original == '0' { '1' } else { '0' };
            let mut mutated = sealed.clone();
            mutated.replace_range(index..index + 1, &flipped.to_string());
            assert!(
                matches!(cipher.decrypt(&mutated), Err(CipherError::Corrupt)),
                "mutation at offset {index} was accepted"
            );
        }
    }

    #[test]
    fn structural_garbage_is_corrupt() {
        let cipher = cipher();
        for input in [
            "",
            "deadbeef",
            "aa:bb",
            "aa:bb:cc:dd",
            "zz:zz:zz",
            "00112233445566778899aabbccddeeff:00112233445566778899aabbccddeeff",
        ] {
            assert!(matches!(cipher.decrypt(input), Err(CipherError::Corrupt)));
        }
    }

    #[test]
    fn wrong_passphrase_cannot_decrypt() {
        let sealed = cipher().encrypt(b"secret").expect("encrypt");
        let other = SecretCipher::from_passphrase("a different passphrase");
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Corrupt)));
    }

    #[test]
    fn debug_redacts_key_material() {
        let rendered = format!("{:?}", cipher());
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("correct horse"));
    }
}
