//! WSC registrar cryptography
//!
//! Diffie-Hellman over the 1536-bit MODP group, the WSC key derivation function,
//! the key-wrap authenticator, AES-128-CBC encrypted settings and the message
//! authenticator.

use aes::Aes128;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use num_bigint::BigUint;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::errors::CryptographicError;
use crate::types::MacAddress;

type HmacSha256 = Hmac<Sha256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Size of a DH group 5 public key
pub const DH_KEY_LEN: usize = 192;
pub const NONCE_LEN: usize = 16;
pub const AES_BLOCK_LEN: usize = 16;
/// Truncated HMAC length of the KWA and the authenticator
pub const AUTHENTICATOR_LEN: usize = 8;

const KDF_PERSONALIZATION: &[u8] = b"Wi-Fi Easy and Secure Key Derivation";
const KDF_TOTAL_BITS: u32 = 640;

const DH_GROUP5_PRIME: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA237327FFFFFFFFFFFFFFFF",
);
const DH_GROUP5_GENERATOR: u32 = 2;

fn group5_prime() -> Result<BigUint, CryptographicError> {
    BigUint::parse_bytes(DH_GROUP5_PRIME.as_bytes(), 16)
        .ok_or(CryptographicError::KeyDerivationFailed)
}

fn pad_to_dh_len(value: &BigUint) -> Result<[u8; DH_KEY_LEN], CryptographicError> {
    let bytes = value.to_bytes_be();
    if bytes.len() > DH_KEY_LEN {
        return Err(CryptographicError::KeyDerivationFailed);
    }
    let mut out = [0u8; DH_KEY_LEN];
    out[DH_KEY_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

// ----------------------------------------------------------------------------
// Diffie-Hellman
// ----------------------------------------------------------------------------

/// Ephemeral DH group 5 key pair
pub struct DhKeyPair {
    private: BigUint,
    public: [u8; DH_KEY_LEN],
}

impl core::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("public", &hex::encode(&self.public[..8]))
            .finish_non_exhaustive()
    }
}

impl DhKeyPair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, CryptographicError> {
        let prime = group5_prime()?;
        let mut secret = [0u8; DH_KEY_LEN];
        rng.try_fill_bytes(&mut secret)
            .map_err(|_| CryptographicError::RandomGenerationFailed)?;
        let private = BigUint::from_bytes_be(&secret) % (&prime - 2u32) + 1u32;
        let public = BigUint::from(DH_GROUP5_GENERATOR).modpow(&private, &prime);
        Ok(Self {
            private,
            public: pad_to_dh_len(&public)?,
        })
    }

    pub fn public_key(&self) -> &[u8; DH_KEY_LEN] {
        &self.public
    }

    /// Shared secret `peer^private mod p`, left-padded to the group size
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<[u8; DH_KEY_LEN], CryptographicError> {
        let prime = group5_prime()?;
        let peer = BigUint::from_bytes_be(peer_public);
        let one = BigUint::from(1u32);
        if peer_public.len() > DH_KEY_LEN || peer <= one || peer >= &prime - 1u32 {
            return Err(CryptographicError::InvalidPublicKey);
        }
        pad_to_dh_len(&peer.modpow(&self.private, &prime))
    }
}

// ----------------------------------------------------------------------------
// Key Derivation
// ----------------------------------------------------------------------------

fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], CryptographicError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| CryptographicError::KeyDerivationFailed)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Session keys shared by registrar and enrollee
#[derive(Clone, PartialEq, Eq)]
pub struct WscKeys {
    pub auth_key: [u8; 32],
    pub key_wrap_key: [u8; 16],
    pub emsk: [u8; 32],
}

impl core::fmt::Debug for WscKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("WscKeys { .. }")
    }
}

impl WscKeys {
    /// Derive AuthKey, KeyWrapKey and EMSK from the DH shared secret
    pub fn derive(
        shared_secret: &[u8; DH_KEY_LEN],
        enrollee_nonce: &[u8; NONCE_LEN],
        enrollee_mac: &MacAddress,
        registrar_nonce: &[u8; NONCE_LEN],
    ) -> Result<Self, CryptographicError> {
        let dhkey: [u8; 32] = Sha256::digest(shared_secret).into();
        let kdk = hmac_sha256(
            &dhkey,
            &[&enrollee_nonce[..], &enrollee_mac.as_bytes()[..], &registrar_nonce[..]],
        )?;

        let mut stream = Vec::with_capacity(96);
        for i in 1u32..=3 {
            let block = hmac_sha256(
                &kdk,
                &[
                    &i.to_be_bytes()[..],
                    KDF_PERSONALIZATION,
                    &KDF_TOTAL_BITS.to_be_bytes()[..],
                ],
            )?;
            stream.extend_from_slice(&block);
        }

        let mut keys = WscKeys {
            auth_key: [0u8; 32],
            key_wrap_key: [0u8; 16],
            emsk: [0u8; 32],
        };
        keys.auth_key.copy_from_slice(&stream[0..32]);
        keys.key_wrap_key.copy_from_slice(&stream[32..48]);
        keys.emsk.copy_from_slice(&stream[48..80]);
        Ok(keys)
    }
}

/// First 64 bits of HMAC-SHA256(AuthKey, data)
pub fn key_wrap_authenticator(
    auth_key: &[u8; 32],
    data: &[u8],
) -> Result<[u8; AUTHENTICATOR_LEN], CryptographicError> {
    let full = hmac_sha256(auth_key, &[data])?;
    let mut kwa = [0u8; AUTHENTICATOR_LEN];
    kwa.copy_from_slice(&full[..AUTHENTICATOR_LEN]);
    Ok(kwa)
}

/// First 64 bits of HMAC-SHA256(AuthKey, M1 || M2*), M2* lacking its authenticator
pub fn compute_authenticator(
    auth_key: &[u8; 32],
    m1: &[u8],
    registrar_message: &[u8],
) -> Result<[u8; AUTHENTICATOR_LEN], CryptographicError> {
    let full = hmac_sha256(auth_key, &[m1, registrar_message])?;
    let mut out = [0u8; AUTHENTICATOR_LEN];
    out.copy_from_slice(&full[..AUTHENTICATOR_LEN]);
    Ok(out)
}

// ----------------------------------------------------------------------------
// Encrypted Settings
// ----------------------------------------------------------------------------

/// AES-128-CBC with a random IV; returns `IV || ciphertext`
pub fn encrypt_settings<R: RngCore + CryptoRng>(
    key_wrap_key: &[u8; 16],
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, CryptographicError> {
    let mut iv = [0u8; AES_BLOCK_LEN];
    rng.try_fill_bytes(&mut iv)
        .map_err(|_| CryptographicError::RandomGenerationFailed)?;
    let cipher = Aes128CbcEnc::new_from_slices(key_wrap_key, &iv)
        .map_err(|_| CryptographicError::EncryptionFailed)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(AES_BLOCK_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`encrypt_settings`]
pub fn decrypt_settings(
    key_wrap_key: &[u8; 16],
    data: &[u8],
) -> Result<Vec<u8>, CryptographicError> {
    if data.len() < 2 * AES_BLOCK_LEN || data.len() % AES_BLOCK_LEN != 0 {
        return Err(CryptographicError::DecryptionFailed);
    }
    let (iv, ciphertext) = data.split_at(AES_BLOCK_LEN);
    let cipher = Aes128CbcDec::new_from_slices(key_wrap_key, iv)
        .map_err(|_| CryptographicError::DecryptionFailed)?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptographicError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_dh_agreement() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let registrar = DhKeyPair::generate(&mut rng).unwrap();
        let enrollee = DhKeyPair::generate(&mut rng).unwrap();

        let a = registrar.shared_secret(enrollee.public_key()).unwrap();
        let b = enrollee.shared_secret(registrar.public_key()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_peer_key_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let pair = DhKeyPair::generate(&mut rng).unwrap();
        assert_eq!(
            pair.shared_secret(&[1u8]),
            Err(CryptographicError::InvalidPublicKey)
        );
        assert_eq!(
            pair.shared_secret(&[0xffu8; DH_KEY_LEN]),
            Err(CryptographicError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_kdf_is_deterministic() {
        let secret = [0x42u8; DH_KEY_LEN];
        let mac = MacAddress::new([1, 2, 3, 4, 5, 6]);
        let a = WscKeys::derive(&secret, &[1u8; 16], &mac, &[2u8; 16]).unwrap();
        let b = WscKeys::derive(&secret, &[1u8; 16], &mac, &[2u8; 16]).unwrap();
        let c = WscKeys::derive(&secret, &[1u8; 16], &mac, &[3u8; 16]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.auth_key, c.auth_key);
        assert_ne!(&a.auth_key[..16], &a.key_wrap_key[..]);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let key = [9u8; 16];
        let plaintext = b"config data that is not block aligned";
        let sealed = encrypt_settings(&key, plaintext, &mut rng).unwrap();
        assert_eq!(sealed.len() % AES_BLOCK_LEN, 0);
        assert_eq!(decrypt_settings(&key, &sealed).unwrap(), plaintext.to_vec());

        let wrong_key = decrypt_settings(&[8u8; 16], &sealed);
        assert!(wrong_key.map(|p| p != plaintext.to_vec()).unwrap_or(true));
        assert!(decrypt_settings(&key, &sealed[..20]).is_err());
    }

    #[test]
    fn test_authenticator_truncation() {
        let key = [5u8; 32];
        let auth = compute_authenticator(&key, b"m1", b"m2").unwrap();
        let full = hmac_sha256(&key, &[&b"m1m2"[..]]).unwrap();
        assert_eq!(&auth[..], &full[..8]);
    }
}
