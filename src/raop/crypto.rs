//! Device authentication and payload decryption
//!
//! The device key signs `Apple-Challenge` nonces and unwraps the per-stream
//! AES key a sender puts in the session description. Audio packets carry a
//! 12 byte RTP header in the clear followed by an AES-128-CBC payload.

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::constants::RTP_HEADER_SIZE;
use crate::error::CryptoError;
use crate::rtsp::session::Decrypter;
use crate::sdp::SessionDescription;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

const AES_BLOCK_SIZE: usize = 16;
const CHALLENGE_SIZE: usize = 16;
const SIGNED_BUFFER_SIZE: usize = 32;

/// Six byte hardware address used in challenge responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    /// Stable locally-administered address derived from a node name
    pub fn from_name(name: &str) -> Self {
        let digest = Sha1::digest(name.as_bytes());
        let mut bytes = [0u8; 6];
        bytes.copy_from_slice(&digest[..6]);
        // unicast, locally administered
        bytes[0] = (bytes[0] & 0xfe) | 0x02;
        HardwareAddr(bytes)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for HardwareAddr {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(CryptoError::InvalidAddress(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (byte, part) in bytes.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| CryptoError::InvalidAddress(s.to_string()))?;
        }
        Ok(HardwareAddr(bytes))
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Pad a base64 string with `=` up to a multiple of four
pub fn base64_pad(s: &str) -> String {
    let mut padded = s.to_string();
    while padded.len() % 4 != 0 {
        padded.push('=');
    }
    padded
}

/// Strip everything from the first `=` on
pub fn base64_unpad(s: &str) -> &str {
    match s.find('=') {
        Some(idx) => &s[..idx],
        None => s,
    }
}

/// Decode base64 that may have had its padding removed
pub fn decode_unpadded(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(STANDARD.decode(base64_pad(s.trim()))?)
}

/// RSA key identifying this device to senders
#[derive(Clone)]
pub struct DeviceKey {
    key: RsaPrivateKey,
}

impl DeviceKey {
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parse a PKCS#1 or PKCS#8 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| e.to_string())
            .or_else(|pkcs1_err| {
                RsaPrivateKey::from_pkcs8_pem(pem)
                    .map_err(|pkcs8_err| format!("pkcs1: {}; pkcs8: {}", pkcs1_err, pkcs8_err))
            })
            .map_err(CryptoError::InvalidKey)?;
        Ok(Self { key })
    }

    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| CryptoError::InvalidKey(format!("{}: {}", path.display(), e)))?;
        Self::from_pem(&pem)
    }

    /// Answer an `Apple-Challenge`
    ///
    /// The signed buffer is the 16 challenge bytes, the local address of the
    /// control connection, the hardware address, zero padded to 32 bytes.
    /// The encoded signature drops its padding when the challenge had none.
    pub fn challenge_response(
        &self,
        challenge: &str,
        hw_addr: &HardwareAddr,
        local_ip: IpAddr,
    ) -> Result<String, CryptoError> {
        let mut buf = decode_unpadded(challenge)?;
        if buf.len() != CHALLENGE_SIZE {
            return Err(CryptoError::InvalidChallenge(format!(
                "expected {} bytes, got {}",
                CHALLENGE_SIZE,
                buf.len()
            )));
        }

        match local_ip {
            IpAddr::V4(v4) => buf.extend_from_slice(&v4.octets()),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => buf.extend_from_slice(&v4.octets()),
                None => buf.extend_from_slice(&v6.octets()),
            },
        }
        buf.extend_from_slice(&hw_addr.octets());
        if buf.len() < SIGNED_BUFFER_SIZE {
            buf.resize(SIGNED_BUFFER_SIZE, 0);
        }
        debug!("Signing challenge buffer {}", hex::encode(&buf));

        let signature = self.key.sign(Pkcs1v15Sign::new_unprefixed(), &buf)?;
        let encoded = STANDARD.encode(signature);
        if encoded.len() != challenge.len() {
            return Ok(base64_unpad(&encoded).to_string());
        }
        Ok(encoded)
    }

    /// Unwrap the `rsaaeskey` attribute into the raw AES key
    pub fn decrypt_aes_key(&self, rsaaeskey: &str) -> Result<Vec<u8>, CryptoError> {
        let wrapped = decode_unpadded(rsaaeskey)?;
        Ok(self.key.decrypt(Oaep::new::<Sha1>(), &wrapped)?)
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceKey(..)")
    }
}

/// AES-128-CBC packet decrypter
///
/// Each packet restarts the chain from the negotiated IV. Only whole blocks
/// after the RTP header are decrypted; a trailing partial block is copied
/// as-is. The returned payload excludes the header.
#[derive(Clone)]
pub struct AesDecrypter {
    key: [u8; AES_BLOCK_SIZE],
    iv: [u8; AES_BLOCK_SIZE],
}

impl AesDecrypter {
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; AES_BLOCK_SIZE] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        let iv: [u8; AES_BLOCK_SIZE] = iv.try_into().map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Self { key, iv })
    }

    /// Build from the `rsaaeskey` and `aesiv` attributes of a description
    pub fn from_description(
        description: &SessionDescription,
        device_key: &DeviceKey,
    ) -> Result<Self, CryptoError> {
        let wrapped = description
            .attribute("rsaaeskey")
            .ok_or_else(|| CryptoError::InvalidKey("missing rsaaeskey".to_string()))?;
        let key = device_key.decrypt_aes_key(wrapped)?;
        let iv = decode_unpadded(description.attribute("aesiv").unwrap_or_default())?;
        Self::new(&key, &iv)
    }
}

impl Decrypter for AesDecrypter {
    fn decrypt(&self, packet: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut audio = packet.get(RTP_HEADER_SIZE..).unwrap_or_default().to_vec();

        let mut cipher = Aes128CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        for block in audio.chunks_exact_mut(AES_BLOCK_SIZE) {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }

        Ok(audio)
    }
}

impl fmt::Debug for AesDecrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AesDecrypter(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use std::net::{Ipv4Addr, Ipv6Addr};

    const CHALLENGE: &str = "pcA82D4sdJrNcnSDBhYcCA";

    fn test_key(seed: u64) -> DeviceKey {
        let mut rng = StdRng::seed_from_u64(seed);
        DeviceKey::new(RsaPrivateKey::new(&mut rng, 1024).unwrap())
    }

    fn hw() -> HardwareAddr {
        "00:11:22:33:44:55".parse().unwrap()
    }

    fn signed_buffer(ip: &[u8]) -> Vec<u8> {
        let mut buf = decode_unpadded(CHALLENGE).unwrap();
        buf.extend_from_slice(ip);
        buf.extend_from_slice(&hw().octets());
        buf.resize(32, 0);
        buf
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(base64_pad("abc"), "abc=");
        assert_eq!(base64_pad("abcd"), "abcd");
        assert_eq!(base64_unpad("ab=="), "ab");
        assert_eq!(base64_unpad("abcd"), "abcd");
    }

    #[test]
    fn test_challenge_response_verifies() {
        let key = test_key(7);
        let ip = Ipv4Addr::new(192, 168, 1, 10);
        let response = key.challenge_response(CHALLENGE, &hw(), ip.into()).unwrap();

        // unpadded challenge -> unpadded response
        assert!(!response.contains('='));
        let signature = decode_unpadded(&response).unwrap();
        key.private_key()
            .to_public_key()
            .verify(
                Pkcs1v15Sign::new_unprefixed(),
                &signed_buffer(&ip.octets()),
                &signature,
            )
            .unwrap();
    }

    #[test]
    fn test_challenge_response_is_deterministic() {
        let key = test_key(11);
        let ip: IpAddr = Ipv4Addr::new(10, 0, 0, 5).into();
        let first = key.challenge_response(CHALLENGE, &hw(), ip).unwrap();
        let second = key.challenge_response(CHALLENGE, &hw(), ip).unwrap();
        assert_eq!(first, second);

        let other_ip: IpAddr = Ipv4Addr::new(10, 0, 0, 6).into();
        assert_ne!(first, key.challenge_response(CHALLENGE, &hw(), other_ip).unwrap());
    }

    #[test]
    fn test_mapped_ipv6_uses_four_bytes() {
        let key = test_key(3);
        let v4 = Ipv4Addr::new(172, 16, 0, 1);
        let mapped: IpAddr = v4.to_ipv6_mapped().into();
        assert_eq!(
            key.challenge_response(CHALLENGE, &hw(), mapped).unwrap(),
            key.challenge_response(CHALLENGE, &hw(), v4.into()).unwrap()
        );

        // 16 + 16 + 6 bytes, longer than the minimum and never truncated
        let v6: IpAddr = Ipv6Addr::LOCALHOST.into();
        assert!(key.challenge_response(CHALLENGE, &hw(), v6).is_ok());
    }

    #[test]
    fn test_wrong_challenge_length_rejected() {
        let key = test_key(5);
        let err = key
            .challenge_response("AAAA", &hw(), Ipv4Addr::LOCALHOST.into())
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidChallenge(_)));
    }

    #[test]
    fn test_pem_roundtrip_and_aes_key_unwrap() {
        let key = test_key(13);
        let pem = key.private_key().to_pkcs1_pem(LineEnding::LF).unwrap();
        let loaded = DeviceKey::from_pem(&pem).unwrap();

        let aes_key = [0x42u8; 16];
        let mut rng = StdRng::seed_from_u64(99);
        let wrapped = loaded
            .private_key()
            .to_public_key()
            .encrypt(&mut rng, Oaep::new::<Sha1>(), &aes_key)
            .unwrap();
        let encoded = STANDARD.encode(wrapped);

        assert_eq!(loaded.decrypt_aes_key(base64_unpad(&encoded)).unwrap(), aes_key);
    }

    #[test]
    fn test_garbage_pem_rejected() {
        assert!(matches!(
            DeviceKey::from_pem("not a key"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_decrypts_whole_blocks_only() {
        let key = [1u8; 16];
        let iv = [2u8; 16];
        let plain: Vec<u8> = (0..40).collect();

        // two encrypted blocks, eight trailing bytes left in the clear
        let mut payload = plain.clone();
        let mut enc = cbc::Encryptor::<Aes128>::new_from_slices(&key, &iv).unwrap();
        for block in payload[..32].chunks_exact_mut(16) {
            enc.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        let mut packet = vec![0xAAu8; RTP_HEADER_SIZE];
        packet.extend_from_slice(&payload);

        let decrypter = AesDecrypter::new(&key, &iv).unwrap();
        assert_eq!(decrypter.decrypt(&packet).unwrap(), plain);
    }

    #[test]
    fn test_short_payload_untouched() {
        let decrypter = AesDecrypter::new(&[1u8; 16], &[2u8; 16]).unwrap();

        let packet: Vec<u8> = (0..27).collect();
        assert_eq!(decrypter.decrypt(&packet).unwrap(), packet[12..].to_vec());

        assert!(decrypter.decrypt(&[1, 2, 3]).unwrap().is_empty());
    }

    #[test]
    fn test_bad_key_length() {
        assert!(matches!(
            AesDecrypter::new(&[0u8; 15], &[0u8; 16]),
            Err(CryptoError::InvalidKeyLength)
        ));
    }

    #[test]
    fn test_hardware_addr() {
        let addr = hw();
        assert_eq!(addr.to_string(), "00:11:22:33:44:55");
        assert!("00:11:22".parse::<HardwareAddr>().is_err());

        let derived = HardwareAddr::from_name("node-1");
        assert_eq!(derived, HardwareAddr::from_name("node-1"));
        assert_eq!(derived.octets()[0] & 0x03, 0x02);
    }
}
