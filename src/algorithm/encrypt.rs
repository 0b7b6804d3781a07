use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use super::EncryptAlgorithm;
use super::props::{self, Props};
use crate::ast::Value;
use crate::error::{ShardError, ShardResult};

const KIND: &str = "encrypt";

/// Reversible cipher: the text form of the value XORed with a SHA-256
/// counter key stream, stored as base64.
///
/// Decryption always yields a string value.
#[derive(Debug)]
pub struct XorStreamEncryptor {
    key: Vec<u8>,
}

impl XorStreamEncryptor {
    pub fn new(props: &Props) -> ShardResult<Self> {
        let key = props::required_str(props, "key", KIND)?;
        if key.is_empty() {
            return Err(ShardError::algorithm(KIND, "'key' must not be empty"));
        }
        Ok(Self {
            key: key.into_bytes(),
        })
    }

    fn apply(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for (block, chunk) in data.chunks(32).enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(&self.key);
            hasher.update((block as u64).to_be_bytes());
            let stream = hasher.finalize();
            out.extend(chunk.iter().zip(stream.iter()).map(|(b, k)| b ^ k));
        }
        out
    }
}

impl EncryptAlgorithm for XorStreamEncryptor {
    fn encrypt(&self, plain: &Value) -> ShardResult<Value> {
        if plain.is_null() {
            return Ok(Value::Null);
        }
        let cipher = self.apply(plain.to_plain_string().as_bytes());
        Ok(Value::String(STANDARD.encode(cipher)))
    }

    fn decrypt(&self, cipher: &Value) -> ShardResult<Value> {
        let text = match cipher {
            Value::Null => return Ok(Value::Null),
            Value::String(s) => s,
            other => return Err(ShardError::coercion(other, "cipher text")),
        };
        let bytes = STANDARD
            .decode(text)
            .map_err(|_| ShardError::coercion(cipher, "cipher text"))?;
        String::from_utf8(self.apply(&bytes))
            .map(Value::String)
            .map_err(|_| ShardError::coercion(cipher, "cipher text"))
    }
}

/// One-way hex digest, for assisted-query columns.
#[derive(Debug)]
pub struct Sha256Encryptor {
    salt: String,
}

impl Sha256Encryptor {
    pub fn new(props: &Props) -> ShardResult<Self> {
        Ok(Self {
            salt: props::optional_str(props, "salt", KIND)?.unwrap_or_default(),
        })
    }
}

impl EncryptAlgorithm for Sha256Encryptor {
    fn encrypt(&self, plain: &Value) -> ShardResult<Value> {
        if plain.is_null() {
            return Ok(Value::Null);
        }
        let mut hasher = Sha256::new();
        hasher.update(plain.to_plain_string().as_bytes());
        hasher.update(self.salt.as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok(Value::String(hex))
    }

    fn decrypt(&self, _cipher: &Value) -> ShardResult<Value> {
        Err(ShardError::algorithm(KIND, "SHA256 digests cannot be decrypted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn xor() -> XorStreamEncryptor {
        XorStreamEncryptor::new(&serde_json::from_value(json!({"key": "s3cret"})).unwrap()).unwrap()
    }

    #[test]
    fn test_xor_stream_reverses_long_text() {
        let plain = Value::from("a phone number that spans more than one 32 byte block");
        let cipher = xor().encrypt(&plain).unwrap();
        assert_ne!(cipher, plain);
        assert_eq!(xor().decrypt(&cipher).unwrap(), plain);
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(xor().encrypt(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_sha256_is_deterministic() {
        let sha = Sha256Encryptor::new(&Props::new()).unwrap();
        let a = sha.encrypt(&Value::from("x")).unwrap();
        assert_eq!(a, sha.encrypt(&Value::from("x")).unwrap());
        assert_eq!(
            a,
            Value::from("2d711642b726b04401627ca9fbac32f5c8530fb1903cc4db02258717921a4881")
        );
        assert!(sha.decrypt(&a).is_err());
    }
}
