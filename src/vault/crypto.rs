//! 加密服务：字段级加解密、口令哈希、文件流式加解密
//!
//! 所有落库的字段值都经过这里：AES-256-GCM，每次调用生成新的随机 nonce，
//! nonce 拼在密文前面，整体做 URL-safe base64 编码，可以安全地存进 TEXT 列。
//! 对称密钥由静态口令经 SHA-256 派生。
//!
//! 文件走 AES-256-CTR 流式加密：16 字节随机 nonce 写在输出文件开头，
//! 内容哈希对**明文**计算（内容寻址用于元数据层去重，不是密文完整性校验——
//! 同一份文件加两次 content_hash 相同，密文因 nonce 不同而不同）。

use crate::vault::error::{Result, VaultError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::{
    password_hash::{rand_core::OsRng, rand_core::RngCore, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// 字段加密的 nonce 长度（AES-GCM 标准 96 bit）
const FIELD_NONCE_LEN: usize = 12;
/// 文件加密的 nonce 长度（CTR 计数器初值，一个分组）
const FILE_NONCE_LEN: usize = 16;
/// 文件流式处理的分块大小
const CHUNK_SIZE: usize = 1024;

/// 加密服务
pub struct CryptoService {
    key: [u8; 32],
}

impl CryptoService {
    /// 由静态口令派生对称密钥（SHA-256）
    pub fn new(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        Self {
            key: hasher.finalize().into(),
        }
    }

    /// 加密单个字段值，输出可逆的文本编码
    pub fn encrypt_field(&self, plaintext: &str) -> Result<String> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; FIELD_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(FIELD_NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(out))
    }

    /// 解密单个字段值
    pub fn decrypt_field(&self, encoded: &str) -> Result<String> {
        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|_| VaultError::Decryption("不是合法的 base64 数据".to_string()))?;

        if raw.len() <= FIELD_NONCE_LEN {
            return Err(VaultError::Decryption("密文过短".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(FIELD_NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| VaultError::Decryption("密文校验失败或密钥不匹配".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| VaultError::Decryption("明文不是合法的 UTF-8".to_string()))
    }

    /// 口令哈希（Argon2id，自动加盐）
    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| VaultError::Encryption(format!("口令哈希失败: {e}")))
    }

    /// 校验口令与哈希是否匹配（常数时间比较）
    pub fn verify_password(&self, hash: &str, password: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// 计算一段数据的十六进制 SHA-256 内容哈希
    pub fn content_hash(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// 流式加密文件
    ///
    /// 先对明文分块计算内容哈希，目标文件以哈希的十六进制命名放进 `dest_dir`，
    /// 随机 nonce 写在输出文件开头，之后逐块加密写入。
    /// 返回 (目标路径, 内容哈希)。
    pub fn encrypt_file(&self, source: &Path, dest_dir: &Path) -> Result<(PathBuf, String)> {
        let mut input = File::open(source)?;

        // 第一遍：明文内容哈希
        let mut hasher = Sha256::new();
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let hash = hex::encode(hasher.finalize());

        let dest_path = dest_dir.join(&hash);
        let mut output = File::create(&dest_path)?;

        let mut nonce = [0u8; FILE_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        output.write_all(&nonce)?;

        // 第二遍：逐块加密
        input.seek(SeekFrom::Start(0))?;
        let mut cipher = Aes256Ctr::new(&self.key.into(), &nonce.into());
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            cipher.apply_keystream(&mut buf[..n]);
            output.write_all(&buf[..n])?;
        }

        Ok((dest_path, hash))
    }

    /// 流式解密文件：读取 nonce 前缀，逐块解密剩余内容
    pub fn decrypt_file(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut input = File::open(source)?;

        let mut nonce = [0u8; FILE_NONCE_LEN];
        input
            .read_exact(&mut nonce)
            .map_err(|_| VaultError::Decryption("文件缺少 nonce 前缀".to_string()))?;

        let mut output = File::create(dest)?;
        let mut cipher = Aes256Ctr::new(&self.key.into(), &nonce.into());
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            cipher.apply_keystream(&mut buf[..n]);
            output.write_all(&buf[..n])?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn field_roundtrip() {
        let crypto = CryptoService::new("password");
        for s in ["", "joe", "банк", "多字节字符串 with mixed content"] {
            let encoded = crypto.encrypt_field(s).unwrap();
            assert_ne!(encoded, s);
            assert_eq!(crypto.decrypt_field(&encoded).unwrap(), s);
        }
    }

    #[test]
    fn field_nonce_is_fresh() {
        let crypto = CryptoService::new("password");
        let a = crypto.encrypt_field("same input").unwrap();
        let b = crypto.encrypt_field("same input").unwrap();
        assert_ne!(a, b);
        assert_eq!(crypto.decrypt_field(&a).unwrap(), "same input");
        assert_eq!(crypto.decrypt_field(&b).unwrap(), "same input");
    }

    #[test]
    fn decrypt_rejects_garbage() {
        let crypto = CryptoService::new("password");
        assert!(matches!(
            crypto.decrypt_field("!!!not base64!!!"),
            Err(VaultError::Decryption(_))
        ));
        assert!(matches!(
            crypto.decrypt_field("c2hvcnQ="),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn decrypt_rejects_foreign_key() {
        let a = CryptoService::new("password-a");
        let b = CryptoService::new("password-b");
        let encoded = a.encrypt_field("secret").unwrap();
        assert!(matches!(
            b.decrypt_field(&encoded),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn password_hash_verify() {
        let crypto = CryptoService::new("password");
        let hash = crypto.hash_password("hunter2").unwrap();
        assert_ne!(hash, "hunter2");
        assert!(crypto.verify_password(&hash, "hunter2"));
        assert!(!crypto.verify_password(&hash, "hunter3"));
        assert!(!crypto.verify_password("not-a-hash", "hunter2"));
    }

    #[test]
    fn file_roundtrip_and_content_addressing() {
        let crypto = CryptoService::new("password");
        let dir = tempfile::tempdir().unwrap();

        let source = dir.path().join("plain.bin");
        // 跨越多个分块的内容
        let content: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&source, &content).unwrap();

        let store = dir.path().join("store");
        fs::create_dir(&store).unwrap();

        let (enc1, hash1) = crypto.encrypt_file(&source, &store).unwrap();
        assert_eq!(enc1.file_name().unwrap().to_str().unwrap(), hash1);
        assert_eq!(hash1, crypto.content_hash(&content));

        // 同一明文再加密一次：内容哈希相同，密文因 nonce 不同
        let store2 = dir.path().join("store2");
        fs::create_dir(&store2).unwrap();
        let (enc2, hash2) = crypto.encrypt_file(&source, &store2).unwrap();
        assert_eq!(hash1, hash2);
        assert_ne!(fs::read(&enc1).unwrap(), fs::read(&enc2).unwrap());

        let restored = dir.path().join("restored.bin");
        crypto.decrypt_file(&enc1, &restored).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), content);
    }

    #[test]
    fn decrypt_file_requires_nonce_prefix() {
        let crypto = CryptoService::new("password");
        let dir = tempfile::tempdir().unwrap();
        let short = dir.path().join("short.bin");
        fs::write(&short, b"tiny").unwrap();
        let out = dir.path().join("out.bin");
        assert!(matches!(
            crypto.decrypt_file(&short, &out),
            Err(VaultError::Decryption(_))
        ));
    }
}
