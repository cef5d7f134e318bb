//! Payload compression/encryption for the management protocol, and the
//! on-disk credential file format.

use std::io::{Read, Write};
use std::path::Path;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit, KeyInit, StreamCipher};
use base64::Engine;
use rand::RngCore;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None = 0,
    Gzip = 1,
    Zstd = 2,
    Lz4 = 3,
    Bzip2 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    None = 0,
    Aes256Cbc = 1,
    Aes192Cbc = 2,
    Aes128Cbc = 3,
    Aes256Ctr = 4,
    Aes192Ctr = 5,
    Aes128Ctr = 6,
}

impl Compression {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Zstd),
            3 => Some(Compression::Lz4),
            4 => Some(Compression::Bzip2),
            _ => None,
        }
    }
}

impl Encryption {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Encryption::None),
            1 => Some(Encryption::Aes256Cbc),
            2 => Some(Encryption::Aes192Cbc),
            3 => Some(Encryption::Aes128Cbc),
            4 => Some(Encryption::Aes256Ctr),
            5 => Some(Encryption::Aes192Ctr),
            6 => Some(Encryption::Aes128Ctr),
            _ => None,
        }
    }

    fn key_len(self) -> usize {
        match self {
            Encryption::None => 0,
            Encryption::Aes256Cbc | Encryption::Aes256Ctr => 32,
            Encryption::Aes192Cbc | Encryption::Aes192Ctr => 24,
            Encryption::Aes128Cbc | Encryption::Aes128Ctr => 16,
        }
    }

    fn is_ctr(self) -> bool {
        matches!(
            self,
            Encryption::Aes256Ctr | Encryption::Aes192Ctr | Encryption::Aes128Ctr
        )
    }
}

#[derive(Debug, Snafu)]
pub enum CryptoError {
    #[snafu(display("compression i/o error: {}", source))]
    Compression { source: std::io::Error },
    #[snafu(display("decryption failed: ciphertext is malformed or the key is wrong"))]
    Decryption,
    #[snafu(display("could not read {}: {}", path.display(), source))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("could not write {}: {}", path.display(), source))]
    WriteFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid base64 in credential file: {}", source))]
    Base64 { source: base64::DecodeError },
    #[snafu(display("malformed credential line: {:?}", line))]
    MalformedCredentialLine { line: String },
}

impl From<base64::DecodeError> for CryptoError {
    fn from(source: base64::DecodeError) -> Self {
        CryptoError::Base64 { source }
    }
}

pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).context(CompressionSnafu)?;
            encoder.finish().context(CompressionSnafu)
        }
        Compression::Zstd => zstd::encode_all(data, 0).context(CompressionSnafu),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(data)),
        Compression::Bzip2 => {
            let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data).context(CompressionSnafu)?;
            encoder.finish().context(CompressionSnafu)
        }
    }
}

pub fn decompress(compression: Compression, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context(CompressionSnafu)?;
            Ok(out)
        }
        Compression::Zstd => zstd::decode_all(data).context(CompressionSnafu),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|_| CryptoError::Decryption),
        Compression::Bzip2 => {
            let mut decoder = bzip2::read::BzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context(CompressionSnafu)?;
            Ok(out)
        }
    }
}

/// Encrypt `data` under whichever AES key size and mode `encryption` names.
/// CBC variants PKCS7-pad and prepend a 16-byte random IV; CTR variants
/// prepend a 16-byte random nonce/counter. This is the single entry point
/// `read_envelope`/`write_envelope` use, so every mode `Header.Encryption`
/// can name is actually reachable over the wire.
pub fn encrypt(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Vec<u8> {
    if encryption == Encryption::None {
        return data.to_vec();
    }
    if encryption.is_ctr() {
        encrypt_ctr(encryption, master_key, data)
    } else {
        encrypt_cbc(encryption, master_key, data)
    }
}

pub fn decrypt(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if encryption == Encryption::None {
        return Ok(data.to_vec());
    }
    if encryption.is_ctr() {
        decrypt_ctr(encryption, master_key, data)
    } else {
        decrypt_cbc(encryption, master_key, data)
    }
}

/// CBC mode, PKCS7-padded, 16-byte random IV prepended to the ciphertext.
fn encrypt_cbc(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = &master_key[..encryption.key_len()];
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = match encryption {
        Encryption::Aes256Cbc => cbc::Encryptor::<aes::Aes256>::new(key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        Encryption::Aes192Cbc => cbc::Encryptor::<aes::Aes192>::new(key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        Encryption::Aes128Cbc => cbc::Encryptor::<aes::Aes128>::new(key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(data),
        _ => unreachable!("encrypt_cbc only called for CBC variants"),
    };

    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

fn decrypt_cbc(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < 16 {
        return Err(CryptoError::Decryption);
    }
    let (iv, ciphertext) = data.split_at(16);
    let key = &master_key[..encryption.key_len()];

    let result = match encryption {
        Encryption::Aes256Cbc => cbc::Decryptor::<aes::Aes256>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        Encryption::Aes192Cbc => cbc::Decryptor::<aes::Aes192>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        Encryption::Aes128Cbc => cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => unreachable!("decrypt_cbc only called for CBC variants"),
    };
    result.map_err(|_| CryptoError::Decryption)
}

/// CTR mode, 16-byte random nonce/counter prepended to the ciphertext.
fn encrypt_ctr(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Vec<u8> {
    let key = &master_key[..encryption.key_len()];
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut buf = data.to_vec();
    match encryption {
        Encryption::Aes256Ctr => ctr::Ctr64BE::<aes::Aes256>::new(key.into(), &nonce.into()).apply_keystream(&mut buf),
        Encryption::Aes192Ctr => ctr::Ctr64BE::<aes::Aes192>::new(key.into(), &nonce.into()).apply_keystream(&mut buf),
        Encryption::Aes128Ctr => ctr::Ctr64BE::<aes::Aes128>::new(key.into(), &nonce.into()).apply_keystream(&mut buf),
        _ => unreachable!("encrypt_ctr only called for CTR variants"),
    }

    let mut out = Vec::with_capacity(16 + buf.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&buf);
    out
}

fn decrypt_ctr(encryption: Encryption, master_key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < 16 {
        return Err(CryptoError::Decryption);
    }
    let (nonce, ciphertext) = data.split_at(16);
    let key = &master_key[..encryption.key_len()];
    let mut buf = ciphertext.to_vec();
    match encryption {
        Encryption::Aes256Ctr => ctr::Ctr64BE::<aes::Aes256>::new(key.into(), nonce.into()).apply_keystream(&mut buf),
        Encryption::Aes192Ctr => ctr::Ctr64BE::<aes::Aes192>::new(key.into(), nonce.into()).apply_keystream(&mut buf),
        Encryption::Aes128Ctr => ctr::Ctr64BE::<aes::Aes128>::new(key.into(), nonce.into()).apply_keystream(&mut buf),
        _ => unreachable!("decrypt_ctr only called for CTR variants"),
    }
    Ok(buf)
}

/// Load the base64-encoded master key. Callers are expected to have already
/// validated the file's mode is 0600 in a 0700 directory; that check
/// lives in `pgexporter::config` loading, not here, so this function stays a
/// pure transform and is testable without touching file permissions.
pub fn load_master_key(path: &Path) -> Result<Vec<u8>, CryptoError> {
    let raw = std::fs::read_to_string(path).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    base64::engine::general_purpose::STANDARD
        .decode(raw.trim())
        .map_err(Into::into)
}

pub fn generate_master_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

pub fn write_master_key(path: &Path, key: &[u8]) -> Result<(), CryptoError> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(key);
    atomic_write(path, encoded.as_bytes())
}

/// One `username:base64(aes-256-cbc(password))` record.
pub struct Credential {
    pub username: String,
    pub password: String,
}

pub fn load_credentials(path: &Path, master_key: &[u8]) -> Result<Vec<Credential>, CryptoError> {
    let raw = std::fs::read_to_string(path).context(ReadFileSnafu {
        path: path.to_path_buf(),
    })?;
    let mut out = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (username, encoded) =
            line.split_once(':').ok_or_else(|| CryptoError::MalformedCredentialLine {
                line: line.to_string(),
            })?;
        let ciphertext = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        let plaintext = decrypt_cbc(Encryption::Aes256Cbc, master_key, &ciphertext)?;
        out.push(Credential {
            username: username.to_string(),
            password: String::from_utf8_lossy(&plaintext).into_owned(),
        });
    }
    Ok(out)
}

/// Populate `config.users`/`config.admins` from the encrypted credential
/// files named in `global.users_path`/`global.admins_path`, when a master
/// key is configured and present on disk. Missing files are not an error: a
/// fresh install has no users yet. Shared between process startup and the
/// `reload` management command so a reload never wipes out credentials that
/// were only ever populated out-of-band from the main `.ini`.
pub fn load_credentials_into(config: &mut crate::config::Config) {
    let Some(master_key_path) = config.global.master_key_path.clone() else {
        return;
    };
    if !master_key_path.exists() {
        return;
    }
    let key = match load_master_key(&master_key_path) {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "could not load master key");
            return;
        }
    };

    if let Some(users_path) = config.global.users_path.clone() {
        match load_credentials(&users_path, &key) {
            Ok(credentials) => {
                config.users = credentials
                    .into_iter()
                    .map(|c| crate::config::UserConfig {
                        username: c.username,
                        password: c.password,
                    })
                    .collect();
            }
            Err(e) => tracing::warn!(error = %e, "could not load users file"),
        }
    }

    if let Some(admins_path) = config.global.admins_path.clone() {
        match load_credentials(&admins_path, &key) {
            Ok(credentials) => {
                config.admins = credentials
                    .into_iter()
                    .map(|c| crate::config::AdminConfig {
                        username: c.username,
                        password: c.password,
                    })
                    .collect();
            }
            Err(e) => tracing::warn!(error = %e, "could not load admins file"),
        }
    }
}

pub fn save_credentials(
    path: &Path,
    master_key: &[u8],
    credentials: &[Credential],
) -> Result<(), CryptoError> {
    let mut out = String::new();
    for credential in credentials {
        let ciphertext = encrypt_cbc(Encryption::Aes256Cbc, master_key, credential.password.as_bytes());
        out.push_str(&credential.username);
        out.push(':');
        out.push_str(&base64::engine::general_purpose::STANDARD.encode(ciphertext));
        out.push('\n');
    }
    atomic_write(path, out.as_bytes())
}

/// Write through a sibling `.tmp` file plus rename, so a crash mid-write
/// never leaves a half-written credential file in place.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), CryptoError> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data).context(WriteFileSnafu {
        path: tmp_path.clone(),
    })?;
    std::fs::rename(&tmp_path, path).context(WriteFileSnafu {
        path: path.to_path_buf(),
    })?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cbc_round_trips() {
        let key = generate_master_key();
        let ciphertext = encrypt(Encryption::Aes256Cbc, &key, b"hunter2");
        let plaintext = decrypt(Encryption::Aes256Cbc, &key, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn ctr_round_trips() {
        let key = generate_master_key();
        let ciphertext = encrypt(Encryption::Aes128Ctr, &key[..16], b"hunter2");
        let plaintext = decrypt(Encryption::Aes128Ctr, &key[..16], &ciphertext).unwrap();
        assert_eq!(plaintext, b"hunter2");
    }

    #[test]
    fn ctr_and_cbc_ciphertexts_for_the_same_plaintext_differ() {
        let key = generate_master_key();
        let cbc = encrypt(Encryption::Aes256Cbc, &key, b"hunter2hunter2!!");
        let ctr = encrypt(Encryption::Aes256Ctr, &key, b"hunter2hunter2!!");
        assert_ne!(cbc, ctr);
    }

    #[test]
    fn gzip_round_trips() {
        let compressed = compress(Compression::Gzip, b"hello world").unwrap();
        let decompressed = decompress(Compression::Gzip, &compressed).unwrap();
        assert_eq!(decompressed, b"hello world");
    }

    #[test]
    fn credentials_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("pgexporter-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pgexporter_users");
        let key = generate_master_key();

        let credentials = vec![Credential {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        }];
        save_credentials(&path, &key, &credentials).unwrap();

        let loaded = load_credentials(&path, &key).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].username, "alice");
        assert_eq!(loaded[0].password, "s3cret");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
