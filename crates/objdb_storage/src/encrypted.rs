//! AES-256-GCM sealed frames over another backend.
//!
//! Every `append` becomes one frame on the inner store:
//!
//! ```text
//! | sealed_len: u32 LE | nonce: 12 bytes | ciphertext + tag: sealed_len bytes |
//! ```
//!
//! The frame's logical start offset is bound in as associated data, so a
//! frame copied to another position fails authentication. Logical offsets
//! seen by callers count plaintext bytes only.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key length.
pub const KEY_SIZE: usize = 32;
/// GCM nonce length.
pub const NONCE_SIZE: usize = 12;
/// GCM tag length.
pub const TAG_SIZE: usize = 16;

const FRAME_HEADER: usize = 4 + NONCE_SIZE;
const KDF_INFO: &[u8] = b"objdb data log v1";

/// Key material for an [`EncryptedBackend`]. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Uses `bytes` directly as the AES key.
    ///
    /// # Errors
    ///
    /// Fails unless `bytes` is exactly [`KEY_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            StorageError::Encryption(format!(
                "invalid key size: expected {KEY_SIZE}, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    /// Derives a key from arbitrary secret material (a passphrase) with
    /// HKDF-SHA256, salted with `salt`.
    ///
    /// # Errors
    ///
    /// Fails if the secret is empty.
    pub fn derive(secret: &[u8], salt: &[u8]) -> StorageResult<Self> {
        if secret.is_empty() {
            return Err(StorageError::Encryption("empty key material".into()));
        }
        let hkdf = Hkdf::<Sha256>::new(Some(salt), secret);
        let mut bytes = [0u8; KEY_SIZE];
        hkdf.expand(KDF_INFO, &mut bytes)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;
        Ok(Self { bytes })
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    logical: u64,
    physical: u64,
    plain_len: u64,
}

/// Encrypting wrapper around any [`StorageBackend`].
pub struct EncryptedBackend {
    inner: Box<dyn StorageBackend>,
    cipher: Aes256Gcm,
    frames: Vec<Frame>,
    logical_size: u64,
}

impl EncryptedBackend {
    /// Wraps `inner`, indexing its existing frames.
    ///
    /// A partially written trailing frame is cut off. The first frame is
    /// opened eagerly so a wrong key fails here rather than on first read.
    ///
    /// # Errors
    ///
    /// [`StorageError::Encryption`] for a wrong key or tampered frame,
    /// otherwise whatever the inner store reports.
    pub fn open(mut inner: Box<dyn StorageBackend>, key: &EncryptionKey) -> StorageResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(&key.bytes)
            .map_err(|e| StorageError::Encryption(e.to_string()))?;

        let physical_size = inner.size()?;
        let mut frames = Vec::new();
        let mut physical = 0u64;
        let mut logical = 0u64;
        while physical + FRAME_HEADER as u64 <= physical_size {
            let header = inner.read_at(physical, 4)?;
            let sealed_len = u64::from(u32::from_le_bytes([
                header[0], header[1], header[2], header[3],
            ]));
            if sealed_len < TAG_SIZE as u64 {
                return Err(StorageError::Corrupted(format!(
                    "encrypted frame at {physical} is shorter than its tag"
                )));
            }
            let frame_end = physical + FRAME_HEADER as u64 + sealed_len;
            if frame_end > physical_size {
                break;
            }
            let plain_len = sealed_len - TAG_SIZE as u64;
            frames.push(Frame {
                logical,
                physical,
                plain_len,
            });
            logical += plain_len;
            physical = frame_end;
        }
        if physical < physical_size {
            inner.truncate(physical)?;
        }

        let backend = Self {
            inner,
            cipher,
            frames,
            logical_size: logical,
        };
        if let Some(first) = backend.frames.first() {
            backend.open_frame(first)?;
        }
        Ok(backend)
    }

    fn seal(&self, logical: u64, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let aad = logical.to_le_bytes();
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| StorageError::Encryption("seal failed".into()))?;
        let sealed_len = u32::try_from(sealed.len())
            .map_err(|_| StorageError::Encryption("frame larger than 4 GiB".into()))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER + sealed.len());
        frame.extend_from_slice(&sealed_len.to_le_bytes());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    fn open_frame(&self, frame: &Frame) -> StorageResult<Vec<u8>> {
        let sealed_len = frame.plain_len as usize + TAG_SIZE;
        let raw = self
            .inner
            .read_at(frame.physical, FRAME_HEADER + sealed_len)?;
        let nonce = &raw[4..FRAME_HEADER];
        let aad = frame.logical.to_le_bytes();
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: &raw[FRAME_HEADER..],
                    aad: &aad,
                },
            )
            .map_err(|_| {
                StorageError::Encryption(format!(
                    "frame at logical offset {} failed authentication (wrong key?)",
                    frame.logical
                ))
            })
    }

    /// Index of the frame holding logical `offset`.
    fn frame_index(&self, offset: u64) -> usize {
        self.frames
            .partition_point(|f| f.logical + f.plain_len <= offset)
    }
}

impl StorageBackend for EncryptedBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let end = offset.checked_add(len as u64);
        if !end.is_some_and(|end| end <= self.logical_size) {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.logical_size,
            });
        }
        let end = offset + len as u64;
        let mut out = Vec::with_capacity(len);
        let mut index = self.frame_index(offset);
        while (out.len() as u64) < len as u64 {
            let frame = self.frames[index];
            let plain = self.open_frame(&frame)?;
            let from = (offset.max(frame.logical) - frame.logical) as usize;
            let to = (end.min(frame.logical + frame.plain_len) - frame.logical) as usize;
            out.extend_from_slice(&plain[from..to]);
            index += 1;
        }
        Ok(out)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let logical = self.logical_size;
        if data.is_empty() {
            return Ok(logical);
        }
        let frame = self.seal(logical, data)?;
        let physical = self.inner.append(&frame)?;
        self.frames.push(Frame {
            logical,
            physical,
            plain_len: data.len() as u64,
        });
        self.logical_size += data.len() as u64;
        Ok(logical)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.logical_size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if new_size > self.logical_size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size: self.logical_size,
            });
        }
        if new_size == self.logical_size {
            return Ok(());
        }
        let index = self.frame_index(new_size);
        let frame = self.frames[index];
        let keep = if new_size > frame.logical {
            let mut plain = self.open_frame(&frame)?;
            plain.truncate((new_size - frame.logical) as usize);
            Some(plain)
        } else {
            None
        };

        self.inner.truncate(frame.physical)?;
        self.frames.truncate(index);
        self.logical_size = frame.logical;
        if let Some(prefix) = keep {
            self.append(&prefix)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for EncryptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBackend")
            .field("frames", &self.frames.len())
            .field("logical_size", &self.logical_size)
            .finish_non_exhaustive()
    }
}
