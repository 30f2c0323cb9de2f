//! Conversion model weight file validation primitives.
//!
//! These checks are cheap structural checks run before a model is published.
//! They read only a few header bytes, except for hashing which streams the
//! whole file and belongs in `spawn_blocking`.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Local file header of a zip archive (`torch.save` default format).
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// First byte of a pickle stream using protocol 2 or newer.
const PICKLE_PROTO: u8 = 0x80;

/// Recognized weight container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    TorchZip,
    TorchPickle,
    Safetensors,
}

/// Validation errors - pure infrastructure concerns only
#[derive(Debug, thiserror::Error)]
pub enum WeightValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("weight file is empty")]
    Empty,

    #[error("unrecognized weight file format (leading bytes {0:02x?})")]
    UnknownFormat(Vec<u8>),

    #[error("safetensors header of {header_len} bytes does not fit in a {file_len} byte file")]
    TruncatedHeader { header_len: u64, file_len: u64 },
}

/// Check that `path` holds a weight file in a known container format.
pub fn validate_weight_file(path: &Path) -> Result<WeightFormat, WeightValidationError> {
    let mut file = File::open(path)
        .map_err(|e| WeightValidationError::IoError(format!("cannot open file: {e}")))?;
    let file_len = file
        .metadata()
        .map_err(|e| WeightValidationError::IoError(format!("cannot stat file: {e}")))?
        .len();
    if file_len == 0 {
        return Err(WeightValidationError::Empty);
    }

    let mut head = Vec::with_capacity(9);
    file.by_ref()
        .take(9)
        .read_to_end(&mut head)
        .map_err(|e| WeightValidationError::IoError(format!("cannot read header: {e}")))?;

    if head.starts_with(&ZIP_MAGIC) {
        return Ok(WeightFormat::TorchZip);
    }
    if head.first() == Some(&PICKLE_PROTO) {
        return Ok(WeightFormat::TorchPickle);
    }
    if head.len() == 9 && head[8] == b'{' {
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&head[..8]);
        let header_len = u64::from_le_bytes(len_bytes);
        if header_len == 0 || header_len.saturating_add(8) > file_len {
            return Err(WeightValidationError::TruncatedHeader {
                header_len,
                file_len,
            });
        }
        return Ok(WeightFormat::Safetensors);
    }

    head.truncate(4);
    Err(WeightValidationError::UnknownFormat(head))
}

/// Compute the SHA-256 of a file as lowercase hex.
///
/// Streams the file in chunks to avoid memory issues with large files.
pub fn compute_sha256(path: &Path) -> Result<String, WeightValidationError> {
    let mut file = File::open(path)
        .map_err(|e| WeightValidationError::IoError(format!("cannot open file: {e}")))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| WeightValidationError::IoError(format!("read error: {e}")))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
