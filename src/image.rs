// Firmware image: an ordered, immutable list of chunks.
//
// The loaders here sit outside the transfer core; the engine only ever sees
// a finished `FirmwareImage`.

use crate::error::{OtaError, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// On-disk layout of a firmware file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ImageFormat {
    /// Plain binary, split into fixed-size chunks
    Raw,
    /// JSON array of byte arrays, one per chunk, already framed
    Json,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    chunks: Vec<Vec<u8>>,
}

impl FirmwareImage {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self { chunks }
    }

    /// Split `data` into `chunk_size` pieces; the last one may be shorter.
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(OtaError::InvalidImage("chunk size must be at least 1".to_string()));
        }
        Ok(Self::new(data.chunks(chunk_size).map(<[u8]>::to_vec).collect()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let chunks: Vec<Vec<u8>> = serde_json::from_str(text)
            .map_err(|e| OtaError::InvalidImage(format!("Failed to parse chunk list: {e}")))?;
        Ok(Self::new(chunks))
    }

    pub fn load(path: &Path, format: ImageFormat, chunk_size: usize) -> Result<Self> {
        match format {
            ImageFormat::Raw => {
                let data = std::fs::read(path)?;
                Self::from_bytes(&data, chunk_size)
            }
            ImageFormat::Json => {
                let text = std::fs::read_to_string(path)?;
                Self::from_json(&text)
            }
        }
    }

    /// Reject images with a chunk larger than the transport can carry.
    pub fn validate(&self, max_chunk: usize) -> Result<()> {
        match self.chunks.iter().position(|c| c.len() > max_chunk) {
            Some(index) => Err(OtaError::InvalidImage(format!(
                "chunk {index} is {} bytes, limit is {max_chunk}",
                self.chunks[index].len()
            ))),
            None => Ok(()),
        }
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// SHA-256 over the concatenated chunks, hex encoded.
    pub fn sha256_hex(&self) -> String {
        let mut hasher = Sha256::new();
        for chunk in &self.chunks {
            hasher.update(chunk);
        }
        hex::encode(hasher.finalize())
    }
}
