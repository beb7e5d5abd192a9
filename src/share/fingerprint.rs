use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_128;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint the file at `path`, reading at most `sample_size` bytes.
    pub fn of_file(path: impl AsRef<Path>, sample_size: usize) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut sample = Vec::with_capacity(sample_size);
        file.take(sample_size as u64).read_to_end(&mut sample)?;
        Ok(Self::of_bytes(&sample, sample_size))
    }

    pub fn of_bytes(data: &[u8], sample_size: usize) -> Self {
        let sample = &data[..data.len().min(sample_size)];
        Self(format!("{:032x}", xxh3_128(sample)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}
