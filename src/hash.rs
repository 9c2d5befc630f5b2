use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use hex::encode;
use sha2::{Digest, Sha256};

use crate::error::VaultError;

pub struct Hash;

impl Hash {
    pub fn compute_sha2_hash(path: &Path) -> Result<String, VaultError> {
        let f = File::open(path)?;
        Self::compute_sha2_reader(f)
    }

    pub fn compute_sha2_reader<R: Read>(reader: R) -> Result<String, VaultError> {
        let mut reader = BufReader::new(reader);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192]; // Read in 8KB chunks

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(encode(hasher.finalize()))
    }

    /// First seven characters, cut on a character boundary.
    pub fn short_hash(hash: &str) -> &str {
        match hash.char_indices().nth(7) {
            Some((end, _)) => &hash[..end],
            None => hash,
        }
    }

    /// True for a lowercase or uppercase hex SHA-256 digest.
    pub fn is_sha2_hex(hash: &str) -> bool {
        hash.len() == 64 && hash.bytes().all(|b| b.is_ascii_hexdigit())
    }
}
