//! In-memory text payload, for short snippets that never touch disk.

use super::{PayloadKind, PayloadSource};
use sha2::{Digest, Sha256};
use std::io;

const TEXT_NAME: &str = "snippet";

pub struct TextPayload {
    content: String,
    digest: String,
}

impl TextPayload {
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let digest = hex::encode(Sha256::digest(content.as_bytes()));
        Self { content, digest }
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl PayloadSource for TextPayload {
    fn name(&self) -> &str {
        TEXT_NAME
    }

    fn size(&self) -> u64 {
        self.content.len() as u64
    }

    fn kind(&self) -> PayloadKind {
        PayloadKind::Text
    }

    fn digest(&self) -> io::Result<String> {
        Ok(self.digest.clone())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = self.content.as_bytes();
        if offset >= bytes.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        Ok(n)
    }
}
