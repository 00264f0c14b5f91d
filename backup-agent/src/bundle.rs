//! Content bundle exchanged between the agent and the engine.
//!
//! Layout before compression: the magic `SBND`, a `u32` entry count, then per
//! entry a `u32` path length, the UTF-8 path, a `u64` content length and the
//! content. All integers are big-endian. The whole buffer is zstd-compressed.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::utils::{AgentError, Result};

const MAGIC: &[u8; 4] = b"SBND";
const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: String,
    pub content: Bytes,
}

pub fn encode(entries: &[BundleEntry]) -> Result<Bytes> {
    let payload: usize = entries.iter().map(|e| 12 + e.path.len() + e.content.len()).sum();
    let mut buf = BytesMut::with_capacity(8 + payload);

    buf.put_slice(MAGIC);
    buf.put_u32(entries.len() as u32);
    for entry in entries {
        buf.put_u32(entry.path.len() as u32);
        buf.put_slice(entry.path.as_bytes());
        buf.put_u64(entry.content.len() as u64);
        buf.put_slice(&entry.content);
    }

    let compressed = zstd::encode_all(&buf[..], COMPRESSION_LEVEL)?;
    Ok(Bytes::from(compressed))
}

pub fn decode(data: &[u8]) -> Result<Vec<BundleEntry>> {
    let raw = zstd::decode_all(data).map_err(|e| AgentError::Bundle(format!("decompression failed: {}", e)))?;
    let mut buf = Bytes::from(raw);

    if buf.remaining() < 8 || &buf[..4] != MAGIC {
        return Err(AgentError::Bundle("missing bundle header".into()));
    }
    buf.advance(4);
    let count = buf.get_u32() as usize;

    let mut entries = Vec::with_capacity(count.min(4096));
    for index in 0..count {
        if buf.remaining() < 4 {
            return Err(AgentError::Bundle(format!("truncated at entry {}", index)));
        }
        let path_len = buf.get_u32() as usize;
        if buf.remaining() < path_len + 8 {
            return Err(AgentError::Bundle(format!("truncated path at entry {}", index)));
        }
        let path = String::from_utf8(buf.split_to(path_len).to_vec())
            .map_err(|_| AgentError::Bundle(format!("non UTF-8 path at entry {}", index)))?;

        let content_len = buf.get_u64() as usize;
        if buf.remaining() < content_len {
            return Err(AgentError::Bundle(format!("truncated content for {}", path)));
        }
        let content = buf.split_to(content_len);
        entries.push(BundleEntry { path, content });
    }

    if buf.has_remaining() {
        return Err(AgentError::Bundle(format!("{} trailing bytes", buf.remaining())));
    }
    Ok(entries)
}
