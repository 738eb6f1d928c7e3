use tracing::warn;
use wayfinder_core::GenerationRecord;

/// Assembles newline-delimited JSON records from arbitrarily split byte reads.
///
/// Only the unterminated tail is buffered. Splitting happens on raw bytes, so
/// a multi-byte character cut in half by a read boundary is reassembled
/// before decoding.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; returns every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<GenerationRecord> {
        self.buf.extend_from_slice(chunk);
        let mut records = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(record) = decode_line(&line[..pos]) {
                records.push(record);
            }
        }
        records
    }

    /// Decode whatever is left once the body ends without a final newline.
    pub fn finish(&mut self) -> Option<GenerationRecord> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(bytes: &[u8]) -> Option<GenerationRecord> {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerationRecord>(line) {
        Ok(record) => Some(record),
        Err(e) => {
            let preview: String = line.chars().take(120).collect();
            warn!(error = %e, line = %preview, "Skipping undecodable stream line");
            None
        }
    }
}
