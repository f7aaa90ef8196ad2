/// Line-oriented telemetry payload
use std::fmt::Write;

use crate::constants::PAYLOAD_BYTES_PER_LINE;
use crate::error::PayloadError;

/// Reusable text buffer holding one rendered tick:
///
/// ```text
/// Total: 12.5%
/// Core 0: 3.0%
/// Core 1: 22.0%
/// ```
#[derive(Debug, Default)]
pub struct Payload {
    buf: String,
}

impl Payload {
    pub fn new() -> Self {
        Payload { buf: String::new() }
    }

    /// Render percentages for one tick. `usages[0]` is the aggregate row,
    /// the rest are cores numbered from 0.
    ///
    /// The buffer is sized up front for the entity count; if it cannot grow
    /// the render fails instead of truncating.
    pub fn render(&mut self, usages: &[f64]) -> Result<&str, PayloadError> {
        self.buf.clear();
        let needed = usages.len().max(1) * PAYLOAD_BYTES_PER_LINE;
        self.buf.try_reserve(needed)?;

        let Some((total, cores)) = usages.split_first() else {
            return Ok(&self.buf);
        };
        // Writing into a String cannot fail
        let _ = writeln!(self.buf, "Total: {total:.1}%");
        for (idx, core) in cores.iter().enumerate() {
            let _ = writeln!(self.buf, "Core {idx}: {core:.1}%");
        }
        Ok(&self.buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}
