// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{self, Write};

/// Caps how many bytes reach `inner`; later writes are dropped and a single
/// truncation marker is appended.
pub struct SizeLimitedWriter<W: Write> {
    inner: W,
    bytes_written: u64,
    max_bytes: u64,
    limit_exceeded: bool,
}

impl<W: Write> SizeLimitedWriter<W> {
    pub fn new(inner: W, max_bytes: u64) -> Self {
        Self {
            inner,
            bytes_written: 0,
            max_bytes,
            limit_exceeded: false,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn limit_exceeded(&self) -> bool {
        self.limit_exceeded
    }
}

impl<W: Write> Write for SizeLimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.limit_exceeded {
            return Ok(buf.len());
        }

        let remaining = self.max_bytes.saturating_sub(self.bytes_written);
        if (buf.len() as u64) > remaining {
            self.limit_exceeded = true;
            self.inner.write_all(b"... case log truncated\n")?;
            return Ok(buf.len());
        }

        self.inner.write_all(buf)?;
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
