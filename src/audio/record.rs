use std::io::{ErrorKind, Read};

use anyhow::Result;

use super::CaptureDevice;

/// Capture from a raw S16LE PCM byte stream, e.g.
/// `arecord -f S16_LE -r 16000 -c 1 | fay_connector_rs`.
pub struct ReaderCapture<R> {
    reader: R,
    capturing: bool,
}

impl<R: Read + Send> ReaderCapture<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            capturing: false,
        }
    }
}

impl<R: Read + Send> CaptureDevice for ReaderCapture<R> {
    fn start_capture(&mut self) -> Result<()> {
        self.capturing = true;
        log::info!("Capture started (PCM reader)");
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.capturing {
            anyhow::bail!("capture not started");
        }
        // Fill the whole chunk unless the stream ends first
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn stop_capture(&mut self) {
        if self.capturing {
            self.capturing = false;
            log::info!("Capture stopped (PCM reader)");
        }
    }
}
