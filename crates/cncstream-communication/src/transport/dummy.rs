//! Dummy transport
//!
//! Stands in for a controller when no port is available. Every G-code line
//! is acknowledged with `ok`, probe moves produce a `PRB` report at a fixed
//! height, and `?` yields an idle status report. Real-time bytes other than
//! `?` are swallowed.

use super::Transport;
use std::collections::VecDeque;
use std::io;
use std::thread;
use std::time::Duration;

/// No-op transport that acknowledges everything
#[derive(Debug)]
pub struct DummyTransport {
    replies: VecDeque<String>,
    partial: String,
    probe_z: f64,
}

impl DummyTransport {
    /// Create a dummy whose probe touches off at Z 0
    pub fn new() -> Self {
        Self::with_probe_z(0.0)
    }

    /// Create a dummy whose probe touches off at `probe_z`
    pub fn with_probe_z(probe_z: f64) -> Self {
        Self {
            replies: VecDeque::new(),
            partial: String::new(),
            probe_z,
        }
    }

    fn respond_to(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        tracing::debug!("Sent: {} (dummy)", line);
        if line.to_ascii_uppercase().starts_with("G38") {
            self.replies
                .push_back(format!("[PRB:0.000,0.000,{:.3}:1]", self.probe_z));
        }
        self.replies.push_back("ok".to_string());
    }
}

impl Default for DummyTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DummyTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if let [byte] = data {
            if *byte != b'\n' && *byte != b'\r' {
                if *byte == b'?' {
                    self.replies
                        .push_back("<Idle|MPos:0.000,0.000,0.000|FS:0,0>".to_string());
                }
                return Ok(());
            }
        }

        self.partial.push_str(&String::from_utf8_lossy(data));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.respond_to(&line);
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        match self.replies.pop_front() {
            Some(line) => Ok(Some(line.into_bytes())),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn reset_input_buffer(&mut self) -> io::Result<()> {
        self.replies.clear();
        Ok(())
    }

    fn reset_output_buffer(&mut self) -> io::Result<()> {
        self.partial.clear();
        Ok(())
    }

    fn is_dummy(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        "dummy".to_string()
    }
}
