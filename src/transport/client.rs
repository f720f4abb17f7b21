use crate::transport::channel;
use anyhow::Context;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

/// One-shot client of a bridge channel: one connection per request line.
pub struct BridgeClient {
    path: PathBuf,
}

impl BridgeClient {
    pub fn new(channel: &str) -> Self {
        Self {
            path: channel::socket_path(channel),
        }
    }

    /// Send a request line, return the response line without its terminator.
    pub fn send_line(&self, line: &str) -> anyhow::Result<String> {
        let mut stream = UnixStream::connect(&self.path)
            .with_context(|| format!("connect to {}", self.path.display()))?;
        stream.write_all(line.trim_end_matches(['\r', '\n']).as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        let mut response = String::new();
        BufReader::new(stream)
            .read_line(&mut response)
            .context("read response")?;
        if response.is_empty() {
            anyhow::bail!("bridge closed the connection without a response");
        }

        Ok(response.trim_end_matches(['\r', '\n']).to_string())
    }
}
