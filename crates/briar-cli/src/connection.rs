//! The client-side connection: send statements, read result blocks.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use anyhow::{Context, Result};

use briar_server::{COLS_PREFIX, ERR_PREFIX, OK_PREFIX};

/// One parsed server response.
#[derive(Debug, Default)]
pub struct Response {
    /// Column names, when the result is a row set.
    pub columns: Vec<String>,
    /// Row values as text.
    pub rows: Vec<Vec<String>>,
    /// Informational lines (DDL acks, affected counts).
    pub messages: Vec<String>,
    /// Error text, when the statement failed.
    pub error: Option<String>,
    /// Whether the session is inside a transaction.
    pub in_txn: bool,
}

/// A connection to the server.
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    /// Connects to `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .with_context(|| format!("cannot connect to {}:{}", host, port))?;
        let writer = stream.try_clone().context("cannot clone stream")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Sends one `;`-terminated statement and reads its response block.
    pub fn request(&mut self, statement: &str) -> Result<Response> {
        writeln!(self.writer, "{}", statement).context("send failed")?;

        let mut response = Response::default();
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).context("read failed")?;
            if read == 0 {
                anyhow::bail!("server closed the connection");
            }
            let line = line.trim_end();

            if let Some(rest) = line.strip_prefix(OK_PREFIX) {
                let mut parts = rest.split_whitespace();
                let _rows: usize = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
                response.in_txn = parts.next() == Some("1");
                return Ok(response);
            }
            if let Some(rest) = line.strip_prefix(ERR_PREFIX) {
                response.error = Some(rest.trim().to_string());
                return Ok(response);
            }
            if let Some(rest) = line.strip_prefix(COLS_PREFIX) {
                response.columns = rest
                    .trim_start()
                    .split('\t')
                    .map(str::to_string)
                    .collect();
                continue;
            }
            if !response.columns.is_empty() {
                response
                    .rows
                    .push(line.split('\t').map(str::to_string).collect());
            } else {
                response.messages.push(line.to_string());
            }
        }
    }
}
