//! The TCP server: accept loop, session threads, statement dispatch.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use briar_common::{ClientId, DatabaseConfig, DbResult};
use briar_engine::{StatementResult, TransactionCoordinator};

use crate::protocol::{split_statements, COLS_PREFIX, ERR_PREFIX, OK_PREFIX};

/// A handle to a running server: its local address and shutdown control.
pub struct ServerHandle {
    /// The bound address (useful when the port was 0).
    pub addr: std::net::SocketAddr,
    accept_thread: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl ServerHandle {
    /// Requests an orderly shutdown and waits for the accept loop to exit.
    pub fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Unblock the accept call.
        let _ = TcpStream::connect(self.addr);
        let _ = self.accept_thread.join();
    }

    /// Blocks until a client requests shutdown (`SHUTDOWN;`).
    pub fn wait(self) {
        let _ = self.accept_thread.join();
    }
}

/// The line-oriented database server.
pub struct Server {
    db: Arc<TransactionCoordinator>,
    config: DatabaseConfig,
    next_session: AtomicU64,
    sessions: Arc<DashMap<u64, std::net::SocketAddr>>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Opens the database and prepares the server.
    pub fn open(config: DatabaseConfig) -> DbResult<Self> {
        let db = Arc::new(TransactionCoordinator::open(config.clone())?);
        Ok(Self {
            db,
            config,
            next_session: AtomicU64::new(1),
            sessions: Arc::new(DashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The coordinator, for embedding and tests.
    pub fn db(&self) -> &Arc<TransactionCoordinator> {
        &self.db
    }

    /// Binds the listener and spawns the accept loop. Each connection is
    /// one session on its own OS thread.
    pub fn start(self: Arc<Self>) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))?;
        let addr = listener.local_addr()?;
        info!(%addr, "server listening");

        let shutdown = Arc::clone(&self.shutdown);
        let server = Arc::clone(&self);
        let accept_thread = thread::spawn(move || {
            for stream in listener.incoming() {
                if server.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        if server.sessions.len() >= server.config.max_connections {
                            warn!("connection limit reached, refusing client");
                            let mut stream = stream;
                            let _ = writeln!(stream, "{} resource: too many connections", ERR_PREFIX);
                            continue;
                        }
                        let server = Arc::clone(&server);
                        thread::spawn(move || server.handle_connection(stream));
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                }
            }
            info!("accept loop stopped");
        });

        Ok(ServerHandle {
            addr,
            accept_thread,
            shutdown,
        })
    }

    fn handle_connection(self: Arc<Self>, stream: TcpStream) {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        let client = ClientId::new(session);
        let peer = stream.peer_addr().ok();
        if let Some(peer) = peer {
            self.sessions.insert(session, peer);
        }
        info!(session, ?peer, "client connected");

        let result = self.serve_session(client, stream);
        if let Err(e) = result {
            debug!(session, error = %e, "session ended with I/O error");
        }

        // Drop any transaction the client left open.
        if self.db.in_transaction(client) {
            let _ = self.db.abort(client, "client disconnected");
        }
        self.sessions.remove(&session);
        info!(session, "client disconnected");
    }

    fn serve_session(&self, client: ClientId, stream: TcpStream) -> std::io::Result<()> {
        let mut writer = stream.try_clone()?;
        let reader = BufReader::new(stream);
        let mut pending = String::new();

        for line in reader.lines() {
            let line = line?;
            pending.push_str(&line);
            pending.push('\n');

            let (statements, rest) = split_statements(&pending);
            pending = rest;

            for statement in statements {
                if statement.trim_end_matches(';').trim().eq_ignore_ascii_case("shutdown") {
                    writeln!(writer, "{} 0 0", OK_PREFIX)?;
                    self.shutdown.store(true, Ordering::SeqCst);
                    let _ = TcpStream::connect((self.config.host.as_str(), self.config.port));
                    return Ok(());
                }
                self.run_statement(client, &statement, &mut writer)?;
            }
        }
        Ok(())
    }

    fn run_statement(
        &self,
        client: ClientId,
        statement: &str,
        writer: &mut TcpStream,
    ) -> std::io::Result<()> {
        debug!(%client, statement, "executing");
        match self.db.execute_sql(client, statement) {
            Ok(StatementResult::Rows { columns, rows }) => {
                writeln!(writer, "{} {}", COLS_PREFIX, columns.join("\t"))?;
                for row in &rows {
                    let line: Vec<String> =
                        row.iter().map(|(_, value)| value.to_string()).collect();
                    writeln!(writer, "{}", line.join("\t"))?;
                }
                self.write_ok(client, writer, rows.len())
            }
            Ok(StatementResult::Count(count)) => {
                writeln!(writer, "affected {}", count)?;
                self.write_ok(client, writer, count)
            }
            Ok(StatementResult::Ack(message)) => {
                writeln!(writer, "{}", message)?;
                self.write_ok(client, writer, 0)
            }
            Err(error) => {
                writeln!(writer, "{} {}", ERR_PREFIX, error.client_message())
            }
        }
    }

    fn write_ok(
        &self,
        client: ClientId,
        writer: &mut TcpStream,
        rows: usize,
    ) -> std::io::Result<()> {
        let in_txn = if self.db.in_transaction(client) { 1 } else { 0 };
        writeln!(writer, "{} {} {}", OK_PREFIX, rows, in_txn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use briar_common::constants::DEFAULT_CHECKPOINT_THRESHOLD;
    use std::io::Read;
    use tempfile::TempDir;

    fn start_server(dir: &TempDir) -> (Arc<Server>, ServerHandle) {
        let config = DatabaseConfig {
            data_dir: dir.path().to_path_buf(),
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            host: "127.0.0.1".to_string(),
            port: 0, // Let the OS pick a free port.
            max_connections: 8,
        };
        let server = Arc::new(Server::open(config).unwrap());
        let handle = Arc::clone(&server).start().unwrap();
        (server, handle)
    }

    fn send(addr: std::net::SocketAddr, statements: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(statements.as_bytes()).unwrap();
        stream.write_all(b"\n").unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_end_to_end_session() {
        let dir = TempDir::new().unwrap();
        let (_server, handle) = start_server(&dir);
        let addr = handle.addr;

        let response = send(
            addr,
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER); \
             INSERT INTO t (id, v) VALUES (1, 10); \
             SELECT * FROM t;",
        );
        assert!(response.contains("table 't' created"));
        assert!(response.contains("affected 1"));
        assert!(response.contains("#cols id\tv"));
        assert!(response.contains("1\t10"));
        assert!(response.contains("!ok 1 0"));

        handle.shutdown();
    }

    #[test]
    fn test_error_line() {
        let dir = TempDir::new().unwrap();
        let (_server, handle) = start_server(&dir);
        let response = send(handle.addr, "SELECT * FROM ghosts;");
        assert!(response.starts_with("!err schema:"));
        handle.shutdown();
    }

    #[test]
    fn test_in_txn_flag_drives_prompt() {
        let dir = TempDir::new().unwrap();
        let (_server, handle) = start_server(&dir);
        let response = send(
            handle.addr,
            "CREATE TABLE t (id INTEGER PRIMARY KEY); BEGIN TRANSACTION;",
        );
        // The last terminator reports an open transaction.
        let last_ok = response
            .lines()
            .filter(|l| l.starts_with(OK_PREFIX))
            .next_back()
            .unwrap();
        assert!(last_ok.ends_with(" 1"));
        handle.shutdown();
    }
}
