// src/sys/database.rs

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::DatabaseTarget;
use crate::sys::traits::DatabaseClient;

const DUMP_CHUNK_SIZE: usize = 64 * 1024;
const CONNECT_TIMEOUT_SECS: u32 = 10;

type Chunk = Result<Vec<u8>, String>;

/// MySQL/MariaDB access through the stock `mysql` and `mysqladmin` clients.
///
/// 🛡️ The password travels in `MYSQL_PWD` for the child only, never on argv
/// where `ps` would show it.
pub struct MysqlCli {
    host: String,
    port: u16,
    user: String,
    password: SecretString,
    /// Directory holding the client binaries; `None` resolves them via `PATH`.
    bin_dir: Option<PathBuf>,
}

impl MysqlCli {
    pub fn new(target: &DatabaseTarget) -> Self {
        Self {
            host: target.host.clone(),
            port: target.port,
            user: target.root_user.clone(),
            password: target.root_password.clone(),
            bin_dir: None,
        }
    }

    #[cfg(test)]
    fn with_bin_dir(mut self, dir: &Path) -> Self {
        self.bin_dir = Some(dir.to_path_buf());
        self
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = match &self.bin_dir {
            Some(dir) => Command::new(dir.join(program)),
            None => Command::new(program),
        };
        cmd.arg("-h")
            .arg(&self.host)
            .arg("-P")
            .arg(self.port.to_string())
            .arg("-u")
            .arg(&self.user)
            .env("MYSQL_PWD", self.password.expose_secret())
            .stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl DatabaseClient for MysqlCli {
    async fn ping(&self) -> bool {
        let output = self
            .command("mysqladmin")
            .arg("ping")
            .arg("--silent")
            .arg(format!("--connect_timeout={CONNECT_TIMEOUT_SECS}"))
            .output()
            .await;

        match output {
            Ok(out) => !out.stdout.trim_ascii().is_empty(),
            Err(e) => {
                debug!("mysqladmin spawn failed: {}", e);
                false
            }
        }
    }

    async fn query(&self, sql: &str) -> Result<String, String> {
        let output = self
            .command("mysql")
            .args(["--silent", "--skip-column-names", "-e", sql])
            .output()
            .await
            .map_err(|e| format!("mysql spawn failed: {}", e))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn load_dump(&self, database: &str, dump: &Path) -> Result<(), String> {
        let mut child = self
            .command("mysql")
            .args(["--silent", "--skip-column-names", database])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("mysql spawn failed: {}", e))?;

        let stdin = child.stdin.take().ok_or("Failed to open mysql stdin")?;
        let stderr = child.stderr.take().ok_or("Failed to open mysql stderr")?;

        // Drained alongside the import so a chatty client never blocks on a
        // full pipe, and its diagnostics survive an early exit.
        let diagnostics = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected.join("\n")
        });

        // Decompression is blocking work; it feeds the async writer through a
        // bounded channel so the dump is never held in memory as a whole.
        let (tx, rx) = mpsc::channel(8);
        let dump: PathBuf = dump.to_path_buf();
        let decoder = tokio::task::spawn_blocking(move || decompress_into(&dump, tx));

        let pumped = pump(rx, stdin).await;
        let decoded = decoder
            .await
            .map_err(|e| format!("Schema decoder task failed: {}", e));

        if (pumped.is_err() || decoded.is_err()) && matches!(child.try_wait(), Ok(None)) {
            let _ = child.start_kill();
        }
        let status = child
            .wait()
            .await
            .map_err(|e| format!("mysql wait failed: {}", e))?;
        let stderr = diagnostics.await.unwrap_or_default().trim().to_string();

        decoded?;
        match pumped {
            Err(e) if stderr.is_empty() => Err(e),
            Err(e) => Err(format!("{} ({})", stderr, e)),
            Ok(()) if !status.success() => Err(format!(
                "Schema import exited with code {}: {}",
                status.code().unwrap_or(-1),
                stderr
            )),
            Ok(()) => Ok(()),
        }
    }
}

/// Writes every chunk to the client's stdin and closes it at the end.
async fn pump(mut rx: mpsc::Receiver<Chunk>, mut stdin: ChildStdin) -> Result<(), String> {
    while let Some(chunk) = rx.recv().await {
        let bytes = chunk?;
        stdin
            .write_all(&bytes)
            .await
            .map_err(|e| format!("Failed to stream schema: {}", e))?;
    }
    stdin
        .shutdown()
        .await
        .map_err(|e| format!("Failed to close mysql stdin: {}", e))
}

/// Blocking gzip reader. Sends decoded chunks until EOF or the first error.
fn decompress_into(path: &Path, tx: mpsc::Sender<Chunk>) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.blocking_send(Err(format!(
                "Failed to open schema dump '{}': {}",
                path.display(),
                e
            )));
            return;
        }
    };

    let mut decoder = GzDecoder::new(io::BufReader::new(file));
    loop {
        let mut buf = vec![0u8; DUMP_CHUNK_SIZE];
        match decoder.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                if tx.blocking_send(Ok(buf)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(format!("Failed to decompress schema dump: {}", e)));
                return;
            }
        }
    }
}
