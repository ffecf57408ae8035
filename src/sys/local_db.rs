// src/sys/local_db.rs
//
// Bundled MariaDB for the appliance when DB_SERVER_HOST is localhost. It only
// lives for the duration of the setup pipeline; the supervisor starts its own
// instance after the handoff.

use std::path::Path;
use std::process::Stdio;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use regex::Regex;
use tokio::fs;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::config::Paths;
use crate::error::{SetupError, SetupResult};
use crate::sys::files::write_atomically;

const MYSQL_OWNER: &str = "mysql:mysql";

/// Comments out `bind-address` and `log-error` so the server listens on all
/// interfaces and logs to stderr.
pub fn comment_out_listeners(contents: &str) -> Result<String, String> {
    let re = Regex::new(r"(?m)^(bind-address|log-error)").map_err(|e| e.to_string())?;
    Ok(re.replace_all(contents, "#$1").into_owned())
}

async fn patch_server_conf(path: &Path) -> Result<(), String> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("**** Configuration file '{}' does not exist", path.display());
            return Ok(());
        }
        Err(e) => return Err(format!("Failed to read '{}': {}", path.display(), e)),
    };

    let patched = comment_out_listeners(&contents)?;
    if patched != contents {
        write_atomically(path, &patched)?;
    }
    Ok(())
}

async fn run(program: &str, args: &[&str]) -> Result<(), String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| format!("Failed to spawn {}: {}", program, e))?;

    if !output.status.success() {
        return Err(format!(
            "{} exited with code {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}

/// Handle on the detached `mysqld` started for provisioning.
pub struct LocalMysqld {
    child: Child,
}

impl LocalMysqld {
    /// Prepares the data directory if needed and starts the server in the
    /// background. Readiness is left to the caller's gate.
    pub async fn start(paths: &Paths) -> SetupResult<Self> {
        info!("** Preparing local MySQL server");

        patch_server_conf(&paths.mysql_conf)
            .await
            .map_err(SetupError::command("MySQL configuration failed"))?;

        for dir in [&paths.mysql_data_dir, &paths.mysql_run_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SetupError::Command {
                    context: "MySQL directories",
                    message: format!("'{}': {}", dir.display(), e),
                })?;
        }

        let data_dir = paths.mysql_data_dir.display().to_string();
        if !fs::try_exists(paths.mysql_data_dir.join("mysql")).await.unwrap_or(false) {
            info!("** Initializing MySQL data directory '{}'", data_dir);
            run(
                "mysql_install_db",
                &["--user=mysql", &format!("--datadir={data_dir}")],
            )
            .await
            .map_err(SetupError::command("MySQL data directory initialization failed"))?;
        }

        let run_dir = paths.mysql_run_dir.display().to_string();
        if let Err(e) = run("chown", &["-R", MYSQL_OWNER, &data_dir, &run_dir]).await {
            warn!("**** Failed to fix MySQL directory ownership: {}", e);
        }

        info!("** Starting MySQL server in background mode");
        let child = Command::new("mysqld")
            .arg("--user=mysql")
            .arg(format!("--datadir={data_dir}"))
            .arg("--skip-networking=0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SetupError::Command {
                context: "MySQL server start failed",
                message: e.to_string(),
            })?;

        Ok(Self { child })
    }

    /// SIGTERM and wait, so the data files are flushed before the supervisor
    /// starts its own instance.
    pub async fn stop(mut self) {
        info!("** Stopping local MySQL server");

        let Some(id) = self.child.id() else {
            return;
        };
        let pid = Pid::from_raw(id as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            warn!("**** Failed to signal mysqld ({}): {}", pid, e);
            let _ = self.child.kill().await;
            return;
        }

        match self.child.wait().await {
            Ok(status) if !status.success() => {
                warn!("**** mysqld exited with {}", status);
            }
            Err(e) => warn!("**** Failed to wait for mysqld: {}", e),
            Ok(_) => {}
        }
    }
}
