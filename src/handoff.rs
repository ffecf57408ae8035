// src/handoff.rs

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::config::Paths;
use crate::error::SetupError;
use crate::sys::secrets::Environment;

/// What the entrypoint turns into once setup is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    /// Explicit command from the container arguments.
    RunCommand(Vec<String>),
    RunSupervisor { binary: PathBuf, config: PathBuf },
    /// Nothing to run.
    Fail,
}

impl Handoff {
    /// Arguments starting with `-` are flags for the supervisor.
    pub fn decide(args: &[String], paths: &Paths) -> Self {
        let supervisor_present = paths.supervisor_bin.is_file();

        match args.first() {
            Some(first) if first.starts_with('-') && supervisor_present => {
                let mut argv = vec![paths.supervisor_bin.display().to_string()];
                argv.extend(args.iter().cloned());
                Self::RunCommand(argv)
            }
            Some(_) => Self::RunCommand(args.to_vec()),
            None if supervisor_present => Self::RunSupervisor {
                binary: paths.supervisor_bin.clone(),
                config: paths.supervisor_conf.clone(),
            },
            None => Self::Fail,
        }
    }

    /// Replaces the current process image. Only returns on failure.
    pub fn execute(self, env: &Environment) -> SetupError {
        let mut cmd = match self {
            Self::RunCommand(argv) => {
                let Some((program, rest)) = argv.split_first() else {
                    return SetupError::NoHandoffTarget;
                };
                let mut cmd = Command::new(program);
                cmd.args(rest);
                cmd
            }
            Self::RunSupervisor { binary, config } => {
                let mut cmd = Command::new(binary);
                cmd.arg("-c").arg(config);
                cmd
            }
            Self::Fail => return SetupError::NoHandoffTarget,
        };

        let program = cmd.get_program().to_string_lossy().into_owned();
        info!("** Executing '{}'", program);

        cmd.env_clear().envs(env.iter());
        let source = cmd.exec();
        SetupError::Exec { program, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn with_supervisor() -> (TempDir, Paths) {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        fs::create_dir_all(paths.supervisor_bin.parent().unwrap()).unwrap();
        fs::write(&paths.supervisor_bin, "#!/bin/sh\n").unwrap();
        (dir, paths)
    }

    #[test]
    fn explicit_command_wins() {
        let (_dir, paths) = with_supervisor();
        assert_eq!(
            Handoff::decide(&args(&["zabbix_server", "-f"]), &paths),
            Handoff::RunCommand(args(&["zabbix_server", "-f"]))
        );
    }

    #[test]
    fn leading_dash_goes_to_supervisor() {
        let (_dir, paths) = with_supervisor();
        let bin = paths.supervisor_bin.display().to_string();
        assert_eq!(
            Handoff::decide(&args(&["-n"]), &paths),
            Handoff::RunCommand(vec![bin, "-n".to_string()])
        );
    }

    #[test]
    fn supervisor_by_default() {
        let (_dir, paths) = with_supervisor();
        assert_eq!(
            Handoff::decide(&[], &paths),
            Handoff::RunSupervisor {
                binary: paths.supervisor_bin.clone(),
                config: paths.supervisor_conf.clone(),
            }
        );
    }

    #[test]
    fn nothing_to_run() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::under(dir.path());
        assert_eq!(Handoff::decide(&[], &paths), Handoff::Fail);
        assert!(matches!(
            Handoff::Fail.execute(&Environment::default()),
            SetupError::NoHandoffTarget
        ));
    }

    #[test]
    fn exec_failure_is_reported() {
        let err = Handoff::RunCommand(args(&["/nonexistent/zbx-binary"])).execute(&Environment::default());
        // A failed `exec` leaves SIGPIPE at SIG_DFL in this (shared) test
        // process; restore the harness default so other tests aren't killed.
        unsafe {
            let _ = nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGPIPE,
                nix::sys::signal::SigHandler::SigIgn,
            );
        }
        assert!(matches!(err, SetupError::Exec { .. }));
    }
}
