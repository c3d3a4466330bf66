//! Child process running the recorder, with its output collected line by line.

use std::env;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Result, anyhow};

#[derive(Debug)]
pub enum ProcessEvent {
    /// A line from stdout or stderr
    Output(String),
    Error(String),
}

pub struct ProcessManager {
    child: Option<Child>,
    event_rx: Receiver<ProcessEvent>,
}

impl ProcessManager {
    pub fn spawn(binary: &str, args: &[String], envs: &[(&str, String)]) -> Result<Self> {
        let binary_path = find_binary(binary);

        let mut child = Command::new(&binary_path)
            .args(args)
            .envs(envs.iter().map(|(var, value)| (*var, value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Logs stay plain text inside the output view
            .env("NO_COLOR", "1")
            .spawn()
            .map_err(|e| anyhow!("Failed to start '{}' at '{}': {}", binary, binary_path.display(), e))?;

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, "stdout", tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, "stderr", tx);
        }

        Ok(Self {
            child: Some(child),
            event_rx: rx,
        })
    }

    pub fn try_recv(&self) -> Option<ProcessEvent> {
        self.event_rx.try_recv().ok()
    }

    /// `Some(exit code)` once the process has exited; the code is `None` when
    /// it was killed by a signal.
    pub fn check_exit(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                self.child = None;
                Some(status.code())
            }
            Err(_) => {
                self.child = None;
                Some(None)
            }
        }
    }

    pub fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, name: &'static str, tx: Sender<ProcessEvent>) {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let event = match line {
                Ok(line) => ProcessEvent::Output(line),
                Err(e) => ProcessEvent::Error(format!("{} error: {}", name, e)),
            };
            let failed = matches!(event, ProcessEvent::Error(_));
            if tx.send(event).is_err() || failed {
                break;
            }
        }
    });
}

/// Locate a sibling binary of this executable, then `target/{release,debug}`,
/// then fall back to `PATH`.
pub fn find_binary(binary_name: &str) -> PathBuf {
    let file_name = format!("{}{}", binary_name, env::consts::EXE_SUFFIX);

    if let Ok(exe_path) = env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        let sibling = exe_dir.join(&file_name);
        if sibling.exists() {
            return sibling;
        }
    }

    for profile in ["release", "debug"] {
        let candidate = PathBuf::from("target").join(profile).join(&file_name);
        if candidate.exists() {
            return candidate;
        }
    }

    PathBuf::from(binary_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_binary_falls_back_to_path_lookup() {
        assert_eq!(find_binary("no-such-triggersync-tool"), PathBuf::from("no-such-triggersync-tool"));
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        assert!(ProcessManager::spawn("no-such-triggersync-tool", &[], &[]).is_err());
    }
}
