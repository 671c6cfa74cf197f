//! Subprocess runner.
//!
//! Every command line runs under `bash -c 'set -euo pipefail; ...'` with
//! `LC_ALL=C` and its own process group. Nonzero exit is returned as
//! data in [`CmdOutput`]; only spawn failures and deadline kills are
//! errors. A deadline kill takes down the whole process group, so a
//! `recv | xxh3 | ...` pipeline cannot leave a listener behind.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use s4_protocol::CmdOutput;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Run a shell pipeline to completion.
pub async fn run(cmd: &str, stdin: Option<&str>, timeout: Option<Duration>) -> io::Result<CmdOutput> {
    debug!("run: {}", cmd);
    let mut command = Command::new("bash");
    command
        .arg("-c")
        .arg(format!("set -euo pipefail; {}", cmd))
        .env("LC_ALL", "C")
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pid = child.id();

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            handle.write_all(input.as_bytes()).await?;
            handle.shutdown().await?;
        }
    }

    let output = match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                kill_group(pid);
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timeout after {:?} on cmd: {}", deadline, cmd),
                ));
            }
        },
        None => child.wait_with_output().await?,
    };

    Ok(CmdOutput {
        exitcode: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
    })
}

fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
}
