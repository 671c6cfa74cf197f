//! Eval and the three map operators.
//!
//! Each map task runs the user command in a fresh scratch directory
//! under `_tempdirs/` on the cpu pool, then pushes outputs through the
//! in-process client. The first nonzero exit aborts the sibling tasks
//! on this node; cancellation does not propagate to other nodes, which
//! stay best-effort fail-fast from the caller's side.

use std::path::Path;
use std::sync::Arc;

use s4_protocol::{keys, CmdOutput, Result, S4Error, SCHEME};
use tokio::task::JoinSet;
use tracing::warn;

use crate::node::Node;
use crate::shell;
use crate::storage;

/// Handle `POST /eval?key=&b64cmd=`: stream one blob through a user
/// command, capped at 1000 lines of stdout.
pub async fn eval(node: &Arc<Node>, key: &str, cmd: &str) -> Result<String> {
    keys::validate_blob_key(key)?;
    node.assert_owner(key)?;
    let blob = node.abs_blob_path(key)?;
    let present = {
        let blob = blob.clone();
        node.pools
            .solo
            .run_blocking(move || storage::exists(&blob))
            .await?
    };
    if !present {
        return Err(S4Error::not_found(format!("no such key: {}", key)));
    }

    let shell_cmd = format!("< {} {} | head -n 1000", blob.display(), cmd);
    let timeout = node.settings.timeout;
    let out = node
        .pools
        .io
        .run(async { run_user_cmd(&shell_cmd, None, timeout, "eval").await })
        .await?;
    Ok(out.stdout)
}

/// Handle `POST /map`: one task per `(inkey, outkey)` pair this node
/// owns, each `input | cmd > output` then a cluster put of the output.
pub async fn map(node: &Arc<Node>, pairs: Vec<(String, String)>, cmd: String) -> Result<()> {
    for (inkey, outkey) in &pairs {
        node.assert_owner(inkey)?;
        keys::validate_blob_key(outkey)?;
    }
    let mut set = JoinSet::new();
    for (inkey, outkey) in pairs {
        let node = Arc::clone(node);
        let cmd = cmd.clone();
        set.spawn(async move {
            let _permit = node.pools.cpu.acquire().await;
            map_one(&node, &inkey, &outkey, &cmd).await
        });
    }
    drive(set, node.settings.timeout, "map").await
}

async fn map_one(node: &Arc<Node>, inkey: &str, outkey: &str, cmd: &str) -> Result<()> {
    let inpath = node.abs_blob_path(inkey)?;
    let tempdir = storage::create_temp_dir(&node.data_root)?;
    let result = async {
        let outfile = tempdir.join("output");
        let shell_cmd = format!(
            "cd {}; < {} {} > {}",
            tempdir.display(),
            inpath.display(),
            cmd,
            outfile.display()
        );
        run_user_cmd(&shell_cmd, None, node.settings.timeout, "map").await?;
        node.client().put_file(&outfile, outkey).await
    }
    .await;
    remove_temp_dir(&tempdir);
    result
}

/// Handle `POST /map_to_n`: the user command writes files into the
/// scratch directory and emits their names on stdout; each one is
/// pushed to `<outdir><input partition>/<name>`.
pub async fn map_to_n(node: &Arc<Node>, pairs: Vec<(String, String)>, cmd: String) -> Result<()> {
    for (inkey, outdir) in &pairs {
        node.assert_owner(inkey)?;
        validate_outdir(outdir)?;
    }
    let mut set = JoinSet::new();
    for (inkey, outdir) in pairs {
        let node = Arc::clone(node);
        let cmd = cmd.clone();
        set.spawn(async move {
            let _permit = node.pools.cpu.acquire().await;
            map_to_n_one(&node, &inkey, &outdir, &cmd).await
        });
    }
    drive(set, node.settings.timeout, "map_to_n").await
}

async fn map_to_n_one(node: &Arc<Node>, inkey: &str, outdir: &str, cmd: &str) -> Result<()> {
    let inpath = node.abs_blob_path(inkey)?;
    let basename = keys::partition_id(inkey).to_string();
    let tempdir = storage::create_temp_dir(&node.data_root)?;
    let result = async {
        let shell_cmd = format!("cd {}; < {} {}", tempdir.display(), inpath.display(), cmd);
        let out = run_user_cmd(&shell_cmd, None, node.settings.timeout, "map_to_n").await?;
        for name in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
            let local = tempdir.join(name);
            let outkey = format!("{}{}/{}", outdir, basename, name);
            node.client().put_file(&local, &outkey).await?;
            storage::remove_file_quiet(&local);
        }
        Ok(())
    }
    .await;
    remove_temp_dir(&tempdir);
    result
}

/// Handle `POST /map_from_n`: merge one partition group. The members'
/// absolute local paths go to the user command's stdin; its stdout
/// becomes `<outdir><partition id>`.
pub async fn map_from_n(
    node: &Arc<Node>,
    inkeys: Vec<String>,
    outdir: &str,
    cmd: String,
) -> Result<()> {
    if inkeys.is_empty() {
        return Err(S4Error::BadRequest("map_from_n with no input keys".to_string()));
    }
    validate_outdir(outdir)?;
    let mut inpaths = Vec::with_capacity(inkeys.len());
    for inkey in &inkeys {
        node.assert_owner(inkey)?;
        inpaths.push(node.abs_blob_path(inkey)?);
    }
    let partition = keys::partition_id(&inkeys[0]).to_string();
    let outkey = format!("{}{}", outdir, partition);
    let stdin = inpaths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";

    let _permit = node.pools.cpu.acquire().await;
    let tempdir = storage::create_temp_dir(&node.data_root)?;
    let result = async {
        let outfile = tempdir.join("output");
        let shell_cmd = format!("cd {}; {} > {}", tempdir.display(), cmd, outfile.display());
        run_user_cmd(&shell_cmd, Some(&stdin), node.settings.timeout, "map_from_n").await?;
        node.client().put_file(&outfile, &outkey).await
    }
    .await;
    remove_temp_dir(&tempdir);
    result
}

/// Run a user command, folding nonzero exit and deadline kills into
/// `UserCommand` results.
async fn run_user_cmd(
    shell_cmd: &str,
    stdin: Option<&str>,
    timeout: std::time::Duration,
    op: &str,
) -> Result<CmdOutput> {
    match shell::run(shell_cmd, stdin, Some(timeout)).await {
        Ok(out) if out.success() => Ok(out),
        Ok(out) => Err(S4Error::UserCommand(out)),
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            Err(S4Error::UserCommand(CmdOutput::timeout(op)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Await every task; the first failure aborts the rest. The whole batch
/// shares one deadline.
async fn drive(mut set: JoinSet<Result<()>>, deadline: std::time::Duration, op: &str) -> Result<()> {
    let outcome = tokio::time::timeout(deadline, async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => return Err(S4Error::internal(format!("{} task died: {}", op, e))),
            }
        }
        Ok(())
    })
    .await;
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            set.abort_all();
            Err(e)
        }
        Err(_) => {
            set.abort_all();
            Err(S4Error::UserCommand(CmdOutput::timeout(op)))
        }
    }
}

fn validate_outdir(outdir: &str) -> Result<()> {
    keys::validate_key(outdir)?;
    if !outdir.starts_with(SCHEME) || !outdir.ends_with('/') {
        return Err(S4Error::InvalidKey(format!(
            "output directory must be s4://...: {}",
            outdir
        )));
    }
    Ok(())
}

fn remove_temp_dir(tempdir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(tempdir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove scratch dir {}: {}", tempdir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_outdir() {
        assert!(validate_outdir("s4://b/out/").is_ok());
        assert!(validate_outdir("s4://b/out").is_err());
        assert!(validate_outdir("b/out/").is_err());
    }

    #[tokio::test]
    async fn test_run_user_cmd_nonzero_is_user_error() {
        let err = run_user_cmd("exit 7", None, std::time::Duration::from_secs(5), "map")
            .await
            .unwrap_err();
        match err {
            S4Error::UserCommand(out) => assert_eq!(out.exitcode, 7),
            other => panic!("unexpected error: {:?}", other.to_string()),
        }
    }

    #[tokio::test]
    async fn test_run_user_cmd_timeout_is_synthetic() {
        let err = run_user_cmd(
            "sleep 5",
            None,
            std::time::Duration::from_millis(100),
            "map_to_n",
        )
        .await
        .unwrap_err();
        match err {
            S4Error::UserCommand(out) => {
                assert_eq!(out.exitcode, 1);
                assert_eq!(out.stderr, "map_to_n timeout");
            }
            other => panic!("unexpected error: {:?}", other.to_string()),
        }
    }
}
