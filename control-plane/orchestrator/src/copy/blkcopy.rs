//! Path to path copy through the system block copy utility.

use super::{calculate_count, CopyError, CopyParams, CopySpawn};
use snafu::ResultExt;
use std::path::Path;
use tokio::process::Command;

/// The block copy utility.
const BLKCOPY_BIN: &str = "dd";
/// The ionice utility.
const IONICE_BIN: &str = "ionice";

/// Build the argv for one path to path copy.
/// Split from the execution so the argument computation stays pure.
fn build_argv(
    source: &Path,
    target: &Path,
    params: &CopyParams,
    direct: bool,
) -> Vec<String> {
    let (block_size, count) = calculate_count(params.size_mb, &params.block_size);
    let mut argv = Vec::new();
    if let Some(throttle) = &params.throttle {
        argv.extend(throttle.prefix().iter().cloned());
    }
    if let Some(ionice) = &params.ionice {
        argv.push(IONICE_BIN.to_string());
        argv.push(ionice.clone());
    }
    argv.push(BLKCOPY_BIN.to_string());
    argv.push(format!("if={}", source.display()));
    argv.push(format!("of={}", target.display()));
    argv.push(format!("count={count}"));
    argv.push(format!("bs={block_size}"));

    let mut conv = Vec::new();
    if direct {
        argv.push("iflag=direct".to_string());
        argv.push("oflag=direct".to_string());
    } else if params.sync {
        conv.push("fdatasync");
    }
    if params.sparse {
        conv.push("sparse");
    }
    if !conv.is_empty() {
        argv.push(format!("conv={}", conv.join(",")));
    }
    argv
}

/// Check whether the device underneath `path` accepts directed I/O, by asking
/// the copy utility for a zero-block directed read.
async fn supports_direct_io(path: &Path) -> bool {
    let output = Command::new(BLKCOPY_BIN)
        .arg(format!("if={}", path.display()))
        .arg("of=/dev/null")
        .arg("count=0")
        .arg("bs=4096")
        .arg("iflag=direct")
        .output()
        .await;
    matches!(output, Ok(output) if output.status.success())
}

/// Copy `count` blocks from `source` to `target` through the block copy
/// utility, applying directed I/O when both devices accept it.
pub(super) async fn copy_path(
    source: &Path,
    target: &Path,
    params: &CopyParams,
) -> Result<(), CopyError> {
    let direct = supports_direct_io(source).await && supports_direct_io(target).await;
    let argv = build_argv(source, target, params, direct);
    tracing::debug!(command = argv.join(" "), "Copying volume data");

    let command = argv.join(" ");
    let output = Command::new(&argv[0])
        .args(&argv[1 ..])
        .output()
        .await
        .context(CopySpawn {
            command: command.clone(),
        })?;
    if !output.status.success() {
        return Err(CopyError::CopyProcess {
            command,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}
