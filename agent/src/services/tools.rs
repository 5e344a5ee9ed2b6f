//! Discovery of the external tools the backup pipelines call
use std::process::Stdio;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info};

/// Whether `program --version` can be spawned and exits successfully.
pub async fn answers_version(program: &str) -> bool {
    debug!("Probing {} --version", program);

    match AsyncCommand::new(program)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(_) => false,
    }
}

/// GNU tar is installed as `gtar` on systems whose `tar` is something else.
pub async fn detect_tar_command() -> String {
    let tar = if answers_version("gtar").await {
        "gtar"
    } else {
        "tar"
    };
    info!("Using {} as the archiving tool", tar);
    tar.to_string()
}
