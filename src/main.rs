//! Preview Sync CLI
//!
//! Boots a local sandbox with the starter project, runs its dev server and
//! writes edits read from stdin into the editable file.

use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use preview_sync::sandbox::LocalSandboxProvider;
use preview_sync::template::{starter, FileTree};
use preview_sync::{EditableSurface, SyncConfig, SyncController, Validate};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [CONFIG.toml]", args[0]);
        eprintln!("\nBoots a sandbox, starts the dev server and syncs edits from stdin.");
        eprintln!("Type the new file contents, then a line with a single '.' to submit.");
        std::process::exit(1);
    }

    if let Err(e) = run(args.get(1).map(PathBuf::from)).await {
        eprintln!("preview-sync failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config_path: Option<PathBuf>) -> preview_sync::Result<()> {
    let config = match &config_path {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    for warning in config.validate().into_result()? {
        tracing::warn!("{}", warning);
    }

    let template = match &config.template_path {
        Some(path) => FileTree::from_json_file(path)?,
        None => starter::project(),
    };

    let provider = LocalSandboxProvider::new(config.sandbox.clone());
    let (controller, inputs) = SyncController::new(provider, template, config);

    let session = async {
        let summary = controller.boot().await?;
        tracing::debug!(summary = %serde_json::to_string(&summary)?, "boot summary");

        let url = controller.wait_for_preview().await?;
        println!("Preview ready at {}", url);
        println!("Editing {}", controller.config().editable_path);

        read_edits(BufReader::new(tokio::io::stdin()), controller.editor()).await?;
        tracing::info!("stdin closed, serving until interrupted");
        std::future::pending::<()>().await;
        Ok::<_, preview_sync::Error>(())
    };

    let result = tokio::select! {
        result = session => result,
        _ = controller.run_edit_listener(inputs) => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
            Ok(())
        }
    };

    controller.shutdown().await;
    result
}

/// Reads edits from `reader` until EOF.
///
/// Lines accumulate until a line holding a single `.`, which submits the
/// accumulated text as one input event. Text left over at EOF is submitted
/// as a final edit.
async fn read_edits<R>(reader: R, editor: &EditableSurface) -> preview_sync::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut buffer = String::new();

    while let Some(line) = lines.next_line().await? {
        if line == "." {
            editor.input(std::mem::take(&mut buffer));
            println!("Submitted edit");
            continue;
        }
        buffer.push_str(&line);
        buffer.push('\n');
    }

    if !buffer.is_empty() {
        editor.input(buffer);
        println!("Submitted final edit at end of input");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn submitted(input: &str) -> Vec<String> {
        let (editor, mut events) = EditableSurface::new();
        read_edits(input.as_bytes(), &editor).await.unwrap();
        drop(editor);

        let mut values = Vec::new();
        while let Some(event) = events.recv().await {
            values.push(event.value);
        }
        values
    }

    #[tokio::test]
    async fn dot_line_submits_accumulated_text() {
        assert_eq!(
            submitted("first\nline\n.\nsecond\n.\n").await,
            vec!["first\nline\n", "second\n"]
        );
    }

    #[tokio::test]
    async fn text_after_last_dot_is_submitted_at_eof() {
        assert_eq!(
            submitted("kept\n.\ntrailing edit\n").await,
            vec!["kept\n", "trailing edit\n"]
        );
    }

    #[tokio::test]
    async fn empty_input_submits_nothing() {
        assert!(submitted("").await.is_empty());
    }
}
