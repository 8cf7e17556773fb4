//! `offrender` command line surface.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use offrender_models::write_template;

use crate::config::OrchestratorConfig;
use crate::error::PipelineResult;
use crate::pipeline::GcePipeline;
use crate::progress::ConsoleProgress;

const AFTER_HELP: &str = "\
File arguments are resolved against the working directory \
($OFFRENDER_HOME, or ~/offrender_data when unset).

If you quit a run early, delete the render node it created from \
https://console.cloud.google.com/compute/instances";

/// Renders Blender scenes on a short-lived Compute Engine node.
#[derive(Debug, Parser)]
#[command(name = "offrender", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a job config template to edit before launching
    Init,

    /// Create a node, render the scene, download the output, delete the node
    Render {
        /// Scene file (.blend)
        scene: PathBuf,
        /// Job config written by `init`
        config: PathBuf,
    },

    /// Create a node, configure it and stop it for later `rnd` runs
    Prep {
        config: PathBuf,
    },

    /// Render on the node prepared by `prep`, stopping it afterwards
    Rnd {
        scene: PathBuf,
        config: PathBuf,
    },

    /// Delete the node prepared by `prep` and remove its job config
    Del {
        config: PathBuf,
    },
}

/// Run one command against Compute Engine.
pub async fn run(cli: Cli, config: OrchestratorConfig) -> PipelineResult<()> {
    tokio::fs::create_dir_all(&config.root).await?;
    let root = config.root.clone();
    let pipeline = GcePipeline::gce(config, ConsoleProgress::new());

    match cli.command {
        Command::Init => {
            let path = write_template(&root, Utc::now())?;
            println!("Edit the file at '{}' before launching.", path.display());
        }
        Command::Render { scene, config } => {
            pipeline
                .render_ephemeral(&root.join(scene), &root.join(config))
                .await?;
        }
        Command::Prep { config } => {
            let name = pipeline.prepare(&root.join(&config)).await?;
            println!(
                "Render with: offrender rnd <scene> {}  (node {})",
                config.display(),
                name
            );
        }
        Command::Rnd { scene, config } => {
            pipeline
                .render_prepared(&root.join(scene), &root.join(config))
                .await?;
        }
        Command::Del { config } => {
            pipeline.teardown(&root.join(config)).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["offrender", "render", "shot.blend", "job.yaml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Render { ref scene, ref config }
                if scene == &PathBuf::from("shot.blend") && config == &PathBuf::from("job.yaml")
        ));

        let cli = Cli::try_parse_from(["offrender", "del", "job.yaml"]).unwrap();
        assert!(matches!(cli.command, Command::Del { .. }));

        assert!(Cli::try_parse_from(["offrender", "render", "shot.blend"]).is_err());
        assert!(Cli::try_parse_from(["offrender", "launch"]).is_err());
    }

    #[tokio::test]
    async fn test_init_writes_template() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("data");
        let cli = Cli::try_parse_from(["offrender", "init"]).unwrap();

        run(cli, OrchestratorConfig::with_root(&root)).await.unwrap();

        let written: Vec<_> = std::fs::read_dir(&root).unwrap().collect();
        assert_eq!(written.len(), 1);
        let name = written[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().ends_with(".yaml"));
    }
}
