use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use procflow::model::loader::load_definition_from_yaml;
use procflow::runtime::engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process definition to completion in memory
    Run {
        /// Path to the definition YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Number of worker tasks draining the arrival queue
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },

    /// Load and validate a definition without running it
    Validate {
        /// Path to the definition YAML file
        #[arg(long, short)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let definition = load_definition_from_yaml(&file)?;
            info!(
                id = %definition.id,
                activities = definition.activities.len(),
                "definition is valid"
            );
        }

        Commands::Run {
            file,
            workers,
            timeout_secs,
        } => {
            let definition = load_definition_from_yaml(&file)?;
            let definition_id = definition.id.clone();

            let engine = Arc::new(Engine::new());
            engine.register_definition(definition);

            let instance_id = engine.start_process(&definition_id)?;
            info!(%instance_id, "instance started");

            let mut handles = Vec::new();
            for _ in 0..workers {
                let engine = engine.clone();
                handles.push(tokio::spawn(async move {
                    engine.run_worker().await;
                }));
            }

            let deadline = Duration::from_secs(timeout_secs);
            let completed = tokio::time::timeout(deadline, async {
                while !engine.is_completed(instance_id) {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await
            .is_ok();

            for handle in handles {
                handle.abort();
            }

            let decisions = engine.decisions(instance_id)?;
            println!("{}", serde_json::to_string_pretty(&decisions)?);

            if !completed {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&engine.snapshot(instance_id)?)?
                );
                return Err(anyhow!(
                    "instance did not complete within {timeout_secs}s; dumped remaining tree"
                ));
            }
            info!(%instance_id, "instance completed");
        }
    }

    Ok(())
}
