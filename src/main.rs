use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use arcgis_sync::gis::FeatureServiceProvider;
use arcgis_sync::{build_orchestrator, config, gis, observability, serve};
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser)]
#[command(
	name = "arcgis-sync",
	about = "Sync pub/sub JSON messages into ArcGIS feature layers"
)]
struct Cli {
	/// Configuration file (yaml, json or toml)
	#[arg(long, short, global = true, env = "ARCSYNC_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Serve the pub/sub push endpoint (default)
	Serve,
	/// Run one sync from a JSON file and print the outcome
	Process {
		/// JSON document, as carried in a pub/sub message
		file: PathBuf,
	},
	/// Delete features and their attachments from a layer
	DeleteFeatures {
		#[arg(long)]
		layer: i64,
		/// Object ids to delete
		#[arg(required = true)]
		object_ids: Vec<i64>,
	},
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let settings = config::load(cli.config.as_deref()).context("loading configuration")?;
	let state = observability::init_observability(settings.effective_log_level())?;

	match cli.command.unwrap_or(Commands::Serve) {
		Commands::Serve => serve(settings, state.metrics).await,
		Commands::Process { file } => {
			let text = tokio::fs::read_to_string(&file)
				.await
				.with_context(|| format!("reading {}", file.display()))?;
			let document: serde_json::Value =
				serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;

			let orchestrator = build_orchestrator(settings, state.metrics).await?;
			let (body, status) = orchestrator.process(&document).await.as_response();
			println!("{} {}", status, body);
			Ok(())
		}
		Commands::DeleteFeatures { layer, object_ids } => {
			let provider = gis::ArcGisProvider::new(
				settings.arcgis.clone(),
				settings.mapping.disable_updated_at,
			)?;
			let service = provider.open().await.context("opening feature service session")?;
			let results = service.delete_features(layer, &object_ids).await?;

			let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
			for r in &failed {
				error!(
					"Deleting feature {:?} on layer {} failed: {}",
					r.object_id,
					layer,
					r.error.as_ref().map(|e| e.to_string()).unwrap_or_default()
				);
			}
			info!(
				"Deleted {} of {} feature(s) on layer {}",
				results.len() - failed.len(),
				object_ids.len(),
				layer
			);
			if !failed.is_empty() {
				bail!("{} feature(s) could not be deleted", failed.len());
			}
			Ok(())
		}
	}
}
