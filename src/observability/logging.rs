use log::{Level, LevelFilter};

/// Build the stdout dispatcher: `timestamp level target message`.
pub fn dispatch(level: Level) -> fern::Dispatch {
	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!(
				"{} {:<5} {} {}",
				chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
				record.level(),
				record.target(),
				message
			))
		})
		.level(level.to_level_filter())
		// Transport internals are noisy at debug level.
		.level_for("hyper", LevelFilter::Warn)
		.level_for("hyper_util", LevelFilter::Warn)
		.level_for("reqwest", LevelFilter::Info)
		.level_for("sqlx", LevelFilter::Warn)
		.chain(std::io::stdout())
}

/// Install the global logger. Fails if a logger is already installed.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
	dispatch(level)
		.apply()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
