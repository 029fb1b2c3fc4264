use basisbot::config::EngineConfig;
use basisbot::ports::replay_feed::run_replay_session;
use chrono::{DateTime, FixedOffset, Utc};
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;
use std::str::FromStr;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging with local timezone
    let offset_seconds = env::var("TIMEZONE_OFFSET")
        .unwrap_or_else(|_| "3600".to_string())
        .parse::<i32>()
        .expect("Invalid TIMEZONE_OFFSET");
    let offset = FixedOffset::east_opt(offset_seconds).expect("Invalid offset");
    Builder::from_default_env()
        .format(move |buf, record| {
            let utc_now: DateTime<Utc> = Utc::now();
            let local_now = utc_now.with_timezone(&offset);
            writeln!(
                buf,
                "{} [{}] - {}",
                local_now.format("%Y-%m-%dT%H:%M:%S%z"),
                record.level(),
                record.args()
            )
        })
        .filter(
            None,
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
                .unwrap_or(LevelFilter::Info),
        )
        .init();

    let build_hash = option_env!("BASISBOT_GIT_HASH").unwrap_or("unknown");
    log::info!("basisbot git: {}", build_hash);
    log::info!("Starting divergence trading core...");

    let cfg = EngineConfig::from_env_or_yaml().expect("invalid engine config");
    if cfg.replay_file.is_none() {
        log::error!(
            "no replay_file configured; set REPLAY_FILE or add replay_file to the YAML config"
        );
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "no session transport configured",
        ));
    }

    let snapshot = run_replay_session(cfg)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    log::info!(
        "session closed: etf position {} / future position {}",
        snapshot.etf.position,
        snapshot.future.position
    );
    Ok(())
}
