use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};

use skillgate::banner::{BannerInfo, print_banner, print_shutdown_summary};
use skillgate::bridge::{Bridge, BridgeConfig};
use skillgate::client::{SkillClient, parse_cli_args};
use skillgate::consts::{
    DEFAULT_BATCH_SIZE, DEFAULT_HOST, DEFAULT_IDLE_TICK_INTERVAL, DEFAULT_KEEP_ALIVE_INTERVAL,
    DEFAULT_MAX_QUEUE_DEPTH, DEFAULT_PORT, DEFAULT_RATE_LIMIT, DEFAULT_WAIT_TIMEOUT,
    default_db_path,
};
use skillgate::demo::{Scene, register_scene_skills};
use skillgate::host::{FrameLoop, QuitSignal};
use skillgate::journal::Journal;
use skillgate::journal::sqlite::SqliteJournal;
use skillgate::logging::{DEFAULT_DIRECTIVE, LogFormat, init_logging};
use skillgate::skills::SkillRegistry;

#[derive(Parser)]
#[command(
    name = "skillgate",
    version,
    about = "Drive a single-threaded host from HTTP, one tick at a time."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Address to listen on (or to connect to, for client commands)
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: IpAddr,

    /// Port to listen on (or to connect to, for client commands)
    #[arg(short, long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum jobs executed per host tick
    #[arg(short, long, global = true, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Maximum skill executions per second
    #[arg(short, long, global = true, default_value_t = DEFAULT_RATE_LIMIT)]
    rate_limit: u32,

    /// Seconds a request waits for the host before 504
    #[arg(short, long, global = true, default_value_t = DEFAULT_WAIT_TIMEOUT.as_secs())]
    wait_timeout: u64,

    /// Keep-alive nudge period in milliseconds
    #[arg(
        long,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = DEFAULT_KEEP_ALIVE_INTERVAL.as_millis() as u64
    )]
    keep_alive_ms: u64,

    /// Queued requests allowed before new ones are refused with 429
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_QUEUE_DEPTH)]
    max_queue_depth: usize,

    /// Host tick period while idle, in milliseconds
    #[arg(
        long,
        global = true,
        value_parser = clap::value_parser!(u64).range(1..),
        default_value_t = DEFAULT_IDLE_TICK_INTERVAL.as_millis() as u64
    )]
    idle_tick_ms: u64,

    /// SQLite journal for late completions (default: ~/.skillgate/skillgate.db)
    #[arg(short, long, global = true)]
    db: Option<PathBuf>,

    /// Do not journal late completions
    #[arg(long, global = true, default_value_t = false)]
    no_journal: bool,

    /// Log filter, e.g. "skillgate=debug" (SKILLGATE_LOG overrides)
    #[arg(long, global = true, default_value = DEFAULT_DIRECTIVE)]
    log: String,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge with the demo scene (default)
    Serve,
    /// Invoke a skill on a running bridge
    Call {
        /// Skill name
        name: String,
        /// Arguments as key=value
        args: Vec<String>,
    },
    /// List the skills of a running bridge
    List,
    /// Show the health of a running bridge
    Health,
    /// Show outcomes that finished after their caller gave up
    Late {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
        /// Delete all entries instead
        #[arg(long, default_value_t = false)]
        clear: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, cli.log_format)?;

    match cli.command.as_ref().unwrap_or(&Command::Serve) {
        Command::Serve => serve(&cli),
        Command::Call { name, args } => {
            let args = Value::Object(parse_cli_args(args)?);
            block_on(async {
                let reply = client(&cli).call(name, &args).await?;
                println!("{}", serde_json::to_string_pretty(&reply.body)?);
                if !reply.is_success() {
                    bail!("skill '{name}' failed with status {}", reply.status);
                }
                Ok(())
            })
        }
        Command::List => block_on(async {
            let manifest = client(&cli).skills().await?;
            let skills = manifest["skills"].as_array().cloned().unwrap_or_default();
            for skill in &skills {
                let params: Vec<&str> = skill["parameters"]
                    .as_array()
                    .map(|ps| ps.iter().filter_map(|p| p["name"].as_str()).collect())
                    .unwrap_or_default();
                println!(
                    "  {:<24} {} ({})",
                    skill["name"].as_str().unwrap_or("?"),
                    skill["description"].as_str().unwrap_or(""),
                    params.join(", ")
                );
            }
            println!("{} skill(s)", skills.len());
            Ok(())
        }),
        Command::Health => block_on(async {
            let health = client(&cli).health().await?;
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }),
        Command::Late { limit, clear } => {
            let journal = open_journal(&db_path(&cli))?;
            block_on(async {
                if *clear {
                    journal.clear().await?;
                    println!("journal cleared.");
                    return Ok(());
                }
                let entries = journal.recent(*limit).await?;
                if entries.is_empty() {
                    println!("no late completions.");
                }
                for entry in entries {
                    let c = entry.completion;
                    println!(
                        "{}  #{} {} {} -> {} after {}ms\n    {}",
                        entry.recorded_at, c.job_id, c.method, c.path, c.status, c.waited_ms, c.body
                    );
                }
                Ok(())
            })
        }
    }
}

fn serve(cli: &Cli) -> anyhow::Result<()> {
    // The frame loop belongs to this thread; everything host-side stays here.
    let frame_loop = FrameLoop::new(Duration::from_millis(cli.idle_tick_ms));

    let db = db_path(cli);
    let journal: Option<Arc<dyn Journal>> = if cli.no_journal {
        None
    } else {
        Some(Arc::new(open_journal(&db)?))
    };
    let journal_label = if cli.no_journal {
        "disabled".to_string()
    } else {
        db.display().to_string()
    };

    let config = BridgeConfig {
        addr: SocketAddr::new(cli.host, cli.port),
        batch_size: cli.batch_size,
        rate_limit: cli.rate_limit,
        wait_timeout: Duration::from_secs(cli.wait_timeout),
        keep_alive_interval: Duration::from_millis(cli.keep_alive_ms),
        max_queue_depth: cli.max_queue_depth,
        ..BridgeConfig::default()
    };
    let wait_timeout_secs = config.wait_timeout.as_secs();
    let bridge = Bridge::new(config)
        .scheduler(frame_loop.waker())
        .journal(journal)
        .start()?;

    let scene = Scene::shared("Demo");
    let mut registry = SkillRegistry::new();
    register_scene_skills(&mut registry, &scene);
    let mut driver = bridge.execution_driver(registry);

    print_banner(&BannerInfo {
        url: &bridge.url(),
        skills: driver.registry().len(),
        batch_size: cli.batch_size,
        rate_limit: cli.rate_limit,
        wait_timeout_secs,
        journal: &journal_label,
    });

    watch_ctrl_c(frame_loop.quit_signal())?;
    let ticks = frame_loop.run(|| {
        driver.drive();
    });
    info!(ticks, objects = scene.borrow().len(), "frame loop exited");

    let stats = bridge.stats();
    bridge.join();
    print_shutdown_summary(stats);
    Ok(())
}

/// Trigger `quit` on Ctrl+C from a small signal thread.
fn watch_ctrl_c(quit: QuitSignal) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    thread::Builder::new()
        .name("skillgate-signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
                println!();
                quit.trigger();
            });
        })?;
    Ok(())
}

fn client(cli: &Cli) -> SkillClient {
    SkillClient::new(&format!("http://{}", SocketAddr::new(cli.host, cli.port)))
}

fn db_path(cli: &Cli) -> PathBuf {
    cli.db.clone().unwrap_or_else(default_db_path)
}

fn open_journal(path: &Path) -> anyhow::Result<SqliteJournal> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let path = path
        .to_str()
        .with_context(|| format!("journal path is not valid UTF-8: {}", path.display()))?;
    SqliteJournal::new(path)
}

fn block_on<F>(future: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    tokio::runtime::Runtime::new()?.block_on(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "skillgate",
            "serve",
            "--batch-size",
            "5",
            "--rate-limit",
            "7",
            "--idle-tick-ms",
            "16",
            "--no-journal",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.batch_size, 5);
        assert_eq!(cli.rate_limit, 7);
        assert_eq!(cli.idle_tick_ms, 16);
        assert!(cli.no_journal);
    }

    #[test]
    fn serve_flags_still_parse_before_the_subcommand() {
        let cli = Cli::try_parse_from(["skillgate", "-b", "3", "serve"]).unwrap();
        assert_eq!(cli.batch_size, 3);
    }

    #[test]
    fn zero_tick_periods_are_rejected() {
        assert!(Cli::try_parse_from(["skillgate", "serve", "--idle-tick-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["skillgate", "--keep-alive-ms", "0"]).is_err());
    }

    #[test]
    fn defaults_match_the_bridge_defaults() {
        let cli = Cli::try_parse_from(["skillgate"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cli.idle_tick_ms, DEFAULT_IDLE_TICK_INTERVAL.as_millis() as u64);
    }
}
