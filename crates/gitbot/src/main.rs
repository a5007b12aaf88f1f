//! CLI entry point.
//!
//! `start` runs the bot in the foreground and writes a pidfile; `stop`,
//! `restart` and `rehash` signal a running instance (SIGTERM, SIGHUP and
//! SIGUSR1 respectively).

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use gitbot_core::{
    config::{Config, SharedConfig},
    detector::ChangeDetector,
    dispatcher::CommandDispatcher,
    domain::Hostmask,
    ports::CommitSource,
    scheduler::PollScheduler,
    store::RepoStore,
};
use gitbot_github::GithubClient;
use gitbot_irc::{Control, IrcRunner};

const PID_FILE: &str = "gitbot.pid";

#[derive(Parser)]
#[command(name = "gitbot", about = "GitHub → IRC commit notification bridge")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "gitbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bot in the foreground.
    Start,
    /// Stop a running instance.
    Stop,
    /// Ask a running instance to drop and reopen its IRC connection.
    Restart,
    /// Ask a running instance to reload its configuration file.
    Rehash,
}

/// Signals the CLI can send to a running instance.
#[derive(Clone, Copy, Debug)]
enum Sig {
    Term,
    Hup,
    Usr1,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Start => start(&cli.config).await,
        Command::Stop => signal_running("stop", Sig::Term),
        Command::Restart => signal_running("restart", Sig::Hup),
        Command::Rehash => signal_running("rehash", Sig::Usr1),
    }
}

async fn start(config_path: &Path) -> anyhow::Result<()> {
    gitbot_core::logging::init("gitbot")?;

    let config = Config::load(config_path)?;
    let store = RepoStore::open(&config.database.path)?;
    seed_admin(&config, &store);

    let source: Arc<dyn CommitSource> =
        Arc::new(GithubClient::new(config.github.api_token.clone()));
    let shared = config.shared();

    let detector = Arc::new(ChangeDetector::new(
        store.clone(),
        source.clone(),
        shared.clone(),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), source));

    let (runner, session_handle, control) = IrcRunner::new(shared.clone(), dispatcher);
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(PollScheduler::new(
        detector,
        Arc::new(session_handle),
        shared.clone(),
        cancel.clone(),
    ));

    write_pid_file()?;
    info!(pid = std::process::id(), "gitbot started");

    let runner_task = tokio::spawn(runner.run());
    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run().await }
    });

    wait_for_shutdown(config_path, &shared, &store, &control).await?;

    // Orderly teardown: stop polling, close the session, drop the pidfile.
    cancel.cancel();
    let _ = control.send(Control::Quit).await;
    if tokio::time::timeout(Duration::from_secs(5), runner_task)
        .await
        .is_err()
    {
        warn!("IRC runner did not stop in time");
    }
    let _ = scheduler_task.await;
    let _ = std::fs::remove_file(PID_FILE);
    info!("gitbot stopped");
    Ok(())
}

fn seed_admin(config: &Config, store: &RepoStore) {
    match &config.admin {
        Some(admin) => {
            let hostmask = Hostmask::from_raw(admin.hostmask.clone());
            match store.seed_admin(&hostmask) {
                Ok(()) => info!(admin = %hostmask, "seeded administrator"),
                Err(e) => warn!(error = %e, "failed to seed administrator"),
            }
        }
        None => warn!("no administrator configured; every admin command will be denied"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(
    config_path: &Path,
    shared: &SharedConfig,
    store: &RepoStore,
    control: &tokio::sync::mpsc::Sender<Control>,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut usr1 = signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            _ = term.recv() => {
                info!("received SIGTERM, stopping");
                return Ok(());
            }
            _ = hup.recv() => {
                info!("received SIGHUP, restarting IRC connection");
                let _ = control.send(Control::Restart).await;
            }
            _ = usr1.recv() => {
                rehash(config_path, shared, store).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _config_path: &Path,
    _shared: &SharedConfig,
    _store: &RepoStore,
    _control: &tokio::sync::mpsc::Sender<Control>,
) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("interrupted");
    Ok(())
}

/// Reload the configuration without dropping the session. IRC identity
/// changes apply to the next connect; polling settings apply immediately.
async fn rehash(config_path: &Path, shared: &SharedConfig, store: &RepoStore) {
    info!("rehashing configuration");
    match Config::load(config_path) {
        Ok(new_config) => {
            seed_admin(&new_config, store);
            *shared.write().await = new_config;
            info!("configuration reloaded");
        }
        Err(e) => warn!(error = %e, "rehash failed, keeping previous configuration"),
    }
}

fn write_pid_file() -> anyhow::Result<()> {
    std::fs::write(PID_FILE, std::process::id().to_string())
        .map_err(|e| anyhow::anyhow!("cannot write {PID_FILE}: {e}"))
}

#[cfg(unix)]
fn signal_running(verb: &str, sig: Sig) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(PID_FILE)
        .map_err(|e| anyhow::anyhow!("cannot read {PID_FILE} (is the bot running?): {e}"))?;
    let pid: i32 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{PID_FILE} does not contain a pid: {raw:?}"))?;

    let sig = match sig {
        Sig::Term => libc::SIGTERM,
        Sig::Hup => libc::SIGHUP,
        Sig::Usr1 => libc::SIGUSR1,
    };
    let rc = unsafe { libc::kill(pid, sig) };
    if rc != 0 {
        return Err(anyhow::anyhow!(
            "failed to signal pid {pid}: {}",
            std::io::Error::last_os_error()
        ));
    }
    println!("sent {verb} signal to pid {pid}");
    Ok(())
}

#[cfg(not(unix))]
fn signal_running(_verb: &str, _sig: Sig) -> anyhow::Result<()> {
    Err(anyhow::anyhow!(
        "process signaling is only supported on unix"
    ))
}
