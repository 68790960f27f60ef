//! minerhat - idle-server mining with per-player revenue attribution

mod cli;
mod theme;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, info};

use cli::{Cli, Commands, InitArgs, PlayerArgs, PolicyCommands};
use minerhat::config::MinerHatConfig;
use minerhat::console::{ConsoleCommand, HELP};
use minerhat::contribution::{
    Amount, CheckoutOutcome, ContributionStore, Economy, JournalEconomy, PlayerContribution,
    PlayerId, SyncOutcome,
};
use minerhat::host::MinerHat;
use minerhat::logging::{self, LogConfig};
use minerhat::miner::{EXAMPLE_XMRIG_POLICY, MinerPolicy};
use minerhat::paths::{self, DataPaths};
use minerhat::MinerHatError;
use theme::Themed;

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        theme::disable_colors();
    }
    logging::init(LogConfig::from_verbosity(cli.verbose, cli.quiet).with_env_overrides());

    let paths = DataPaths::new(paths::expand_tilde(&cli.data_dir));
    let result = match &cli.command {
        Commands::Init(args) => cmd_init(&paths, args),
        Commands::Policy(PolicyCommands::Validate { name }) => {
            cmd_policy_validate(&paths, name.as_deref())
        }
        Commands::Run => cmd_run(paths),
        Commands::Revenue(args) => cmd_revenue(&paths, args),
        Commands::History(args) => cmd_history(&paths, args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |t| t.red())
                .if_supports_color(Stderr, |t| t.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |t| t.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Write the default config and the example xmrig policy.
fn cmd_init(paths: &DataPaths, args: &InitArgs) -> Result<()> {
    paths
        .ensure()
        .with_context(|| format!("cannot create data directory {}", paths.root().display()))?;

    let config_file = paths.config_file();
    if config_file.exists() && !args.force {
        println!("{} {}", "Keeping".label(), config_file.display());
    } else {
        MinerHatConfig::default().save(&config_file)?;
        println!("{} {}", "Wrote".label(), config_file.display());
    }

    let policy_file = paths.policy_file("xmrig");
    if policy_file.exists() && !args.force {
        println!("{} {}", "Keeping".label(), policy_file.display());
    } else {
        std::fs::write(&policy_file, EXAMPLE_XMRIG_POLICY)
            .with_context(|| format!("cannot write {}", policy_file.display()))?;
        println!("{} {}", "Wrote".label(), policy_file.display());
    }

    let miner_dir = paths.miner_dir().join("xmrig");
    std::fs::create_dir_all(&miner_dir)?;
    println!();
    println!(
        "Place the xmrig binary in {} and set contribution.wallet_address in {}.",
        miner_dir.display(),
        config_file.display()
    );
    Ok(())
}

fn load_config(paths: &DataPaths) -> Result<MinerHatConfig> {
    let config_file = paths.config_file();
    if !config_file.exists() {
        debug!(?config_file, "No config file, using defaults");
        return Ok(MinerHatConfig::default());
    }
    Ok(MinerHatConfig::load(&config_file)?)
}

fn cmd_policy_validate(paths: &DataPaths, name: Option<&str>) -> Result<()> {
    let config = load_config(paths)?;
    let name = name.unwrap_or(&config.mining.miner);
    let policy = MinerPolicy::load(name, &paths.policy_file(name))?;

    println!("{}", format!("Policy '{}'", policy.name()).section_header());
    println!("{} {}", "Executable:".label(), policy.executable().display());
    println!(
        "{} {}",
        "Working directory:".label(),
        policy.working_directory().display()
    );
    println!("{} {}", "Arguments:".label(), policy.arguments().join(" "));
    if let Some(log_file) = policy.log_file() {
        println!("{} {}", "Log file:".label(), log_file.display());
    }
    println!(
        "{} {}",
        "Mining condition:".label(),
        serde_json::to_string(policy.condition())?
    );
    println!("{}", "Policy is valid".success());
    Ok(())
}

fn load_record(paths: &DataPaths, player: PlayerId) -> Result<Option<PlayerContribution>> {
    let store = ContributionStore::open(paths.contribution_dir())?;
    Ok(store.load(player)?)
}

fn cmd_revenue(paths: &DataPaths, args: &PlayerArgs) -> Result<()> {
    let record = load_record(paths, args.player)?;
    let (realized, pending, forfeited) = record
        .as_ref()
        .map(|r| {
            (
                r.accumulative_revenue(),
                r.pending_revenue(),
                r.forfeited_revenue(),
            )
        })
        .unwrap_or_default();

    if args.json {
        let json = serde_json::json!({
            "player": args.player,
            "accumulative_revenue": realized,
            "pending_revenue": pending,
            "forfeited_revenue": forfeited,
        });
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    print_revenue(args.player, realized, pending);
    if !forfeited.is_zero() {
        println!("{} {}", "Forfeited:".label(), forfeited.warning());
    }
    Ok(())
}

fn cmd_history(paths: &DataPaths, args: &PlayerArgs) -> Result<()> {
    let history = load_record(paths, args.player)?
        .map(|r| r.history().clone())
        .unwrap_or_default();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    print_history(args.player, &history);
    Ok(())
}

fn print_revenue(player: PlayerId, realized: Amount, pending: Amount) {
    println!("{} {}", "Player:".label(), player.player());
    println!("{} {}", "Realized:".label(), realized.amount());
    println!("{} {}", "Pending:".label(), pending.amount());
}

fn print_history(player: PlayerId, history: &BTreeMap<i64, Amount>) {
    if history.is_empty() {
        println!("No revenue history for {}", player.player());
        return;
    }
    println!("{}", format!("History for {}", player).section_header());
    for (timestamp, amount) in history {
        let when = DateTime::<Utc>::from_timestamp(*timestamp, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| timestamp.to_string());
        let amount = if amount.is_negative() {
            amount.to_string().warning()
        } else {
            format!("+{}", amount).amount()
        };
        println!("  {}  {}", when.muted(), amount);
    }
}

/// Run the host until `quit`, EOF on stdin, SIGINT or SIGTERM.
fn cmd_run(paths: DataPaths) -> Result<()> {
    paths.ensure()?;
    let config = MinerHatConfig::load_or_create(&paths.config_file())?;
    let economy: Arc<dyn Economy> = Arc::new(JournalEconomy::new(
        paths.economy_journal(),
        config.economy.currency_name.clone(),
    ));

    // The pool client blocks on its own runtime, so the host is built and
    // dropped outside of ours.
    let mut host = MinerHat::start(paths, config, Some(economy))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;
    let result = rt.block_on(host_loop(&mut host));
    // A pending stdin read would otherwise hold the runtime open.
    rt.shutdown_background();

    host.shutdown();
    result
}

type CheckoutResult = (PlayerId, minerhat::Result<CheckoutOutcome>);

async fn host_loop(host: &mut MinerHat) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut checkouts: JoinSet<CheckoutResult> = JoinSet::new();

    println!("minerhat running, type 'help' for commands");
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Quit) => break,
                    Ok(ConsoleCommand::Check(player)) => {
                        let ledger = Arc::clone(host.ledger());
                        checkouts.spawn(async move {
                            (player, ledger.checkout_revenue_24h(player).await)
                        });
                    }
                    Ok(command) => {
                        if let Err(e) = tokio::task::block_in_place(|| execute(host, command)) {
                            report_error(&e);
                        }
                    }
                    Err(e) => println!("{}", e.warning()),
                }
            }
            Some(joined) = checkouts.join_next() => report_checkout(joined),
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = terminate.recv() => {
                info!("Terminated");
                break;
            }
        }
    }

    while let Some(joined) = checkouts.join_next().await {
        report_checkout(joined);
    }
    Ok(())
}

fn report_checkout(joined: std::result::Result<CheckoutResult, tokio::task::JoinError>) {
    match joined {
        Ok((player, Ok(outcome))) => {
            println!(
                "{} checked out {}, total {}",
                player.player(),
                outcome.delta.amount(),
                outcome.total.amount()
            );
            if !outcome.forfeited.is_zero() {
                println!("  {} expired: {}", player, outcome.forfeited.warning());
            }
        }
        Ok((player, Err(e))) => println!("{}: {}", player.player(), e.warning()),
        Err(e) => report_error(&anyhow::Error::new(e).context("checkout task failed")),
    }
}

/// User-facing ledger errors are plain messages; anything else is an error.
fn report_error(e: &anyhow::Error) {
    match e.downcast_ref::<MinerHatError>() {
        Some(err) if err.is_user_facing() => println!("{}", err.warning()),
        _ => println!("{}: {:#}", "error".error_style(), e),
    }
}

fn execute(host: &mut MinerHat, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Join(player) => {
            let toggled = host.on_player_join(player)?;
            println!("{} joined, {} online", player.player(), host.online_count());
            print_toggle(host, toggled);
        }
        ConsoleCommand::Leave(player) => {
            let toggled = host.on_player_leave(player)?;
            println!("{} left, {} online", player.player(), host.online_count());
            print_toggle(host, toggled);
        }
        ConsoleCommand::Population(count) => {
            let toggled = host.on_population_changed(count)?;
            print_toggle(host, toggled);
        }
        ConsoleCommand::Revenue(player) => {
            let ledger = host.ledger();
            print_revenue(
                player,
                ledger.get_accumulative_revenue(player)?,
                ledger.get_player_revenue(player)?,
            );
        }
        ConsoleCommand::History(player) => {
            print_history(player, &host.ledger().history(player)?);
        }
        ConsoleCommand::Mining(player) => {
            let info = host.mining_info(player)?;
            println!("{} {}", "Wallet:".label(), info.wallet_address);
            println!("{} {}", "Currency:".label(), info.cryptocurrency);
            println!("{} {}", "Worker:".label(), info.worker_name.player());
            if !info.note.trim().is_empty() {
                println!("{}", info.note);
            }
        }
        ConsoleCommand::Exchange(player, amount) => {
            let rate = host.config().economy.exchange_rate;
            let receipt = host.ledger().exchange(player, amount, rate)?;
            println!(
                "{} exchanged {} for {}, {} left",
                player.player(),
                receipt.withdrawn.amount(),
                receipt.formatted.success(),
                receipt.remaining.amount()
            );
        }
        ConsoleCommand::Sync => {
            let outcome = host.ledger().sync_from_pool(Utc::now())?;
            println!("{}", describe_sync(outcome));
        }
        ConsoleCommand::Status => print_status(host),
        ConsoleCommand::Reload => {
            host.reload()?;
            println!("{}", "Configuration reloaded".success());
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Check(_) | ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn print_toggle(host: &MinerHat, toggled: bool) {
    if !toggled {
        return;
    }
    match host.scheduler() {
        Some(s) if s.is_mining_active() => println!("{}", "miner started".success()),
        Some(_) => println!("{}", "miner stopped".warning()),
        None => {}
    }
}

fn describe_sync(outcome: SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Disabled => "contribution tracking is disabled".to_string(),
        SyncOutcome::Baseline(total) => format!("baseline recorded at {}", total),
        SyncOutcome::Unchanged => "no new revenue".to_string(),
        SyncOutcome::Reset { previous, current } => {
            format!("pool total dropped from {} to {}, baseline reset", previous, current)
        }
        SyncOutcome::Distributed { delta, players } => {
            format!("distributed {} across {} players", delta, players)
        }
        SyncOutcome::Unattributed(delta) => format!("{} earned with nobody online", delta),
    }
}

fn print_status(host: &MinerHat) {
    println!("{}", "Miner".section_header());
    match host.scheduler() {
        Some(scheduler) => {
            let status = scheduler.status();
            println!("{} {}", "Policy:".label(), status.miner);
            println!(
                "{} {}",
                "Mining:".label(),
                if status.mining { "yes".success() } else { "no".muted() }
            );
            if let Some(pid) = status.pid {
                println!("{} {}", "PID:".label(), pid);
            }
            println!("{} {}", "Population:".label(), status.population);
            println!("{} {}", "Spawns:".label(), status.spawn_count);
            if let Some(exit) = &status.last_exit {
                println!("{} {}", "Last exit:".label(), exit);
            }
            if let Some(secs) = status.retry_in_secs {
                println!(
                    "{} {}",
                    "Retry in:".label(),
                    format!("{}s after {} failures", secs, status.consecutive_failures).warning()
                );
            }
        }
        None => println!("{} {}", "Mining:".label(), "disabled".muted()),
    }

    println!();
    println!("{}", "Contribution".section_header());
    println!("{} {}", "Online:".label(), host.online_count());
    match host.ledger().pool() {
        Some(pool) => {
            let stats = pool.stats();
            let baseline = host.ledger().baseline();
            println!("{} {}", "Wallet:".label(), pool.wallet_address());
            println!(
                "{} {} remote, {} cached",
                "Pool queries:".label(),
                stats.remote_queries,
                stats.cache_hits
            );
            if let Some(total) = baseline.last_known_total {
                println!("{} {}", "Pool total:".label(), total.amount());
            }
            let owed = baseline.owed_revenue();
            if !owed.is_zero() {
                println!(
                    "{} {} across {} shares",
                    "Owed:".label(),
                    owed.warning(),
                    baseline.owed.len()
                );
            }
            if let Some(at) = baseline.last_sync {
                println!(
                    "{} {}",
                    "Last sync:".label(),
                    at.format("%Y-%m-%d %H:%M:%S UTC").to_string().muted()
                );
            }
        }
        None => println!("{} {}", "Pool:".label(), "disabled".muted()),
    }
    println!(
        "{} {}",
        "Economy:".label(),
        if host.ledger().has_economy() { "enabled".success() } else { "disabled".muted() }
    );
}
