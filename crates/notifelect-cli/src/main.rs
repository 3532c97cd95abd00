mod events;
mod simulate;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use notifelect::{ElectionConfig, Namespace, SequenceQueries, SqliteSequence};

use simulate::{KillMode, SimulateConfig};

#[derive(Parser)]
#[command(name = "notifelect", about = "Bully leader election over a shared priority sequence")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Where the priority sequence lives.
#[derive(Args)]
struct SequenceArgs {
    /// SQLite database file holding the sequence.
    #[arg(long, env = "NOTIFELECT_DB", default_value = "notifelect.db")]
    db: PathBuf,

    /// Prefix for the sequence table name.
    #[arg(long, env = "NOTIFELECT_PREFIX", default_value = "")]
    prefix: String,
}

#[derive(Subcommand)]
enum Command {
    /// Create the priority sequence.
    Install {
        #[command(flatten)]
        sequence: SequenceArgs,
        /// Print the SQL without executing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop the priority sequence.
    Uninstall {
        #[command(flatten)]
        sequence: SequenceArgs,
        /// Print the SQL without executing it.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run N coordinators in-process on a shared bus and report the outcome.
    Simulate {
        /// Number of nodes.
        #[arg(long, default_value = "5")]
        nodes: usize,
        /// Election namespace.
        #[arg(long, default_value = "notifelect")]
        namespace: String,
        /// Upper bound of each node's random start delay in ms.
        #[arg(long, default_value = "2000")]
        max_start_delay: u64,
        /// Election-trigger interval in ms.
        #[arg(long, default_value = "2000")]
        election_interval: u64,
        /// Candidacy response timeout in ms.
        #[arg(long, default_value = "500")]
        response_timeout: u64,
        /// Leader heartbeat interval in ms.
        #[arg(long, default_value = "500")]
        heartbeat_interval: u64,
        /// Leader liveness timeout in ms.
        #[arg(long, default_value = "1500")]
        leader_timeout: u64,
        /// Re-election jitter bound in ms.
        #[arg(long, default_value = "200")]
        election_jitter: u64,
        /// Stop the leader this many ms after all nodes joined.
        #[arg(long)]
        kill_leader_after: Option<u64>,
        /// How the leader is stopped.
        #[arg(long, value_enum, default_value = "resign")]
        kill_mode: KillMode,
        /// Total run time in ms after all nodes joined.
        #[arg(long, default_value = "10000")]
        duration: u64,
        /// Print every message published on the namespace.
        #[arg(long)]
        tap: bool,
        /// Draw priorities from the SQLite sequence instead of an in-process counter.
        #[arg(long)]
        use_db: bool,
        #[command(flatten)]
        sequence: SequenceArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Install { sequence, dry_run } => {
            let queries = SequenceQueries::with_prefix(&sequence.prefix);
            println!("{}", queries.install());
            if !dry_run {
                SqliteSequence::open(&sequence.db, queries)?.install().await?;
                eprintln!("installed in {}", sequence.db.display());
            }
        }

        Command::Uninstall { sequence, dry_run } => {
            let queries = SequenceQueries::with_prefix(&sequence.prefix);
            println!("{}", queries.uninstall());
            if !dry_run {
                SqliteSequence::open(&sequence.db, queries)?.uninstall().await?;
                eprintln!("uninstalled from {}", sequence.db.display());
            }
        }

        Command::Simulate {
            nodes,
            namespace,
            max_start_delay,
            election_interval,
            response_timeout,
            heartbeat_interval,
            leader_timeout,
            election_jitter,
            kill_leader_after,
            kill_mode,
            duration,
            tap,
            use_db,
            sequence,
        } => {
            let election = ElectionConfig {
                namespace: Namespace::new(namespace),
                election_interval: Duration::from_millis(election_interval),
                response_timeout: Duration::from_millis(response_timeout),
                heartbeat_interval: Duration::from_millis(heartbeat_interval),
                leader_timeout: Duration::from_millis(leader_timeout),
                election_jitter: Duration::from_millis(election_jitter),
                ..ElectionConfig::default()
            };
            election.validate()?;

            let converged = simulate::run(SimulateConfig {
                nodes,
                election,
                max_start_delay: Duration::from_millis(max_start_delay),
                kill_leader_after: kill_leader_after.map(Duration::from_millis),
                kill_mode,
                duration: Duration::from_millis(duration),
                tap,
                db: use_db.then(|| (sequence.db, sequence.prefix)),
            })
            .await?;

            if !converged {
                anyhow::bail!("election did not converge on the highest live priority");
            }
        }
    }

    Ok(())
}
