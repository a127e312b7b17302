use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use snake_qlearn::{
    Game, QAgent, Session, SnakeConfig, Status, Throttle, Trainer, decode_snapshot, encode_snapshot, sweep,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snake-qlearn")]
#[command(version, about = "Snake played by a tabular Q-learning agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train one agent. Commands on stdin: p pause, r resume, s stop, f toggle speed, q quit
    Train(TrainArgs),
    /// Train several independent agents in parallel, one per seed
    Sweep(SweepArgs),
}

#[derive(Args)]
struct Common {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Grid width
    #[arg(long)]
    width: Option<u16>,

    /// Grid height
    #[arg(long)]
    height: Option<u16>,

    /// Number of episodes per run
    #[arg(long)]
    episodes: Option<usize>,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

impl Common {
    fn load(&self) -> Result<SnakeConfig> {
        let mut config = match &self.config {
            Some(path) => SnakeConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SnakeConfig::default(),
        };
        if let Some(w) = self.width {
            config.board.width = w;
        }
        if let Some(h) = self.height {
            config.board.height = h;
        }
        if let Some(n) = self.episodes {
            config.trainer.episode_limit = n;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[derive(Args)]
struct TrainArgs {
    #[command(flatten)]
    common: Common,

    /// Start in fast mode
    #[arg(long)]
    fast: bool,

    /// Continue from a saved q-table
    #[arg(long)]
    load: Option<PathBuf>,

    /// Save the q-table when training ends
    #[arg(long)]
    save: Option<PathBuf>,
}

#[derive(Args)]
struct SweepArgs {
    #[command(flatten)]
    common: Common,

    /// Number of independent runs
    #[arg(long, default_value = "4")]
    runs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => train(args).await,
        Command::Sweep(args) => run_sweep(args).await,
    }
}

async fn train(args: TrainArgs) -> Result<()> {
    let mut config = args.common.load()?;
    if args.fast {
        config.trainer.throttle = Throttle::Fast;
    }

    let (game_rng, agent_rng) = config.rngs();
    let game = Game::new(config.board, game_rng)?;
    let agent = match &args.load {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading q-table {}", path.display()))?;
            let snapshot = decode_snapshot(&bytes).context("decoding q-table")?;
            QAgent::from_snapshot(config.agent, &snapshot, agent_rng)?
        }
        None => QAgent::new(config.agent, agent_rng),
    };

    tracing::info!("🐍 Snake Q-learning");
    tracing::info!("  Board: {}x{}", config.board.width, config.board.height);
    tracing::info!("  Episodes: {}", config.trainer.episode_limit);
    tracing::info!("  Throttle: {:?}", config.trainer.throttle);
    tracing::info!("  Known states: {}", agent.table_len());

    let mut trainer = Trainer::with_session(config.trainer, Session::new(game, agent));
    trainer.on_episode(|r| {
        if r.episode % 100 == 0 {
            tracing::info!(
                "Episode {:>5} | score {:>3} | best {:>3} | epsilon {:.4} | frames {}",
                r.episode,
                r.score,
                r.highest_score,
                r.epsilon,
                r.frames
            );
        }
    });
    // wait_for checks the current value too; a run may end before the loop starts
    let mut status = trainer.watch();
    trainer.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = status.wait_for(Status::is_finished) => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(cmd)) => match cmd.trim() {
                    "p" => trainer.pause(),
                    "r" => trainer.resume(),
                    "s" => trainer.stop(),
                    "f" => {
                        let throttle = trainer.toggle_throttle();
                        tracing::info!("Throttle: {:?}", throttle);
                    }
                    "q" => trainer.destroy(),
                    "" => {}
                    other => tracing::warn!("Unknown command {:?} (p, r, s, f, q)", other),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    if let Some(summary) = trainer.join().await {
        tracing::info!("Training finished: {:?}", summary.outcome);
        tracing::info!("  Episodes: {}", summary.episodes);
        tracing::info!("  Highest score: {}", summary.highest_score);
    }

    if let Some(path) = &args.save {
        let session = trainer.session().await;
        let bytes = encode_snapshot(&session.agent().snapshot())?;
        std::fs::write(path, bytes).with_context(|| format!("writing q-table {}", path.display()))?;
        tracing::info!("  Saved q-table: {}", path.display());
    }
    Ok(())
}

async fn run_sweep(args: SweepArgs) -> Result<()> {
    let config = args.common.load()?;
    let base = config.seed.unwrap_or(0);
    let seeds: Vec<u64> = (0..args.runs).map(|i| base.wrapping_add(i)).collect();

    tracing::info!("Sweeping {} runs of {} episodes", seeds.len(), config.trainer.episode_limit);
    let results = tokio::task::spawn_blocking(move || sweep(&config, &seeds))
        .await
        .context("sweep task panicked")??;

    for r in &results {
        tracing::info!(
            "seed {:>6} | best {:>3} | recent mean {:>6.2} | epsilon {:.4} | states {}",
            r.seed,
            r.highest_score,
            r.recent_mean,
            r.final_epsilon,
            r.table_len
        );
    }
    Ok(())
}
