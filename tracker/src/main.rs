use clap::Parser;
use log::{error, info, warn};
use shared::events::classify;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracker::config::Config;
use tracker::rcon::{parse_roster, RconClient};
use tracker::store::Store;
use tracker::tail::LogTail;
use tracker::world::{Directive, Notice, World};

/// Delay before restarting the line loop after an unexpected error.
const CRASH_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Main-method of the daemon.
/// Loads configuration, opens the store, then runs the log-tail loop
/// alongside the timer and roster-sync tasks until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Path to the configuration file
        #[clap(short, long, default_value = "duel.toml")]
        config: PathBuf,
    }

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    info!("tailing {}", config.log_file.display());

    let store = Arc::new(Store::open(&config.db_file).await?);
    store.init().await?;

    let rcon = Arc::new(RconClient::connect(&config.server_addr(), &config.rcon_secret).await?);

    let world = Arc::new(Mutex::new(World::new()));
    {
        let mut world = world.lock().await;
        world.load(&store).await?;
    }

    // Timer path: expire challenge/lobby/disband windows every second.
    let tick_handle = {
        let world = Arc::clone(&world);
        let rcon = Arc::clone(&rcon);
        tokio::spawn(async move {
            let mut timer = interval(Duration::from_secs(1));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                let notices = {
                    let mut world = world.lock().await;
                    world.tick(Instant::now());
                    world.drain_notices()
                };
                deliver(&rcon, notices).await;
            }
        })
    };

    // Roster path: periodic status sweep keeps the slot map honest.
    let sync_handle = {
        let world = Arc::clone(&world);
        let rcon = Arc::clone(&rcon);
        let store = Arc::clone(&store);
        let period = Duration::from_secs(config.sync_interval_secs.max(1));
        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                timer.tick().await;
                sync_roster(&world, &rcon, &store).await;
            }
        })
    };

    // Line path: restart after an unexpected error instead of exiting,
    // keeping the in-memory sessions alive.
    let line_loop = async {
        loop {
            if let Err(e) = run_line_loop(&config, &world, &rcon, &store).await {
                error!("line loop failed: {e}, restarting shortly");
                world.lock().await.flush_ratings(&store).await;
                sleep(CRASH_RESTART_DELAY).await;
            }
        }
    };

    tokio::select! {
        _ = line_loop => {}
        result = tick_handle => {
            if let Err(e) = result {
                error!("timer task panicked: {e}");
            }
        }
        result = sync_handle => {
            if let Err(e) = result {
                error!("roster task panicked: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down, flushing ratings");
        }
    }

    world.lock().await.flush_ratings(&store).await;
    Ok(())
}

/// Tails the log and feeds classified events into the world. Notices
/// are drained and sent only after the lock is released.
async fn run_line_loop(
    config: &Config,
    world: &Arc<Mutex<World>>,
    rcon: &Arc<RconClient>,
    store: &Arc<Store>,
) -> Result<(), std::io::Error> {
    let mut tail = LogTail::new(&config.log_file);
    let poll_period = Duration::from_millis(config.poll_interval_ms.max(50));

    loop {
        let lines = tail.poll()?;
        for line in lines {
            let Some(event) = classify(&line) else {
                continue;
            };
            let (directive, notices) = {
                let mut world = world.lock().await;
                let directive = world.apply_event(event, store).await;
                (directive, world.drain_notices())
            };
            deliver(rcon, notices).await;

            if directive == Some(Directive::Resync) {
                // The backlog talks about slots that no longer exist.
                tail.fast_forward()?;
                sync_roster(world, rcon, store).await;
                break;
            }
        }
        sleep(poll_period).await;
    }
}

async fn sync_roster(world: &Arc<Mutex<World>>, rcon: &Arc<RconClient>, store: &Arc<Store>) {
    let reply = match rcon.status().await {
        Ok(Some(reply)) => reply,
        Ok(None) => return,
        Err(e) => {
            warn!("status query failed: {e}");
            return;
        }
    };
    let roster = parse_roster(&reply);
    let notices = {
        let mut world = world.lock().await;
        world.sync_roster(&roster, store).await;
        world.drain_notices()
    };
    deliver(rcon, notices).await;
}

async fn deliver(rcon: &Arc<RconClient>, notices: Vec<Notice>) {
    for notice in notices {
        if let Err(e) = rcon.deliver(&notice).await {
            // Notifications are fire-and-forget; losing one is fine.
            warn!("notice delivery failed: {e}");
        }
    }
}
