use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing::{info, warn};

use pilot_link::discovery;
use pilot_link::{doctor as link_doctor, transport, ConnectionManager, LinkConfig};
use pilot_nav::route::route_samples;
use pilot_nav::{doctor as nav_doctor, RouteCfg, RouteSession};
use pilot_proto::command::Command as VehicleCommand;
use pilot_proto::Coordinate;

#[derive(Debug, Parser)]
#[command(name = "pilot", version, about = "RoverPilot - waypoint routes for remote vehicles")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Push the configured waypoints to the vehicle and play the route.
    Run,
    Link { #[command(subcommand)] cmd: LinkCmd },
    Route { #[command(subcommand)] cmd: RouteCmd },
}

#[derive(Debug, Subcommand)]
enum LinkCmd {
    /// Probe the paired devices passing the short-range discovery filter.
    Discover,
    /// Connect, send one command, disconnect.
    Send {
        /// move | p | c
        command: String,
        #[arg(long, allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, allow_hyphen_values = true)]
        lng: Option<f64>,
    },
}

#[derive(Debug, Subcommand)]
enum RouteCmd {
    /// Print every interpolated sample, unpaced.
    Preview,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    link: Option<LinkConfig>,
    #[serde(default)]
    route: RouteCfg,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Link { cmd } => link_cmd(&cfg, cmd).await?,
        Command::Route { cmd } => route_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    nav_doctor::check_route(&cfg.route)?;

    match &cfg.link {
        Some(link) if link.enable => link_doctor::check_link(link)?,
        _ => warn!("doctor: link disabled, route will run locally only"),
    }

    info!("doctor: OK");
    Ok(())
}

async fn link_cmd(cfg: &Config, cmd: LinkCmd) -> Result<()> {
    let link = cfg.link.as_ref().context("no [link] config section")?;
    anyhow::ensure!(link.enable, "link.enable=false");

    match cmd {
        LinkCmd::Discover => {
            let sr = link
                .short_range
                .as_ref()
                .context("no [link.short_range] config section")?;
            let baud = sr.baud();
            let found = discovery::discover(&sr.paired, &sr.filter());
            let (chosen, probes) = discovery::open_first(&found, baud);
            if let Some((dev, _port)) = chosen {
                println!("CHOSEN: {} dev={} @ {}", dev.name, dev.dev, baud);
            } else {
                println!("CHOSEN: none ({} matched)", found.len());
            }
            for p in probes {
                println!(
                    "probe name={} dev={} opened={} {}ms note={}",
                    p.name, p.dev, p.opened, p.elapsed_ms, p.note
                );
            }
            Ok(())
        }
        LinkCmd::Send { command, lat, lng } => {
            let cmd = match command.as_str() {
                "move" => {
                    let lat = lat.context("move needs --lat")?;
                    let lng = lng.context("move needs --lng")?;
                    VehicleCommand::Move(Coordinate::new(lat, lng))
                }
                "p" => VehicleCommand::ClearPrevious,
                "c" => VehicleCommand::ClearAll,
                other => anyhow::bail!("unknown command: {} (expected move, p or c)", other),
            };

            let mgr = ConnectionManager::new();
            let st = mgr.connect(transport::from_config(link)?).await.context("connect")?;
            println!("connected via {:?} to {:?}", st.transport, st.device_name);
            let sent = mgr.send(cmd).await;
            mgr.disconnect().await.ok();
            sent.with_context(|| format!("send {}", cmd))?;
            println!("sent {}", cmd);
            Ok(())
        }
    }
}

fn route_cmd(cfg: &Config, cmd: RouteCmd) -> Result<()> {
    match cmd {
        RouteCmd::Preview => {
            let n = cfg.route.waypoints.len();
            anyhow::ensure!(n >= 2, "route.waypoints must have >= 2 points");
            for (i, p) in route_samples(&cfg.route.waypoints, cfg.route.steps()).enumerate() {
                println!("{:>5} {}", i, p);
            }
            Ok(())
        }
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let mgr = ConnectionManager::new();

    // Status/telemetry printers live for the whole run.
    let mut status = mgr.subscribe();
    tokio::spawn(async move {
        let mut prev = status.borrow_and_update().clone();
        while status.changed().await.is_ok() {
            let st = status.borrow_and_update().clone();
            // how long the phase we just left lasted
            let took = prev.age().map(|d| d.as_seconds_f64()).unwrap_or_default();
            if st.connected {
                info!(
                    "link: up via {:?} device={:?} after {:.1}s",
                    st.transport, st.device_name, took
                );
            } else if let Some(err) = &st.error {
                warn!("link: down ({}) after {:.1}s", err, took);
            }
            prev = st;
        }
    });
    let mut reports = mgr.reports();
    tokio::spawn(async move {
        while let Ok(r) = reports.recv().await {
            info!(
                "vehicle: at {} battery={:?} speed={:?} obstacle={:?}",
                r.position(), r.battery_pct, r.speed_kmh, r.obstacle_cm
            );
        }
    });

    if let Some(link) = cfg.link.as_ref().filter(|l| l.enable) {
        match mgr.connect(transport::from_config(link)?).await {
            Ok(_) => {}
            // Local route state stays authoritative; the vehicle catches up on a later run.
            Err(e) => warn!("run: continuing without vehicle link: {}", e),
        }
    }

    let mut session = RouteSession::from_cfg(mgr.clone(), &cfg.route);
    session.subscribe_waypoints(|pts| info!("route: {} waypoints", pts.len()));
    for w in &cfg.route.waypoints {
        session.add_waypoint(*w).await;
    }

    let mut positions = session.start().context("start route")?;
    let mut n = 0usize;
    loop {
        tokio::select! {
            pos = positions.next() => match pos {
                Some(p) => {
                    println!("{:>5} {}", n, p);
                    n += 1;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("run: interrupted, cancelling route");
                session.cancel().await;
                break;
            }
        }
    }
    info!("run: {} samples, route {:?}", n, session.executor().state());

    mgr.disconnect().await.ok();
    Ok(())
}
