mod game;

use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use fragnet::{ClientConfig, ClientSession, ConnectionState, InputBits};
use game::Walker;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Fire,
}

impl Command {
    fn bits(self) -> InputBits {
        match self {
            Command::Forward => InputBits::FORWARD,
            Command::Backward => InputBits::BACKWARD,
            Command::Left => InputBits::LEFT,
            Command::Right => InputBits::RIGHT,
            Command::Fire => InputBits::PRIMARY_WEAPON,
        }
    }
}

#[derive(Parser)]
#[command(name = "fragnet-client")]
#[command(about = "Headless scripted fragnet client")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:9001", help = "Server address to connect to")]
    server: String,

    #[arg(short, long, default_value = "0.0.0.0:0")]
    bind: String,

    #[arg(short, long, default_value = "player")]
    name: String,

    #[arg(short, long, help = "Join this lobby and wait for the match instead of playing at once")]
    lobby: Option<String>,

    #[arg(long, value_enum, help = "Commands held for the whole session")]
    hold: Vec<Command>,

    #[arg(long, default_value_t = 5.0)]
    speed: f32,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 10, help = "Seconds to play before leaving")]
    duration: u64,

    #[arg(long, help = "Directory server address (e.g., 10.0.0.1:8484)")]
    directory: Option<String>,
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .with_context(|| format!("no address for {}", addr))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server = resolve(&args.server)?;
    let script = args
        .hold
        .iter()
        .fold(InputBits::empty(), |bits, command| bits | command.bits());

    let config = ClientConfig {
        directory: args.directory.as_deref().map(resolve).transpose()?,
        ..Default::default()
    };
    let walker = Walker::new(script, args.speed);
    let mut client = ClientSession::bind(walker, args.bind.as_str(), config)?;
    log::info!("Client bound to {}", client.local_addr());

    client.connect(server, &args.name)?;

    let tick = Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let mut joined = false;

    while Instant::now() < deadline {
        if let Err(e) = client.poll_network() {
            log::error!("Network error: {}", e);
        }

        if client.state() == ConnectionState::Connected && !joined {
            joined = true;
            match args.lobby.as_deref() {
                Some(lobby) => client.join_lobby(Some(lobby))?,
                None => client.begin_snapshots(),
            }
        }
        if client.is_sending_snapshots() {
            client.game_mut().step(tick);
        }
        client.update(tick);

        if client.game().kicked {
            log::warn!("Dropped by the server");
            break;
        }
        thread::sleep(tick);
    }

    log::info!(
        "Finished at {} after {} corrections, {} other players in view, lobby [{}]",
        client.game().position(),
        client.corrections(),
        client.entities().len(),
        client.game().roster.join(", ")
    );
    client.disconnect();

    Ok(())
}
