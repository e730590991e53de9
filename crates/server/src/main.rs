mod server;
mod simulation;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use fragnet::{DirectoryCommand, DirectoryVerb, ServerConfig};
use server::GameServer;
use simulation::Arena;

#[derive(Parser)]
#[command(name = "fragnet-server")]
#[command(about = "Authoritative fragnet match server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = fragnet::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 60)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(
        long,
        default_value_t = 5,
        help = "Seconds of silence before a client is dropped (0 = never)"
    )]
    timeout: u64,

    #[arg(long, default_value_t = 0, help = "Snapshot broadcast period in ms (0 = every tick)")]
    broadcast_ms: u64,

    #[arg(long, default_value_t = 100.0, help = "Edge length of the square arena")]
    arena_size: f32,

    #[arg(long, help = "Directory server address (e.g., 10.0.0.1:8484)")]
    directory: Option<String>,

    #[arg(long, default_value = "fragnet", help = "Name announced to the directory")]
    name: String,

    #[arg(long, help = "Stop after this many seconds")]
    run_for: Option<u64>,
}

fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .with_context(|| format!("no address for {}", addr))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);
    let directory = args.directory.as_deref().map(resolve).transpose()?;

    let config = ServerConfig {
        broadcast_period: Duration::from_millis(args.broadcast_ms),
        client_timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        max_clients: args.max_clients,
        directory,
        ..Default::default()
    };

    let arena = Arena::new(args.arena_size);
    let mut server = GameServer::new(&bind_addr, arena, args.tick_rate, config)?;
    log::info!("Server started on {}", server.local_addr());

    if directory.is_some() {
        let port = server.local_addr().port().to_string();
        let fields = [args.name.as_str(), port.as_str()];
        let register = DirectoryCommand::from_fields(DirectoryVerb::RegisterServer, &fields);
        server.session_mut().send_directory(&register);
    }

    if let Some(secs) = args.run_for {
        let running = server.running();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            running.store(false, Ordering::SeqCst);
        });
    }

    server.run();
    log::info!("Server shutting down");

    Ok(())
}
