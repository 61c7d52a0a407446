//! Entry point for `echo-probe`.
//!
//! Parses CLI arguments and dispatches into either **serve** or **client**
//! mode. All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, argument parsing, the interactive file-name
//! prompt) and fatal-error reporting with a non-zero exit.

use std::io::BufRead;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use echo_probe::addr::{init_principal_map, Address};
use echo_probe::server;
use echo_probe::sim::SimLink;
use echo_probe::socket::{StreamTransport, Transport, UdpTransport, XferError};
use echo_probe::transfer::{transfer_file, TransferConfig, TransferStats};

/// Windowed echo-transfer exerciser for fixed and hierarchical addresses.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Connectionless, loss-prone transport (one datagram per chunk).
    Datagram,
    /// Connection-oriented, order-preserving transport.
    Stream,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Family {
    /// Fixed host + port addresses over real UDP/TCP sockets.
    Ip,
    /// Hierarchical row-list addresses over the in-process echo link.
    Xip,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run an echo peer, reflecting everything it receives.
    Serve {
        #[arg(long, value_enum)]
        mode: Mode,
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
    /// Stream files to an echo peer and verify the echoed copies.
    Client {
        #[arg(long, value_enum)]
        mode: Mode,
        #[arg(long, value_enum)]
        family: Family,
        /// Server host (ip family).
        #[arg(long, required_if_eq("family", "ip"))]
        server: Option<String>,
        /// Server port (ip family).
        #[arg(long, required_if_eq("family", "ip"))]
        port: Option<u16>,
        /// File holding this client's hierarchical address (xip family).
        #[arg(long, required_if_eq("family", "xip"))]
        client_addr: Option<PathBuf>,
        /// File holding the server's hierarchical address (xip family).
        #[arg(long, required_if_eq("family", "xip"))]
        server_addr: Option<PathBuf>,
        /// Bytes per chunk.
        #[arg(long, default_value_t = 512)]
        chunk_size: usize,
        /// Chunks per window.
        #[arg(long, default_value_t = 4)]
        times: usize,
        /// Files to transfer; with none given, names are read from stdin.
        files: Vec<PathBuf>,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Cmd::Serve { mode, bind } => serve(mode, &bind),
        Cmd::Client {
            mode,
            family,
            server,
            port,
            client_addr,
            server_addr,
            chunk_size,
            times,
            files,
        } => {
            let cfg = TransferConfig::new(chunk_size, times)?;
            match family {
                Family::Ip => client_ip(
                    mode,
                    server.as_deref().expect("clap enforces --server"),
                    port.expect("clap enforces --port"),
                    cfg,
                    &files,
                ),
                Family::Xip => client_xip(
                    client_addr.as_deref().expect("clap enforces --client-addr"),
                    server_addr.as_deref().expect("clap enforces --server-addr"),
                    cfg,
                    &files,
                ),
            }
        }
    }
}

fn serve(mode: Mode, bind: &str) -> Result<()> {
    match mode {
        Mode::Datagram => {
            let socket =
                UdpSocket::bind(bind).with_context(|| format!("bind {bind}"))?;
            log::info!("datagram echo peer on {bind}");
            server::run_udp_echo(&socket)?;
        }
        Mode::Stream => {
            let listener =
                TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
            log::info!("stream echo peer on {bind}");
            server::run_tcp_echo(&listener)?;
        }
    }
    Ok(())
}

/// Fixed-family client: real UDP or TCP against `server:port`.
fn client_ip(
    mode: Mode,
    server: &str,
    port: u16,
    cfg: TransferConfig,
    files: &[PathBuf],
) -> Result<()> {
    let expected = Address::parse_fixed(Some(server), port)
        .context("parsing server address")?;
    let dst = match &expected {
        Address::Fixed(sa) => *sa,
        Address::Hierarchical(_) => unreachable!(),
    };

    match mode {
        Mode::Datagram => {
            let socket = UdpTransport::client_socket().context("binding client socket")?;
            let mut transport = UdpTransport::new(socket, dst)?;
            // The datagram peer coalesces chunks until flushed; the hook is
            // what triggers each batch's echo.
            for_each_file(files, |path| {
                let stats = transfer_file(
                    &mut transport,
                    &expected,
                    path,
                    cfg,
                    Some(UdpTransport::send_flush),
                )
                .with_context(|| format!("transferring {}", path.display()))?;
                report(path, stats);
                Ok(())
            })
        }
        Mode::Stream => {
            let stream = TcpStream::connect(SocketAddr::V4(dst))
                .with_context(|| format!("connect {dst}"))?;
            let mut transport = StreamTransport::new(stream);
            for_each_file(files, |path| {
                run_one(&mut transport, &expected, path, cfg)
            })
        }
    }
}

/// Hierarchical-family client.
///
/// No kernel socket family exists for hierarchical addresses here, so the
/// transfer runs over the in-process echo link; the windowing, loss, and
/// verification logic is identical to the datagram path.
fn client_xip(
    client_addr: &Path,
    server_addr: &Path,
    cfg: TransferConfig,
    files: &[PathBuf],
) -> Result<()> {
    init_principal_map();
    // The client's own address is validated even though the echo link does
    // not route by it; a malformed address file is a setup-time failure.
    let _local = Address::parse_hier_file(client_addr)
        .with_context(|| format!("client address {}", client_addr.display()))?;
    let expected = Address::parse_hier_file(server_addr)
        .with_context(|| format!("server address {}", server_addr.display()))?;

    let mut link = SimLink::new(expected.clone());
    for_each_file(files, |path| run_one(&mut link, &expected, path, cfg))
}

fn run_one<T: Transport>(
    transport: &mut T,
    expected: &Address,
    path: &Path,
    cfg: TransferConfig,
) -> Result<()> {
    let stats = transfer_file::<T, fn(&mut T) -> Result<(), XferError>>(
        transport, expected, path, cfg, None,
    )
    .with_context(|| format!("transferring {}", path.display()))?;
    report(path, stats);
    Ok(())
}

fn report(path: &Path, stats: TransferStats) {
    println!(
        "{}: {} bytes, {} batches, {} lost",
        path.display(),
        stats.bytes_sent,
        stats.batches,
        stats.batches_lost
    );
}

/// Run `f` for each named file, or prompt on stdin when none were given.
///
/// Interactive mode skips blank lines and stops at end of input (Ctrl+D).
fn for_each_file(files: &[PathBuf], mut f: impl FnMut(&Path) -> Result<()>) -> Result<()> {
    if !files.is_empty() {
        for path in files {
            f(path)?;
        }
        return Ok(());
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading command")?;
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        f(Path::new(name))?;
    }
    Ok(())
}
