//! logrelayd: a supervisory daemon with a framed log relay.
//!
//! The daemon does two things:
//! - launches and stops a small fixed set of cooperating programs based on
//!   the configured mode, and
//! - runs a single-threaded IPC relay that reads one framed (severity, text)
//!   record per client connection and forwards it to the logging sink.
//!
//! `logrelayd send` is the matching one-shot client.

mod config;
mod relay;
mod sink;
mod supervisor;

use config::{Cli, Cmd, Config, RunArgs, SendArgs};
use relay::{client, ExitReason, Relay, RelayOptions, StopHandle};
use sink::TracingSink;
use supervisor::Supervisor;

use clap::Parser;
use std::io;
use std::ptr;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Some(Cmd::Send(args)) => send(args),
        Some(Cmd::Run(args)) => run(args),
        None => run(RunArgs::default()),
    }
}

/// Run the supervisor and relay until a termination signal arrives.
fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(args)?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        mode = ?config.mode,
        socket = %config.socket.display(),
        max_connections = config.max_connections,
        max_frame_size = config.max_frame_size,
        "Starting logrelayd"
    );

    // The relay comes up before the supervised programs so the very first
    // thing a child logs has somewhere to go.
    let mut relay = match Relay::start(
        RelayOptions {
            socket: config.socket.clone(),
            max_connections: config.max_connections,
            max_frame_size: config.max_frame_size,
        },
        Box::new(TracingSink),
    ) {
        Ok(relay) => relay,
        Err(e) => {
            error!(error = %e, socket = %config.socket.display(), "cannot create relay endpoint");
            return Err(e.into());
        }
    };

    let mut supervisor = Supervisor::new(config.programs.clone());
    supervisor.start(config.mode);
    info!(children = supervisor.child_count(), "supervision started");

    if let Err(e) = spawn_signal_watcher(relay.stop_handle()) {
        error!(error = %e, "cannot watch termination signals");
        supervisor.stop();
        return Err(e.into());
    }

    let reason = relay.run();
    supervisor.stop();

    match reason {
        ExitReason::StopRequested => {
            info!(abandoned_connections = relay.connection_count(), "Exiting");
            Ok(())
        }
        ExitReason::WaitFailed(e) => {
            error!(error = %e, "event loop wait failed");
            Err(e.into())
        }
    }
}

/// Send one frame to a running relay.
fn send(args: SendArgs) -> Result<(), Box<dyn std::error::Error>> {
    client::send_frame(&args.socket, args.severity, args.message.as_bytes())?;
    Ok(())
}

/// Watch for termination signals on a dedicated thread.
///
/// SIGINT and SIGTERM are blocked process-wide, then awaited with `sigwait`.
/// The watcher does nothing but poke the stop handle — all real shutdown
/// work happens on the loop thread. Children spawned later are unaffected:
/// the standard library resets the signal mask when it execs.
fn spawn_signal_watcher(stop: StopHandle) -> io::Result<()> {
    let mut set: libc::sigset_t = unsafe { std::mem::zeroed() };
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        if libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    thread::Builder::new()
        .name("signal-watcher".to_string())
        .spawn(move || {
            let mut signal: libc::c_int = 0;
            if unsafe { libc::sigwait(&set, &mut signal) } == 0 {
                info!(signal, "termination signal received");
            }
            stop.request_stop();
        })?;

    Ok(())
}
