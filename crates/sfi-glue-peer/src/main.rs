//! SFI Glue peer - serves a demo object backend over inherited command fds.
//!
//! A glue client starts this binary with `--command-fds <in> <out>`. Requests
//! are read from `<in>`, answers and events are written to `<out>`. The
//! process exits once the client closes its end of the channel.

mod demo;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nix::fcntl::{fcntl, FcntlArg};
use sfi_glue::glue::{Decoder, GlueContext};
use sfi_glue::wire::ComWire;
use sfi_glue::GlueConfig;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "sfi-glue-peer")]
#[command(about = "Glue decoder serving a demo object backend")]
struct Args {
    /// Read requests from IN and write answers to OUT
    #[arg(long, num_args = 2, value_names = ["IN", "OUT"], required = true)]
    command_fds: Vec<RawFd>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log JSON lines instead of compact text
    #[arg(long)]
    json: bool,
}

fn init_logging(args: &Args) {
    // stdout belongs to the parent's capture, logs go to stderr
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Take ownership of an fd inherited from the parent.
#[allow(unsafe_code)]
fn inherit_fd(fd: RawFd) -> Result<OwnedFd> {
    fcntl(fd, FcntlArg::F_GETFD).with_context(|| format!("command fd {fd} is not open"))?;
    // SAFETY: the fd is open and was passed to this process for its exclusive
    // use; nothing else in the process owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let [input, output] = args.command_fds[..] else {
        bail!("expected exactly two command fds");
    };
    if input == output {
        bail!("command fds must differ (got {input} twice)");
    }

    let wire = ComWire::from_pipe("sfi-glue-peer", inherit_fd(input)?, inherit_fd(output)?);
    let mut decoder = Decoder::new(wire, GlueContext::new(demo::backend()));
    demo::add_handlers(&mut decoder);

    info!(
        "Serving glue requests (pid {}, fds {} {})",
        std::process::id(),
        input,
        output
    );
    decoder.serve(GlueConfig::ROUND_TRIP_POLL_INTERVAL);
    info!("Client disconnected, shutting down");
    Ok(())
}
