use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{debug, error};

use stratus::cli::{execute_command, Cli};
use stratus::error::{EXIT_SIGINT, EXIT_SIGTERM};
use stratus::exec::CancelFlag;

/// Install SIGINT/SIGTERM handlers that flip the cancellation flag so
/// the executor stops dispatching new entries while in-flight provider
/// calls finish. A second signal exits immediately.
fn install_signal_handlers(cancel: CancelFlag) -> anyhow::Result<Arc<AtomicI32>> {
    let exit_code = Arc::new(AtomicI32::new(0));
    let stored = Arc::clone(&exit_code);
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            let code = match sig {
                SIGINT => EXIT_SIGINT,
                SIGTERM => EXIT_SIGTERM,
                _ => continue,
            };
            if cancel.is_cancelled() {
                std::process::exit(code);
            }
            stored.store(code, Ordering::SeqCst);
            cancel.cancel();
        }
    });

    Ok(exit_code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(cli.verbose >= 2)
        .init();

    debug!("stratus started with verbosity level: {}", cli.verbose);

    let cancel = CancelFlag::new();
    let signal_code = match install_signal_handlers(cancel.clone()) {
        Ok(code) => code,
        Err(e) => {
            error!("failed to install signal handlers: {e}");
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let code = match execute_command(cli.command, cancel.clone()).await {
        Ok(code) => code,
        Err(e) => {
            error!("fatal: {e}");
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    // A cancelled run reports the signal that stopped it.
    let signalled = signal_code.load(Ordering::SeqCst);
    let code = if cancel.is_cancelled() && signalled != 0 {
        signalled
    } else {
        code
    };
    std::process::exit(code);
}
