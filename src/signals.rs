use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio::sync::watch;

/// What should we do when the user stops this program?
///
/// The first SIGINT/SIGTERM flips `shutdown`. The API stops accepting
/// requests and the monitor exits after its current tick, so a stop command
/// that is in flight still reaches the orchestrator.
pub fn handle_shutdown(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for signal in signals.forever() {
            if *shutdown.borrow() {
                log::warn!("Received signal {signal} again, still waiting for in-flight work");
                continue;
            }
            let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);
            log::info!("Received signal {signal}, shutting down gracefully...");
            if shutdown.send(true).is_err() {
                // Nobody is listening anymore.
                std::process::exit(0);
            }
        }
    });

    Ok(())
}
