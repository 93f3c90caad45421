use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel a token on the first SIGTERM or SIGINT.
///
/// [`Scheduler::drain`](crate::scheduler::Scheduler::drain) checks the token
/// before taking the next queued job, so the job already running is waited
/// for and the rest stay queued for the next invocation.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let sigterm = signal(SignalKind::terminate())?;
    let sigint = signal(SignalKind::interrupt())?;

    let cancel = token.clone();
    tokio::spawn(async move {
        let name = next_signal(sigterm, sigint).await;
        tracing::info!(signal = name, "Stopping after the running job");
        cancel.cancel();
    });

    Ok(token)
}

async fn next_signal(mut sigterm: Signal, mut sigint: Signal) -> &'static str {
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}
