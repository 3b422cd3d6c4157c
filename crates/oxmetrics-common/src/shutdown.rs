use tokio_util::sync::CancellationToken;

/// Cancels `cancel` on the first SIGINT, SIGTERM or SIGQUIT (Ctrl-C only on
/// non-Unix targets).
pub async fn cancel_on_signal(cancel: CancellationToken) {
    let name = wait_for_signal().await;
    tracing::info!(signal = name, "Received shutdown signal");
    cancel.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut term), Ok(mut quit)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) else {
        tracing::warn!("Failed to install Unix signal handlers, listening for Ctrl-C only");
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "CTRL-C"
}
