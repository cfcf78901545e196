use futures_util::stream::{self, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit status after a second interrupt, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// Cancels a token on the first SIGINT (or SIGTERM on unix). A second signal
/// exits the process without waiting for the entries to stop.
pub struct InterruptWatcher {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl InterruptWatcher {
    pub fn install() -> Self {
        let token = CancellationToken::new();
        let signalled = token.clone();
        let task = tokio::spawn(async move {
            if watch(&signalled, signals()).await {
                warn!("interrupted again, exiting");
                std::process::exit(FORCED_EXIT_CODE);
            }
        });
        Self { token, task }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Returns true when a second signal arrives after the token was cancelled.
async fn watch(token: &CancellationToken, signals: impl Stream<Item = ()>) -> bool {
    let mut signals = std::pin::pin!(signals);
    if signals.next().await.is_none() {
        return false;
    }
    warn!("interrupted, stopping after the current records");
    token.cancel();
    signals.next().await.is_some()
}

fn signals() -> impl Stream<Item = ()> {
    stream::unfold((), |()| async { wait_for_signal().await.then_some(((), ())) })
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        return tokio::signal::ctrl_c().await.is_ok();
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        received = terminate.recv() => received.is_some(),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
