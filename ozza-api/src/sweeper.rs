/// Background invitation expiry sweep
///
/// Pending invitations past `expires_at` are already reported as expired on
/// read. The sweep persists that status periodically so listings, stats and
/// exports agree with what resolution would answer.

use ozza_shared::models::invitation::Invitation;
use sqlx::PgPool;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct InvitationSweeper {
    db: PgPool,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl InvitationSweeper {
    pub fn new(db: PgPool, interval: Duration, shutdown_token: CancellationToken) -> Self {
        Self {
            db,
            interval,
            shutdown_token,
        }
    }

    /// One pass; returns how many invitations were marked expired
    pub async fn sweep_once(&self) -> Result<u64, sqlx::Error> {
        let expired = Invitation::expire_stale(&self.db).await?;
        if expired > 0 {
            tracing::info!(expired, "Marked stale invitations expired");
        }
        Ok(expired)
    }

    /// Runs until the shutdown token is cancelled. Errors are logged and
    /// the next tick tries again.
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Invitation sweeper starting");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Invitation sweep failed");
                    }
                }
            }
        }

        tracing::info!("Invitation sweeper stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
