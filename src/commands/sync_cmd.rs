//! Sync CLI command: push queued changes to the shared remote directory.

use clap::Args;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conceptsync_core::sync::OperationOutcome;
use conceptsync_core::{SyncOrchestrator, SyncReport};

use crate::remote::DirectoryRemoteStore;

/// Push queued changes to the remote copy
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Keep running, checking the remote directory every SECONDS and syncing
    /// whenever it is reachable and changes are queued
    #[arg(long, value_name = "SECONDS")]
    watch: Option<u64>,
}

impl SyncCommand {
    pub async fn run(
        &self,
        engine: &SyncOrchestrator,
        remote: &DirectoryRemoteStore,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self.watch {
            None => self.sync_once(engine, remote).await,
            Some(secs) => self.watch(engine, remote, secs).await,
        }
    }

    async fn sync_once(
        &self,
        engine: &SyncOrchestrator,
        remote: &DirectoryRemoteStore,
    ) -> Result<(), Box<dyn std::error::Error>> {
        engine.set_online(remote.is_reachable().await);

        println!("Syncing with {}...", remote.root().display());
        println!();

        let report = engine.manual_sync().await;
        print_report(&report);
        Ok(())
    }

    async fn watch(
        &self,
        engine: &SyncOrchestrator,
        remote: &DirectoryRemoteStore,
        secs: u64,
    ) -> Result<(), Box<dyn std::error::Error>> {
        // Report connectivity transitions as they happen
        let last_online = Arc::new(AtomicBool::new(engine.is_online()));
        let seen = Arc::clone(&last_online);
        let _listener = engine.add_listener(move |status| {
            if seen.swap(status.is_online, Ordering::SeqCst) != status.is_online {
                if status.is_online {
                    println!("Remote reachable again.");
                } else {
                    println!("Remote unreachable; changes stay queued.");
                }
            }
        });

        println!(
            "Watching {} every {}s (Ctrl-C to stop)...",
            remote.root().display(),
            secs.max(1)
        );

        let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(report) = watch_tick(engine, remote.is_reachable().await).await {
                        print_report(&report);
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    break;
                }
            }
        }

        println!("Stopped.");
        Ok(())
    }
}

/// One watch-mode tick: records whether the remote is reachable and, if it
/// is and changes are queued, runs a pass. Every pass, including the first
/// one after reconnecting, comes from here so its report can be printed.
async fn watch_tick(engine: &SyncOrchestrator, reachable: bool) -> Option<SyncReport> {
    engine.set_online(reachable);
    let status = engine.status();
    if !status.is_online || status.pending_operations == 0 {
        return None;
    }
    let report = engine.manual_sync().await;
    (!report.is_skipped()).then_some(report)
}

fn print_report(report: &SyncReport) {
    for outcome in &report.outcomes {
        let marker = match outcome {
            OperationOutcome::Created { .. } | OperationOutcome::Updated { .. } => "✓",
            OperationOutcome::Failed { .. } => "✗",
            _ => "!",
        };
        println!("  {} {}", marker, outcome);
    }
    if !report.outcomes.is_empty() {
        println!();
    }

    if report.outcomes.is_empty() && !report.is_skipped() {
        println!("Nothing to sync.");
    } else {
        println!("{}", report);
    }
    if report.conflict_count() > 0 {
        println!("Run `conceptsync conflicts list` to review conflicts.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conceptsync_core::sync::{InMemoryRemoteStore, OperationKind, OrchestratorConfig};
    use conceptsync_core::{Document, DocumentId, MemoryStore};

    fn offline_engine() -> SyncOrchestrator {
        SyncOrchestrator::open(
            Arc::new(InMemoryRemoteStore::new()),
            Arc::new(MemoryStore::new()),
            OrchestratorConfig {
                start_online: false,
                ..OrchestratorConfig::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_watch_tick_reports_pass_after_reconnect() {
        let engine = offline_engine();
        let document = Document::with_id(DocumentId::parse("doc1").unwrap(), "Physics");
        engine
            .enqueue_sync(OperationKind::Create, document, None)
            .unwrap();

        assert!(watch_tick(&engine, false).await.is_none());
        assert_eq!(engine.status().pending_operations, 1);

        let report = watch_tick(&engine, true).await.unwrap();
        assert_eq!(report.synced_count(), 1);
        assert_eq!(engine.status().pending_operations, 0);
    }

    #[tokio::test]
    async fn test_watch_tick_idle_without_pending_changes() {
        let engine = offline_engine();
        assert!(watch_tick(&engine, true).await.is_none());
        assert!(engine.is_online());
    }
}
