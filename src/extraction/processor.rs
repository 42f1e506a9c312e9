//! Background extraction processor. Every tick runs one extraction batch per
//! configured project. Failed messages stay unprocessed and are picked up by
//! a later tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::extraction::orchestrator::ExtractionOrchestrator;

/// Spawn a background task that extracts tasks for `project_ids` on an interval.
///
/// Runs immediately, then every `interval_secs`. Returns a `JoinHandle` and
/// shutdown flag.
pub fn spawn_extraction_processor(
    orchestrator: Arc<ExtractionOrchestrator>,
    project_ids: Vec<Uuid>,
    interval_secs: u64,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let batch_size = orchestrator.config().default_batch_size;

    let handle = tokio::spawn(async move {
        info!(
            projects = project_ids.len(),
            batch_size, "Extraction processor started, running every {interval_secs}s"
        );

        let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Extraction processor shutting down");
                return;
            }

            for project_id in &project_ids {
                match orchestrator.extract_tasks(*project_id, batch_size).await {
                    Ok(run) => debug!(
                        project_id = %project_id,
                        messages = run.messages_processed,
                        tasks = run.tasks_created.len(),
                        "Extraction batch finished"
                    ),
                    Err(e) => error!(project_id = %project_id, error = %e, "Extraction run failed"),
                }
            }
        }
    });

    (handle, shutdown_flag)
}
