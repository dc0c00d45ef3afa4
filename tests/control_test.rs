//! The control loop runs passes on kicks and stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tally_rs::config::Settings;
use tally_rs::engine::{ControlLoop, Engine};
use tally_rs::store::MemoryStore;

#[tokio::test]
async fn kicked_loop_rebuilds_queue_and_shuts_down() {
    let mut settings = Settings::default();
    settings.scheduler.pass_interval_secs = 3600;
    let engine = Arc::new(Engine::new(Arc::new(MemoryStore::new()), Arc::new(settings)));
    engine.seed_curves().await.unwrap();

    let control = ControlLoop::new(Arc::clone(&engine));
    let runner = {
        let control = control.clone();
        tokio::spawn(async move { control.run().await })
    };

    // Uploading kicks the loop well before the hourly pass.
    engine.upload_attachment(None).await.unwrap();
    let mut rebuilt = false;
    for _ in 0..50 {
        if !engine.queue_snapshot().await.is_empty() {
            rebuilt = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(rebuilt, "queue was never rebuilt");

    control.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("control loop did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn single_pass_reports_work() {
    let engine = Arc::new(Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Settings::default()),
    ));
    engine.seed_curves().await.unwrap();
    engine.upload_attachment(None).await.unwrap();

    let report = ControlLoop::new(engine).pass().await.unwrap();
    assert_eq!(report.queue.identification_tasks, 2);
    assert_eq!(report.queue.transcription_tasks, 0);
}
