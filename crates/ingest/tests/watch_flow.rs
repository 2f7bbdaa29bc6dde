//! Watcher → pipeline flow against a real directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{normalize_extensions, DeliveryTarget, RelocationPolicy, StabilitySettings};
use relay_ingest::{DedupGuard, DirectoryWatcher, IngestPipeline};
use relay_transport::{Deliverer, DeliveryError, DeliveryTransport, ProgressTracker, Upload};
use tokio::sync::{mpsc, Notify};

struct CountingTransport {
    sent: AtomicUsize,
}

#[async_trait::async_trait]
impl DeliveryTransport for CountingTransport {
    async fn resolve_target(&self, _channel: &str) -> Result<DeliveryTarget, DeliveryError> {
        Ok(target())
    }

    async fn send_file(
        &self,
        _target: &DeliveryTarget,
        upload: &Upload,
        progress: &ProgressTracker,
    ) -> Result<(), DeliveryError> {
        progress.advance(upload.size_bytes);
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn transport_name(&self) -> &str {
        "counting"
    }
}

fn target() -> DeliveryTarget {
    DeliveryTarget {
        chat_id: 42,
        title: None,
        username: Some("episodes".to_string()),
    }
}

async fn wait_for(path: &Path) -> bool {
    for _ in 0..200 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn dropped_file_is_delivered_and_archived() {
    let dir = tempfile::tempdir().unwrap();
    let watch = dir.path().join("watch");
    let archive = dir.path().join("uploaded");
    std::fs::create_dir_all(&watch).unwrap();

    let transport = Arc::new(CountingTransport {
        sent: AtomicUsize::new(0),
    });
    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(DedupGuard::new()),
        Deliverer::new(transport.clone(), Some(Duration::from_secs(10))),
        Arc::new(target()),
        RelocationPolicy {
            archive_dir: archive.clone(),
            delete_after_upload: false,
            allowed_extensions: normalize_extensions([".mkv"]),
            caption_template: "{filename}".to_string(),
        },
        StabilitySettings {
            poll_interval: Duration::from_millis(20),
            max_polls: 10,
        },
    ));

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = DirectoryWatcher::start(&watch, tx).unwrap();
    let shutdown = Arc::new(Notify::new());
    let runner = tokio::spawn(Arc::clone(&pipeline).run(rx, shutdown.clone()));

    std::fs::write(watch.join("notes.txt"), b"ignored").unwrap();
    std::fs::write(watch.join("ep01.mkv"), b"episode one").unwrap();

    assert!(wait_for(&archive.join("ep01.mkv")).await, "file was never archived");
    assert!(!watch.join("ep01.mkv").exists());
    assert!(watch.join("notes.txt").exists());

    drop(watcher);
    shutdown.notify_one();
    runner.await.unwrap();

    assert_eq!(transport.sent.load(Ordering::SeqCst), 1);
}
