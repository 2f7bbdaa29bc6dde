//! Post-delivery handling of the source file.
//!
//! Only runs after a confirmed delivery. Failures here are reported back as
//! values and never undo the delivery: the worst case is a file left in the
//! watch directory.

use std::io;
use std::path::{Path, PathBuf};

use relay_core::RelocationPolicy;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeResult {
    Deleted,
    DeleteFailed { error: String },
    Moved { destination: PathBuf },
    MoveFailed { error: String },
}

impl FinalizeResult {
    /// True when the source file is still sitting in the watch directory.
    pub fn left_in_place(&self) -> bool {
        matches!(
            self,
            FinalizeResult::DeleteFailed { .. } | FinalizeResult::MoveFailed { .. }
        )
    }
}

/// Delete or archive `path` according to `policy`.
pub async fn finalize(path: &Path, policy: &RelocationPolicy) -> FinalizeResult {
    if policy.delete_after_upload {
        return match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "Deleted file after upload");
                FinalizeResult::Deleted
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to delete uploaded file; it remains in the watch directory"
                );
                FinalizeResult::DeleteFailed {
                    error: e.to_string(),
                }
            }
        };
    }

    match relocate(path, &policy.archive_dir).await {
        Ok(destination) => {
            info!(destination = %destination.display(), "Moved uploaded file");
            FinalizeResult::Moved { destination }
        }
        Err(e) => {
            warn!(
                path = %path.display(),
                archive = %policy.archive_dir.display(),
                error = %e,
                "Failed to move uploaded file; it remains in the watch directory"
            );
            FinalizeResult::MoveFailed {
                error: e.to_string(),
            }
        }
    }
}

async fn relocate(path: &Path, archive_dir: &Path) -> io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;

    tokio::fs::create_dir_all(archive_dir).await?;
    let ts = chrono::Utc::now().timestamp();

    let mut attempt = 0u32;
    loop {
        let candidate = archive_dir.join(archive_name(file_name, ts, attempt));
        match move_into_new(path, &candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Archive name for the given attempt: `name`, `<unix_ts>_name`, then
/// `<unix_ts>_<n>_name`.
fn archive_name(file_name: &str, ts: i64, attempt: u32) -> String {
    match attempt {
        0 => file_name.to_string(),
        1 => format!("{ts}_{file_name}"),
        n => format!("{ts}_{}_{file_name}", n - 1),
    }
}

/// Move `from` to `to`, failing with `AlreadyExists` instead of replacing
/// an existing destination.
async fn move_into_new(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::hard_link(from, to).await {
        Ok(()) => tokio::fs::remove_file(from).await,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(link_err) => {
            // Different filesystem, or no hard links: copy into a fresh file.
            if !tokio::fs::try_exists(from).await.unwrap_or(false) {
                return Err(link_err);
            }
            copy_into_new(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}

/// Copy `from` into a newly created `to`. A partial copy is removed.
async fn copy_into_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut source = tokio::fs::File::open(from).await?;
    let mut dest = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(to)
        .await?;

    let copied = async {
        tokio::io::copy(&mut source, &mut dest).await?;
        dest.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(dest);
        let _ = tokio::fs::remove_file(to).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::normalize_extensions;

    fn policy(archive: &Path, delete: bool) -> RelocationPolicy {
        RelocationPolicy {
            archive_dir: archive.to_path_buf(),
            delete_after_upload: delete,
            allowed_extensions: normalize_extensions([".mkv"]),
            caption_template: "{filename}".to_string(),
        }
    }

    #[tokio::test]
    async fn moves_under_original_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("video.mkv");
        std::fs::write(&src, b"payload").unwrap();
        let archive = dir.path().join("archive");

        let result = finalize(&src, &policy(&archive, false)).await;
        assert_eq!(
            result,
            FinalizeResult::Moved {
                destination: archive.join("video.mkv")
            }
        );
        assert!(!src.exists());
        assert_eq!(std::fs::read(archive.join("video.mkv")).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn collision_gets_timestamp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(archive.join("video.mkv"), b"old").unwrap();
        let src = dir.path().join("video.mkv");
        std::fs::write(&src, b"new").unwrap();

        let result = finalize(&src, &policy(&archive, false)).await;
        let FinalizeResult::Moved { destination } = result else {
            panic!("expected move, got {result:?}");
        };

        let name = destination.file_name().unwrap().to_str().unwrap();
        let (ts, rest) = name.split_once('_').unwrap();
        assert!(ts.parse::<i64>().is_ok(), "prefix should be a unix timestamp: {name}");
        assert_eq!(rest, "video.mkv");
        assert_eq!(std::fs::read(archive.join("video.mkv")).unwrap(), b"old");
        assert_eq!(std::fs::read(&destination).unwrap(), b"new");
    }

    #[tokio::test]
    async fn taken_timestamp_name_gets_counter() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(archive.join("a.mkv"), b"1").unwrap();
        let ts = chrono::Utc::now().timestamp();
        // Cover this second and the next in case the clock ticks mid-test.
        for t in [ts, ts + 1] {
            std::fs::write(archive.join(format!("{t}_a.mkv")), b"2").unwrap();
        }
        let src = dir.path().join("a.mkv");
        std::fs::write(&src, b"3").unwrap();

        let result = finalize(&src, &policy(&archive, false)).await;
        let FinalizeResult::Moved { destination } = result else {
            panic!("expected move, got {result:?}");
        };
        let name = destination.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.ends_with("_1_a.mkv"), "unexpected destination {name}");
        assert_eq!(std::fs::read(&destination).unwrap(), b"3");
        assert_eq!(std::fs::read(archive.join("a.mkv")).unwrap(), b"1");
    }

    #[test]
    fn archive_names_in_order() {
        assert_eq!(archive_name("a.mkv", 42, 0), "a.mkv");
        assert_eq!(archive_name("a.mkv", 42, 1), "42_a.mkv");
        assert_eq!(archive_name("a.mkv", 42, 2), "42_1_a.mkv");
        assert_eq!(archive_name("a.mkv", 42, 3), "42_2_a.mkv");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_finalizes_never_share_a_destination() {
        for _ in 0..50 {
            let dir = tempfile::tempdir().unwrap();
            let archive = dir.path().join("archive");
            let watch = dir.path().join("watch");
            std::fs::create_dir_all(&archive).unwrap();
            std::fs::create_dir_all(&watch).unwrap();
            std::fs::write(archive.join("a.mkv"), b"archived").unwrap();

            // The second file's own name is the first one's stamped name.
            let ts = chrono::Utc::now().timestamp();
            let first = watch.join("a.mkv");
            let second = watch.join(format!("{ts}_a.mkv"));
            std::fs::write(&first, b"first").unwrap();
            std::fs::write(&second, b"second").unwrap();

            let policy = policy(&archive, false);
            let (ra, rb) = tokio::join!(
                tokio::spawn({
                    let (p, pol) = (first.clone(), policy.clone());
                    async move { finalize(&p, &pol).await }
                }),
                tokio::spawn({
                    let (p, pol) = (second.clone(), policy.clone());
                    async move { finalize(&p, &pol).await }
                }),
            );
            let (ra, rb) = (ra.unwrap(), rb.unwrap());

            let (FinalizeResult::Moved { destination: da }, FinalizeResult::Moved { destination: db }) =
                (&ra, &rb)
            else {
                panic!("expected two moves, got {ra:?} / {rb:?}");
            };
            assert_ne!(da, db);
            assert_eq!(std::fs::read(da).unwrap(), b"first");
            assert_eq!(std::fs::read(db).unwrap(), b"second");
            assert_eq!(std::fs::read(archive.join("a.mkv")).unwrap(), b"archived");
            assert_eq!(std::fs::read_dir(&archive).unwrap().count(), 3);
        }
    }

    #[tokio::test]
    async fn copy_fallback_refuses_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("video.mkv");
        let dest = dir.path().join("taken.mkv");
        std::fs::write(&src, b"new").unwrap();
        std::fs::write(&dest, b"old").unwrap();

        let err = copy_into_new(&src, &dest).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&dest).unwrap(), b"old");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn copy_fallback_writes_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("video.mkv");
        let dest = dir.path().join("copy.mkv");
        std::fs::write(&src, b"payload").unwrap();

        copy_into_new(&src, &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn delete_policy_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("video.mkv");
        std::fs::write(&src, b"payload").unwrap();

        let result = finalize(&src, &policy(&dir.path().join("archive"), true)).await;
        assert_eq!(result, FinalizeResult::Deleted);
        assert!(!src.exists());
        assert!(!dir.path().join("archive").exists());
    }

    #[tokio::test]
    async fn delete_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let result = finalize(&dir.path().join("missing.mkv"), &policy(dir.path(), true)).await;
        assert!(result.left_in_place());
    }

    #[tokio::test]
    async fn unusable_archive_dir_leaves_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("archive");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let src = dir.path().join("video.mkv");
        std::fs::write(&src, b"payload").unwrap();

        let result = finalize(&src, &policy(&blocker, false)).await;
        assert!(matches!(result, FinalizeResult::MoveFailed { .. }));
        assert!(src.exists());
    }
}
