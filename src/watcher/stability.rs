//! Filesystem stability polling.
//!
//! Downloads arrive over time, so a newly visible entry is not processed
//! until its size stops changing. Files settle after a single unchanged
//! poll; directories need their aggregate size unchanged for a minimum
//! duration because multi-file downloads write to several files in turn.

use std::path::Path;
use std::time::Duration;
use walkdir::WalkDir;

/// Wait until a file's size is unchanged across one poll interval.
///
/// Returns `false` when the file disappears mid-poll: it is treated as
/// not-yet-stable, not as an error, and the caller simply drops it.
pub async fn wait_for_stable_file(path: &Path, poll_interval: Duration) -> bool {
    let mut previous: Option<u64> = None;
    loop {
        let size = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if previous == Some(size) {
            return true;
        }
        previous = Some(size);
        tokio::time::sleep(poll_interval).await;
    }
}

/// Wait until a directory's aggregate size is unchanged for `min_stable`,
/// polling every `check_interval`. Any size change resets the stable clock.
///
/// Returns `false` when the directory disappears mid-poll.
pub async fn wait_for_stable_dir(
    path: &Path,
    check_interval: Duration,
    min_stable: Duration,
) -> bool {
    let mut stable_for = Duration::ZERO;
    let mut previous: Option<u64> = None;

    while stable_for < min_stable {
        let Some(total) = aggregate_size(path) else {
            return false;
        };
        if previous == Some(total) {
            stable_for += check_interval;
        } else {
            stable_for = Duration::ZERO;
            previous = Some(total);
        }
        tokio::time::sleep(check_interval).await;
    }
    true
}

/// Sum of file sizes under a directory. Entries that vanish while walking
/// are skipped; a missing directory yields `None`.
fn aggregate_size(path: &Path) -> Option<u64> {
    if !path.is_dir() {
        return None;
    }
    let mut total = 0u64;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if let Ok(meta) = entry.metadata() {
            if meta.is_file() {
                total += meta.len();
            }
        }
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    const FAST: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_idle_file_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("done.mp3");
        std::fs::write(&path, b"finished download").unwrap();

        assert!(wait_for_stable_file(&path, FAST).await);
    }

    #[tokio::test]
    async fn test_missing_file_not_stable() {
        let dir = tempdir().unwrap();
        assert!(!wait_for_stable_file(&dir.path().join("gone.mp3"), FAST).await);
    }

    #[tokio::test]
    async fn test_growing_file_waits_for_idle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("downloading.mp3");
        std::fs::write(&path, b"part").unwrap();

        // Keep appending for a while, then stop writing.
        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut file = std::fs::OpenOptions::new()
                    .append(true)
                    .open(&writer_path)
                    .unwrap();
                file.write_all(b"more").unwrap();
            }
        });

        assert!(wait_for_stable_file(&path, FAST).await);
        writer.await.unwrap();

        // Stability implies the final size is what a reader will see.
        let final_size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(final_size, 4 + 3 * 4);
    }

    #[tokio::test]
    async fn test_idle_directory_is_stable() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("album");
        std::fs::create_dir(&album).unwrap();
        std::fs::write(album.join("01.mp3"), b"track one").unwrap();
        std::fs::write(album.join("02.mp3"), b"track two").unwrap();

        assert!(wait_for_stable_dir(&album, FAST, Duration::from_millis(30)).await);
    }

    #[tokio::test]
    async fn test_missing_directory_not_stable() {
        let dir = tempdir().unwrap();
        assert!(!wait_for_stable_dir(&dir.path().join("nope"), FAST, FAST).await);
    }

    #[tokio::test]
    async fn test_directory_growth_resets_stable_clock() {
        let dir = tempdir().unwrap();
        let album = dir.path().join("album");
        std::fs::create_dir(&album).unwrap();
        std::fs::write(album.join("01.mp3"), b"track one").unwrap();

        let writer_album = album.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            std::fs::write(writer_album.join("02.mp3"), b"late arrival").unwrap();
        });

        assert!(wait_for_stable_dir(&album, FAST, Duration::from_millis(50)).await);
        writer.await.unwrap();

        // Both tracks are visible once the aggregate size settled.
        assert_eq!(std::fs::read_dir(&album).unwrap().count(), 2);
    }

    #[test]
    fn test_aggregate_size_sums_nested_files() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("album");
        std::fs::create_dir_all(root.join("disc2")).unwrap();
        std::fs::write(root.join("a.mp3"), vec![0u8; 10]).unwrap();
        std::fs::write(root.join("disc2/b.mp3"), vec![0u8; 7]).unwrap();

        assert_eq!(aggregate_size(&root), Some(17));
        assert_eq!(aggregate_size(&root.join("missing")), None);
    }
}
