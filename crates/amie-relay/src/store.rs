//! Folder store.
//!
//! Delivery state lives in which folder a packet file is in:
//!
//! ```text
//! inbound:  in/ --no-clobber move--> received/
//! outbound: out/ --move--> wait/ | done/ | out_failed/
//! ```
//!
//! Every write is synced before the move that publishes it, and the target
//! directory is synced after.

use crate::error::{StoreError, StoreResult};
use amie_config::Folders;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Extension of packet files in the outbox.
pub const PACKET_EXTENSION: &str = "xml";

/// Durably place an inbound payload at `received_folder/file_name`.
///
/// The bytes are written to `in_folder/file_name` first and only moved once
/// synced, so `received_folder` never holds a partial file. An existing
/// file in either place is a [`StoreError::Collision`] and is left alone.
pub fn persist_received(
    folders: &Folders,
    file_name: &str,
    payload: &[u8],
) -> StoreResult<PathBuf> {
    let staging = folders.in_folder.join(file_name);
    let destination = folders.received_folder.join(file_name);
    if destination.exists() {
        return Err(StoreError::Collision(destination));
    }

    write_new(&staging, payload)?;

    if let Err(err) = move_no_clobber(&staging, &destination) {
        let _ = fs::remove_file(&staging);
        return Err(err);
    }
    sync_dir(&folders.received_folder);
    Ok(destination)
}

/// Move `file` into `dest_dir` under the same name, replacing any file there.
pub fn relocate(file: &Path, dest_dir: &Path) -> StoreResult<PathBuf> {
    let file_name = file
        .file_name()
        .ok_or_else(|| StoreError::InvalidFileName(file.to_path_buf()))?;
    let destination = dest_dir.join(file_name);

    match fs::rename(file, &destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(err.into()),
        Err(_) => {
            // Different filesystem: copy, sync, then swap into place.
            let staged = copy_beside(file, &destination)?;
            if let Err(err) = fs::rename(&staged, &destination) {
                let _ = fs::remove_file(&staged);
                return Err(err.into());
            }
            discard_source(file, &destination);
        }
    }
    sync_dir(dest_dir);
    Ok(destination)
}

/// Packet files waiting in the outbox, sorted by name.
///
/// Only regular files with the packet extension are listed; dot files and
/// subdirectories are skipped.
pub fn list_outbox(out_folder: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(out_folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let visible = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| !name.starts_with('.'));
        let is_packet = path
            .extension()
            .is_some_and(|extension| extension == PACKET_EXTENSION);
        if visible && is_packet {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn write_new(path: &Path, payload: &[u8]) -> StoreResult<()> {
    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::Collision(path.to_path_buf()));
        }
        Err(err) => return Err(err.into()),
    };

    let written = file.write_all(payload).and_then(|()| file.sync_all());
    if let Err(err) = written {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(err.into());
    }
    Ok(())
}

/// Move `src` to `dest`, failing if `dest` exists.
///
/// A hard link is the atomic no-clobber primitive. Filesystems without links
/// (and links across devices) fall back to a rename guarded by an existence
/// check.
fn move_no_clobber(src: &Path, dest: &Path) -> StoreResult<()> {
    move_no_clobber_with(src, dest, |from, to| fs::hard_link(from, to))
}

fn move_no_clobber_with(
    src: &Path,
    dest: &Path,
    link: impl Fn(&Path, &Path) -> io::Result<()>,
) -> StoreResult<()> {
    match link(src, dest) {
        Ok(()) => {
            discard_source(src, dest);
            return Ok(());
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StoreError::Collision(dest.to_path_buf()));
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(err.into()),
        Err(err) => {
            debug!(path = %dest.display(), error = %err, "Hard link unavailable, renaming");
        }
    }

    if dest.exists() {
        return Err(StoreError::Collision(dest.to_path_buf()));
    }
    match fs::rename(src, dest) {
        Ok(()) => return Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(err.into()),
        Err(_) => {}
    }

    // Different filesystem: stage the bytes beside `dest`, then swap into place.
    let staged = copy_beside(src, dest)?;
    if dest.exists() {
        let _ = fs::remove_file(&staged);
        return Err(StoreError::Collision(dest.to_path_buf()));
    }
    if let Err(err) = fs::rename(&staged, dest) {
        let _ = fs::remove_file(&staged);
        return Err(err.into());
    }
    discard_source(src, dest);
    Ok(())
}

/// Remove the source of a move that already reached `dest`.
///
/// The move has happened at this point, so a leftover source is logged
/// rather than reported as a failed move.
fn discard_source(src: &Path, dest: &Path) {
    if let Err(err) = fs::remove_file(src) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(
                path = %src.display(),
                destination = %dest.display(),
                error = %err,
                "Could not remove source after move"
            );
        }
    }
}

/// Copy `src` to a synced hidden file in `dest`'s directory.
fn copy_beside(src: &Path, dest: &Path) -> StoreResult<PathBuf> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidFileName(dest.to_path_buf()))?;
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StoreError::InvalidFileName(dest.to_path_buf()))?;
    let nanos = std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let staged = dir.join(format!(".{file_name}.partial.{nanos}"));

    let copied = (|| -> io::Result<()> {
        fs::copy(src, &staged)?;
        fs::File::open(&staged)?.sync_all()
    })();
    if let Err(err) = copied {
        let _ = fs::remove_file(&staged);
        return Err(err.into());
    }
    Ok(staged)
}

fn sync_dir(dir: &Path) {
    let synced = fs::File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(err) = synced {
        warn!(path = %dir.display(), error = %err, "Could not sync directory");
    }
}

/// Run a blocking store operation off the async runtime.
pub async fn run_blocking<T, F>(operation: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| StoreError::Io(io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn folders() -> (TempDir, Folders) {
        let dir = TempDir::new().unwrap();
        let folders = Folders::under(dir.path());
        folders.ensure(true).unwrap();
        (dir, folders)
    }

    #[test]
    fn persist_places_file_in_received_only() {
        let (_dir, folders) = folders();
        let path = persist_received(&folders, "a.xml", b"<amie/>").unwrap();

        assert_eq!(path, folders.received_folder.join("a.xml"));
        assert_eq!(fs::read(&path).unwrap(), b"<amie/>");
        assert!(!folders.in_folder.join("a.xml").exists());
    }

    #[test]
    fn persist_refuses_to_overwrite_received_file() {
        let (_dir, folders) = folders();
        fs::write(folders.received_folder.join("a.xml"), b"first").unwrap();

        let err = persist_received(&folders, "a.xml", b"second").unwrap_err();
        assert!(matches!(err, StoreError::Collision(_)));
        assert_eq!(
            fs::read(folders.received_folder.join("a.xml")).unwrap(),
            b"first"
        );
        assert!(!folders.in_folder.join("a.xml").exists());
    }

    #[test]
    fn persist_leaves_foreign_staging_file_alone() {
        let (_dir, folders) = folders();
        fs::write(folders.in_folder.join("a.xml"), b"someone else").unwrap();

        let err = persist_received(&folders, "a.xml", b"ours").unwrap_err();
        assert!(matches!(err, StoreError::Collision(_)));
        assert_eq!(
            fs::read(folders.in_folder.join("a.xml")).unwrap(),
            b"someone else"
        );
        assert!(!folders.received_folder.join("a.xml").exists());
    }

    #[test]
    fn persist_fails_when_received_folder_is_missing() {
        let (_dir, folders) = folders();
        fs::remove_dir(&folders.received_folder).unwrap();

        assert!(persist_received(&folders, "a.xml", b"<amie/>").is_err());
        assert!(!folders.in_folder.join("a.xml").exists());
    }

    #[test]
    fn move_without_hard_links_falls_back_to_rename() {
        let (_dir, folders) = folders();
        let source = folders.in_folder.join("a.xml");
        let dest = folders.received_folder.join("a.xml");
        fs::write(&source, b"<amie/>").unwrap();

        let unsupported = |_: &Path, _: &Path| -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        };
        move_no_clobber_with(&source, &dest, unsupported).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"<amie/>");
        assert!(!source.exists());
    }

    #[test]
    fn move_without_hard_links_still_refuses_to_overwrite() {
        let (_dir, folders) = folders();
        let source = folders.in_folder.join("a.xml");
        let dest = folders.received_folder.join("a.xml");
        fs::write(&source, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        let unsupported = |_: &Path, _: &Path| -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::Unsupported))
        };
        let err = move_no_clobber_with(&source, &dest, unsupported).unwrap_err();

        assert!(matches!(err, StoreError::Collision(_)));
        assert_eq!(fs::read(&dest).unwrap(), b"old");
        assert!(source.exists());
    }

    #[test]
    fn leftover_source_after_link_is_not_a_failure() {
        let (_dir, folders) = folders();
        let source = folders.in_folder.join("a.xml");
        let dest = folders.received_folder.join("a.xml");
        fs::write(&source, b"<amie/>").unwrap();

        // The link lands and the source vanishes before cleanup runs.
        let link_then_unlink = |from: &Path, to: &Path| -> io::Result<()> {
            fs::hard_link(from, to)?;
            fs::remove_file(from)
        };
        move_no_clobber_with(&source, &dest, link_then_unlink).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"<amie/>");
    }

    #[tokio::test]
    async fn blocking_operations_return_their_result() {
        let (_dir, folders) = folders();
        let out_folder = folders.out_folder.clone();
        fs::write(out_folder.join("a.xml"), b"x").unwrap();

        let listed = run_blocking(move || list_outbox(&out_folder)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn relocate_keeps_name_and_overwrites() {
        let (_dir, folders) = folders();
        let source = folders.out_folder.join("r.xml");
        fs::write(&source, b"new").unwrap();
        fs::write(folders.wait_folder.join("r.xml"), b"old").unwrap();

        let moved = relocate(&source, &folders.wait_folder).unwrap();
        assert_eq!(moved, folders.wait_folder.join("r.xml"));
        assert_eq!(fs::read(&moved).unwrap(), b"new");
        assert!(!source.exists());
    }

    #[test]
    fn relocate_missing_file_is_an_error() {
        let (_dir, folders) = folders();
        let err = relocate(&folders.out_folder.join("gone.xml"), &folders.done_folder);
        assert!(matches!(err, Err(StoreError::Io(_))));
    }

    #[test]
    fn outbox_lists_sorted_packet_files() {
        let (_dir, folders) = folders();
        for name in ["b.xml", "a.xml", "notes.txt", ".hidden.xml", "c.XML"] {
            fs::write(folders.out_folder.join(name), b"x").unwrap();
        }
        fs::create_dir(folders.out_folder.join("nested.xml")).unwrap();

        let listed: Vec<String> = list_outbox(&folders.out_folder)
            .unwrap()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(listed, vec!["a.xml", "b.xml"]);
    }
}
