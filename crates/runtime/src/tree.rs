//! Directory-tree helpers: snapshot copy, touch and mtime comparison.

use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

/// Copy `src` into a new directory `dst` without following symlinks.
///
/// Directories, regular files (mode and timestamps kept) and symlinks (same
/// target) are reproduced.  Any other file type aborts the copy.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    // Directory modes are applied last so read-only directories can still
    // be filled.
    let mut dir_modes: Vec<(PathBuf, fs::Permissions)> = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        let meta = entry.metadata()?;

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_modes.push((target, meta.permissions()));
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            let times = FileTimes::new()
                .set_accessed(meta.accessed()?)
                .set_modified(meta.modified()?);
            File::open(&target)?.set_times(times)?;
        } else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported file type at {}", entry.path().display()),
            ));
        }
    }

    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(dir, perms)?;
    }
    Ok(())
}

/// Replace `dst` with a fresh copy of `src`.  Runs on the blocking pool; the
/// caller awaits completion before doing anything else.
pub async fn replace_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || {
        remove_dir_if_exists(&dst)?;
        copy_tree(&src, &dst)
    })
    .await
    .map_err(io::Error::other)?
}

pub fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Create `path` if missing and set its mtime to now.
pub fn touch(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let now = SystemTime::now();
    file.set_times(FileTimes::new().set_accessed(now).set_modified(now))?;
    file.sync_all()
}

/// `true` if `dir` or anything below it was modified strictly after
/// `reference`.  Symlinks are not followed.
pub fn modified_after(dir: &Path, reference: SystemTime) -> io::Result<bool> {
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if entry.metadata()?.modified()? > reference {
            return Ok(true);
        }
    }
    Ok(false)
}
