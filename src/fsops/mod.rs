use std::fs;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

use crate::errors::is_cross_device;

const COMPARE_BUF_SIZE: usize = 64 * 1024;

/// Copy a file or directory tree without replacing anything that already
/// exists at the destination. File mode bits are carried over on POSIX.
pub fn copy_entry(src: &Path, dest: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        return copy_symlink(src, dest);
    }
    if meta.is_dir() {
        copy_dir(src, dest)
    } else {
        copy_file_noreplace(src, dest)
    }
}

fn copy_file_noreplace(src: &Path, dest: &Path) -> io::Result<()> {
    let mut src_file = fs::File::open(src)?;
    let mut dst_file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)?;
    io::copy(&mut src_file, &mut dst_file)?;
    let perms = src_file.metadata()?.permissions();
    fs::set_permissions(dest, perms)
}

fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dest.join(entry.file_name());
        copy_entry(&path, &target)?;
    }
    let perms = fs::metadata(src)?.permissions();
    fs::set_permissions(dest, perms)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link_target = fs::read_link(src)?;
    std::os::unix::fs::symlink(link_target, dest)
}

#[cfg(windows)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
    let link_target = fs::read_link(src)?;
    if fs::metadata(src).map(|m| m.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(link_target, dest)
    } else {
        std::os::windows::fs::symlink_file(link_target, dest)
    }
}

/// Remove a file, symlink, or directory tree.
pub fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() && !meta.file_type().is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Rename, falling back to copy-then-delete across volumes. The fallback
/// rolls the destination back on any partial failure so the move stays
/// all-or-nothing from the caller's view.
pub fn move_with_fallback(src: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => move_by_copy_delete(src, dest),
        Err(err) => Err(err),
    }
}

pub fn move_by_copy_delete(src: &Path, dest: &Path) -> io::Result<()> {
    if let Err(copy_err) = copy_entry(src, dest) {
        let _ = remove_entry(dest);
        return Err(copy_err);
    }
    if let Err(del_err) = remove_entry(src) {
        // Keep exactly one copy of the data: drop the new one, report failure.
        let _ = remove_entry(dest);
        return Err(io::Error::new(
            del_err.kind(),
            format!(
                "copied {} -> {} but failed to delete the source: {del_err}",
                src.display(),
                dest.display()
            ),
        ));
    }
    Ok(())
}

/// Streaming byte-for-byte comparison of two regular files.
pub fn files_equal(left: &Path, right: &Path) -> io::Result<bool> {
    let left_meta = fs::metadata(left)?;
    let right_meta = fs::metadata(right)?;
    if left_meta.len() != right_meta.len() {
        return Ok(false);
    }
    let mut left_reader = BufReader::new(fs::File::open(left)?);
    let mut right_reader = BufReader::new(fs::File::open(right)?);
    let mut left_buf = vec![0u8; COMPARE_BUF_SIZE];
    let mut right_buf = vec![0u8; COMPARE_BUF_SIZE];
    loop {
        let left_read = read_full(&mut left_reader, &mut left_buf)?;
        let right_read = read_full(&mut right_reader, &mut right_buf)?;
        if left_read != right_read || left_buf[..left_read] != right_buf[..right_read] {
            return Ok(false);
        }
        if left_read == 0 {
            return Ok(true);
        }
    }
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Verify that a copy produced equivalent content: hash compare for files,
/// a name-by-name walk with per-file hash compare for directory trees.
pub fn copies_match(src: &Path, dest: &Path) -> io::Result<bool> {
    let src_meta = fs::symlink_metadata(src)?;
    let dest_meta = fs::symlink_metadata(dest)?;
    if src_meta.file_type().is_symlink() || dest_meta.file_type().is_symlink() {
        return Ok(src_meta.file_type().is_symlink() == dest_meta.file_type().is_symlink()
            && fs::read_link(src)? == fs::read_link(dest)?);
    }
    if src_meta.is_dir() != dest_meta.is_dir() {
        return Ok(false);
    }
    if !src_meta.is_dir() {
        return Ok(hash_file(src)? == hash_file(dest)?);
    }
    let mut src_names: Vec<_> = fs::read_dir(src)?
        .filter_map(|e| e.ok().map(|e| e.file_name()))
        .collect();
    let mut dest_names: Vec<_> = fs::read_dir(dest)?
        .filter_map(|e| e.ok().map(|e| e.file_name()))
        .collect();
    src_names.sort();
    dest_names.sort();
    if src_names != dest_names {
        return Ok(false);
    }
    for name in src_names {
        if !copies_match(&src.join(&name), &dest.join(&name))? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Content hash used for post-copy verification.
pub fn hash_file(path: &Path) -> io::Result<blake3::Hash> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; COMPARE_BUF_SIZE];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize())
}

/// Logical size of an entry: file length, or the sum of file lengths for a
/// directory tree.
pub fn entry_size(path: &Path) -> u64 {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() || meta.file_type().is_symlink() {
        return meta.len();
    }
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(iter) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in iter.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total = total.saturating_add(meta.len());
            }
        }
    }
    total
}
