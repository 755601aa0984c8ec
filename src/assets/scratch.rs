use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Temporary file area used to hand buffer-backed images to a file-based decoder.
pub trait ScratchArea: Send {
    /// Write `bytes` to a fresh file and return its path.
    fn stage(&self, name_hint: &str, mime_type: &str, bytes: &[u8]) -> io::Result<PathBuf>;
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Scratch files in a single directory, named uniquely per process.
pub struct FsScratch {
    dir: PathBuf,
    counter: AtomicU64,
}

impl FsScratch {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ScratchArea for FsScratch {
    fn stage(&self, name_hint: &str, mime_type: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}-{}-{}.{}",
            sanitize(name_hint),
            std::process::id(),
            n,
            extension_for_mime(mime_type)
        );
        let path = self.dir.join(file_name);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// Removes the staged file when dropped, whatever the decode outcome was.
pub(crate) struct StagedFile<'a> {
    scratch: &'a dyn ScratchArea,
    path: PathBuf,
}

impl<'a> StagedFile<'a> {
    pub(crate) fn new(scratch: &'a dyn ScratchArea, path: PathBuf) -> Self {
        Self { scratch, path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.scratch.remove(&self.path) {
            log::warn!(
                "Failed to remove scratch file {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "scratch".to_string()
    } else {
        cleaned
    }
}
