use std::fs::{File, Permissions};
use std::io;
use std::path::Path;

use memmap2::Mmap;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// File bytes, memory-mapped when large.
pub enum FileContent {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl AsRef<[u8]> for FileContent {
    fn as_ref(&self) -> &[u8] {
        match self {
            FileContent::Mapped(mmap) => mmap,
            FileContent::Buffered(bytes) => bytes.as_slice(),
        }
    }
}

impl FileContent {
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            FileContent::Mapped(mmap) => mmap.to_vec(),
            FileContent::Buffered(bytes) => bytes,
        }
    }
}

pub fn read_file_smart<P: AsRef<Path>>(path: P) -> io::Result<FileContent> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)?;

    if metadata.len() > MMAP_THRESHOLD {
        let file = File::open(path)?;

        // Safety: read-only mapping; trees are owned by one invocation
        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(FileContent::Mapped(mmap))
    } else {
        Ok(FileContent::Buffered(std::fs::read(path)?))
    }
}

/// Heuristic used by git: a NUL byte or invalid UTF-8 means binary.
pub fn is_binary(bytes: &[u8]) -> bool {
    memchr::memchr(0, bytes).is_some() || std::str::from_utf8(bytes).is_err()
}

/// Text view of optional file content: `Some(None)` for an absent file,
/// `None` when the content is binary.
pub fn text_view(bytes: Option<&[u8]>) -> Option<Option<&str>> {
    match bytes {
        None => Some(None),
        Some(b) if is_binary(b) => None,
        Some(b) => std::str::from_utf8(b).ok().map(Some),
    }
}

/// Write `bytes` to `path`, creating parent directories.
/// Goes through a sibling temp file so readers never see a torn write.
/// An existing file keeps its permissions; new files get the usual `0644`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    io::Write::write_all(&mut tmp, bytes)?;

    let perms = match std::fs::metadata(path) {
        Ok(meta) => Some(meta.permissions()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => default_permissions(),
        Err(e) => return Err(e),
    };
    if let Some(perms) = perms {
        tmp.as_file().set_permissions(perms)?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<Permissions> {
    None
}
