//! JSON files written through a temp file and an atomic rename.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::warn;

/// Read `path`, treating a missing or blank file as the default value.
pub(crate) fn read_json<T, E>(path: &Path) -> Result<T, E>
where
    T: DeserializeOwned + Default,
    E: From<io::Error> + From<serde_json::Error>,
{
    match fs::read(path) {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(T::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` with the pretty-printed `value`. Readers see either the
/// old file or the new one, never a partial write.
pub(crate) fn write_json<T, E>(path: &Path, value: &T) -> Result<(), E>
where
    T: Serialize + ?Sized,
    E: From<io::Error> + From<serde_json::Error>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| {
        warn!(path = %path.display(), error = %e, "failed to replace json file");
        e.error
    })?;
    Ok(())
}
