//! Utilities for persistence and statistics.
use anyhow::Result;
use std::{
    ffi::OsString,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Returns `path` with `.tmp` appended to its file name.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Writes `bytes` to `path` through a temporary file and a rename.
///
/// Readers of `path` observe either the previous content or the new content.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Fills a temporary directory with `f`, then moves it to `dir`.
///
/// An existing `dir` is replaced only after `f` succeeded.
pub fn replace_dir<F>(dir: &Path, f: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let tmp = tmp_path(dir);
    if tmp.exists() {
        fs::remove_dir_all(&tmp)?;
    }
    fs::create_dir_all(&tmp)?;
    f(&tmp)?;
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::rename(&tmp, dir)?;
    Ok(())
}

/// Mean and population standard deviation.
///
/// Returns `(NaN, NaN)` for an empty slice.
pub fn mean_std(xs: &[f64]) -> (f64, f64) {
    if xs.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_atomic_write_replaces_content() -> Result<()> {
        let dir = TempDir::new("atomic_write")?;
        let path = dir.path().join("nested").join("file.bin");
        atomic_write(&path, b"first")?;
        atomic_write(&path, b"second")?;
        assert_eq!(fs::read(&path)?, b"second");
        assert!(!tmp_path(&path).exists());
        Ok(())
    }

    #[test]
    fn test_replace_dir_keeps_old_on_failure() -> Result<()> {
        let root = TempDir::new("replace_dir")?;
        let dir = root.path().join("buffer");
        replace_dir(&dir, |tmp| atomic_write(&tmp.join("a"), b"1"))?;
        let res = replace_dir(&dir, |_| Err(anyhow::anyhow!("write failed")));
        assert!(res.is_err());
        assert_eq!(fs::read(dir.join("a"))?, b"1");
        Ok(())
    }

    #[test]
    fn test_mean_std() {
        let (m, s) = mean_std(&[1.0, 3.0]);
        assert_eq!(m, 2.0);
        assert_eq!(s, 1.0);
        assert!(mean_std(&[]).0.is_nan());
    }
}
