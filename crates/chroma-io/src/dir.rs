use std::path::{Path, PathBuf};

use crate::{error::IoError, jpeg::has_jpeg_extension};

/// List the JPEG files directly inside a directory.
///
/// Sub-directories are not visited. A file is listed when its extension is `jpg` or `jpeg`,
/// in any case.
///
/// # Arguments
///
/// - `dir` - The directory to list.
///
/// # Returns
///
/// The paths of the JPEG files, sorted by file name.
pub fn list_jpeg_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, IoError> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(IoError::FileDoesNotExist(dir.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() && has_jpeg_extension(entry.path()) {
            paths.push(entry.into_path());
        }
    }

    log::debug!("found {} jpeg files in {}", paths.len(), dir.display());

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn list_sorted_jpeg_files() -> Result<(), IoError> {
        let tmp_dir = tempfile::tempdir()?;
        for name in ["c.jpg", "a.JPEG", "b.jpeg", "notes.txt", "d.png", "noext"] {
            fs::write(tmp_dir.path().join(name), b"")?;
        }
        fs::create_dir(tmp_dir.path().join("nested.jpg"))?;
        fs::create_dir(tmp_dir.path().join("sub"))?;
        fs::write(tmp_dir.path().join("sub").join("e.jpg"), b"")?;

        let files = list_jpeg_files(tmp_dir.path())?;
        let names = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.JPEG", "b.jpeg", "c.jpg"]);
        Ok(())
    }

    #[test]
    fn list_missing_directory() {
        let result = list_jpeg_files("/definitely/not/a/real/directory");
        assert!(matches!(result, Err(IoError::FileDoesNotExist(_))));
    }
}
