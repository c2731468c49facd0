use crate::error::ExportError;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Unpack `zip_path` into `out_dir` on the blocking pool.
///
/// A directory left over at `out_dir` from an earlier export is removed first.
pub(super) async fn unpack_archive(zip_path: PathBuf, out_dir: PathBuf) -> Result<(), ExportError> {
    let join_path = zip_path.clone();
    tokio::task::spawn_blocking(move || unpack_blocking(&zip_path, &out_dir))
        .await
        .map_err(|e| ExportError::io(join_path, std::io::Error::other(e)))?
}

fn unpack_blocking(zip_path: &Path, out_dir: &Path) -> Result<(), ExportError> {
    if out_dir.exists() {
        tracing::debug!(path = %out_dir.display(), "removing stale export directory");
        std::fs::remove_dir_all(out_dir).map_err(|e| ExportError::io(out_dir, e))?;
    }

    let file = File::open(zip_path).map_err(|e| ExportError::io(zip_path, e))?;
    let unpack_err = |source| ExportError::Unpack {
        path: zip_path.to_path_buf(),
        source,
    };
    let mut archive = zip::ZipArchive::new(file).map_err(unpack_err)?;
    // `extract` refuses entries whose names would escape `out_dir`.
    archive.extract(out_dir).map_err(unpack_err)?;
    tracing::debug!(entries = archive.len(), path = %out_dir.display(), "archive unpacked");
    Ok(())
}

/// The directory holding the DICOM files of an exported study.
///
/// Orthanc archives contain one top-level `<PatientID> <PatientName>` directory. Anything
/// else is refused rather than guessed at. The directory scan runs on the blocking pool.
pub async fn find_dicom_dir(export_dir: &Path) -> Result<PathBuf, ExportError> {
    let dir = export_dir.to_path_buf();
    tokio::task::spawn_blocking(move || dicom_dir_blocking(&dir))
        .await
        .map_err(|e| ExportError::io(export_dir, std::io::Error::other(e)))?
}

fn dicom_dir_blocking(export_dir: &Path) -> Result<PathBuf, ExportError> {
    let entries = std::fs::read_dir(export_dir).map_err(|e| ExportError::io(export_dir, e))?;
    let mut subdirs = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ExportError::io(export_dir, e))?.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }

    match subdirs.len() {
        1 => Ok(subdirs.remove(0)),
        found => Err(ExportError::Layout {
            path: export_dir.to_path_buf(),
            found,
        }),
    }
}
