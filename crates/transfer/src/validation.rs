use std::path::{Component, Path};

use crate::TransferError;

/// Validates an entry key before it is handed to a destination writer.
///
/// Entry keys are relative, `/`-separated paths. Rejects:
/// - Empty paths
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_entry_path(entry_path: &str) -> Result<(), TransferError> {
    if entry_path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(entry_path);

    if path.is_absolute() || entry_path.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {entry_path}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {entry_path}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidPath(format!(
                    "path prefix not allowed: {entry_path}"
                )));
            }
            Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {entry_path}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
