use crate::TransferError;

/// Validates a folder supplied by a client.
///
/// Folders are relative to the base path; leading or trailing separators
/// are tolerated (they are normalized away later). Rejects:
/// - Parent directory traversal (`..`)
/// - Drive prefixes (`C:`)
/// - NUL bytes
pub fn validate_folder(folder: &str) -> Result<(), TransferError> {
    if folder.contains('\0') {
        return Err(TransferError::InvalidPath(format!(
            "NUL byte not allowed: {folder:?}"
        )));
    }

    for segment in folder.split(['/', '\\']) {
        if segment == ".." {
            return Err(TransferError::InvalidPath(format!(
                "parent directory traversal not allowed: {folder}"
            )));
        }
        if segment.len() >= 2 && segment.as_bytes()[1] == b':' {
            return Err(TransferError::InvalidPath(format!(
                "drive prefix not allowed: {folder}"
            )));
        }
    }

    Ok(())
}

/// Validates a file name supplied by a client.
///
/// A file name is a single path segment: it must be non-empty, must not
/// be `.` or `..`, and must not contain a separator or NUL byte.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidName("empty file name".into()));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidName(format!(
            "reserved file name: {name}"
        )));
    }

    if name.contains(['/', '\\']) {
        return Err(TransferError::InvalidName(format!(
            "separator not allowed: {name}"
        )));
    }

    if name.contains('\0') {
        return Err(TransferError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    Ok(())
}
