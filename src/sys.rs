//! Process privilege and ownership checks

use std::path::Path;

/// Whether the process runs with root privileges.
///
/// The hook layer reads the config directory as root, and the daemon has to
/// be able to write where it reads.
#[cfg(unix)]
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

/// Check that `dir` is owned by this process and closed to group and others.
///
/// Returns a description of the first problem found.
#[cfg(unix)]
pub fn check_private_dir(dir: &Path) -> Result<(), String> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(dir).map_err(|e| format!("{}: {}", dir.display(), e))?;
    if !meta.is_dir() {
        return Err(format!("{} is not a directory", dir.display()));
    }
    let euid = nix::unistd::geteuid().as_raw();
    if meta.uid() != euid {
        return Err(format!(
            "{} is owned by uid {}, not {}",
            dir.display(),
            meta.uid(),
            euid
        ));
    }
    if meta.mode() & 0o077 != 0 {
        return Err(format!(
            "{} has mode {:o}; group and others should have no access",
            dir.display(),
            meta.mode() & 0o777
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn check_private_dir(dir: &Path) -> Result<(), String> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(format!("{} is not a directory", dir.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    #[cfg(unix)]
    fn test_is_root_matches_euid() {
        assert_eq!(is_root(), nix::unistd::geteuid().as_raw() == 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_check_private_dir() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700)).unwrap();
        assert!(check_private_dir(dir.path()).is_ok());

        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        let err = check_private_dir(dir.path()).unwrap_err();
        assert!(err.contains("755"));
    }

    #[test]
    fn test_check_private_dir_missing() {
        let dir = TempDir::new().unwrap();
        assert!(check_private_dir(&dir.path().join("missing")).is_err());
    }
}
