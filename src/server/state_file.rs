//! `web_port` file: how local tools find the running admin server.
//!
//! The file lives in the config directory and holds the bound port and the
//! auth token in a single line:
//! ```text
//! 38211|6f1c3a4e-...
//! ```
//! It is written with owner-only permissions and removed on clean shutdown.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::store::write_atomic;

/// File name of the server state file.
pub const STATE_FILE_NAME: &str = "web_port";

/// Connection details of a running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub port: u16,
    pub token: String,
}

impl ServerInfo {
    /// UI link that bootstraps the session with the token.
    pub fn ui_url(&self) -> String {
        format!("http://127.0.0.1:{}/?token={}", self.port, self.token)
    }
}

#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the state file atomically, mode 0600.
    pub fn write(&self, info: &ServerInfo) -> io::Result<()> {
        write_atomic(
            &self.path,
            format!("{}|{}", info.port, info.token).as_bytes(),
        )
    }

    /// Read the state file.
    ///
    /// # Returns
    /// * `Ok(Some(info))` if the file exists and was parsed successfully
    /// * `Ok(None)` if the file doesn't exist
    /// * `Err(e)` if there was an IO error or parse error
    pub fn read(&self) -> io::Result<Option<ServerInfo>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Self::parse_contents(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the state file. A missing file is not an error.
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn parse_contents(contents: &str) -> io::Result<ServerInfo> {
        let invalid = |msg: &str| io::Error::new(io::ErrorKind::InvalidData, msg.to_string());

        let (port, token) = contents
            .trim()
            .split_once('|')
            .ok_or_else(|| invalid("Missing '|' separator"))?;
        let port = port.parse().map_err(|_| invalid("Invalid port value"))?;
        if token.is_empty() {
            return Err(invalid("Missing token"));
        }

        Ok(ServerInfo {
            port,
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StateFile) {
        let temp_dir = TempDir::new().unwrap();
        let state_file = StateFile::new(temp_dir.path());
        (temp_dir, state_file)
    }

    fn info() -> ServerInfo {
        ServerInfo {
            port: 38211,
            token: "6f1c3a4e-0000-4000-8000-000000000000".to_string(),
        }
    }

    #[test]
    fn test_path_is_web_port() {
        let (_temp_dir, state_file) = setup();
        assert!(state_file.path().ends_with("web_port"));
    }

    #[test]
    fn test_write_and_read() {
        let (_temp_dir, state_file) = setup();
        state_file.write(&info()).unwrap();
        assert_eq!(state_file.read().unwrap(), Some(info()));
        assert_eq!(
            fs::read_to_string(state_file.path()).unwrap(),
            "38211|6f1c3a4e-0000-4000-8000-000000000000"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_write_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let (_temp_dir, state_file) = setup();
        state_file.write(&info()).unwrap();
        let mode = fs::metadata(state_file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_read_nonexistent_returns_none() {
        let (_temp_dir, state_file) = setup();
        assert_eq!(state_file.read().unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let (_temp_dir, state_file) = setup();
        state_file.write(&info()).unwrap();
        assert!(state_file.exists());
        state_file.delete().unwrap();
        assert!(!state_file.exists());
        // Deleting again is fine
        state_file.delete().unwrap();
    }

    #[test]
    fn test_parse_contents() {
        assert_eq!(
            StateFile::parse_contents("8080|abc\n").unwrap(),
            ServerInfo {
                port: 8080,
                token: "abc".to_string()
            }
        );
        assert!(StateFile::parse_contents("8080").is_err());
        assert!(StateFile::parse_contents("http|abc").is_err());
        assert!(StateFile::parse_contents("8080|").is_err());
    }

    #[test]
    fn test_ui_url_carries_token() {
        assert_eq!(
            info().ui_url(),
            "http://127.0.0.1:38211/?token=6f1c3a4e-0000-4000-8000-000000000000"
        );
    }
}
