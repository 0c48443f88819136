//! Common test utilities for keyward integration tests.
//!
//! Provides `TestEnv` for isolated config directories that never touch
//! `/data/adb/keyward`.

#![allow(dead_code)]

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with its own config directory.
///
/// The `keyward()` method returns a `Command` pointed at that directory via
/// `KEYWARD_DIR`, so tests can run in parallel.
pub struct TestEnv {
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Get a Command for the keyward binary bound to this environment.
    pub fn keyward(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_keyward"));
        cmd.env("KEYWARD_DIR", self.config_dir.path());
        cmd.env_remove("KEYWARD_PORT");
        cmd
    }

    pub fn path(&self) -> &std::path::Path {
        self.config_dir.path()
    }

    /// Drop a keybox file into the active directory.
    pub fn add_keybox(&self, name: &str) {
        let dir = self.path().join("keyboxes");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(name),
            format!("<AndroidAttestation><!-- {} --></AndroidAttestation>", name),
        )
        .unwrap();
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
