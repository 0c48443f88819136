//! The single coarse lock shared by every component that touches the config directory.
//!
//! Admin request handlers, the trigger observer and the keybox maintainer all
//! mutate the same directory. They do so only while holding [`SharedState`],
//! so a manual toggle and a profile application can never interleave, and a
//! reader that takes the lock after a writer released it sees the whole write.
//!
//! The in-process mutex is paired with an exclusive `flock(2)` on
//! [`LOCK_FILE_NAME`]. CLI commands run in a separate process and take the
//! same file lock through [`DirLock`], so they serialize with the daemon too.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::keybox::KeyboxRegistry;
use crate::store::ConfigStore;
use crate::{Error, Result};

/// Lock file inside the config directory.
pub const LOCK_FILE_NAME: &str = ".keyward-lock";

/// How long an async waiter sleeps between `flock` attempts.
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Exclusive lock on a config directory. Released on drop.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
}

fn open_lock_file(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(false);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(crate::store::FILE_MODE);
    }
    options.open(path).map_err(|e| Error::store_io(path, e))
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl DirLock {
    /// Block the calling thread until the lock is held.
    pub fn exclusive(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = open_lock_file(&path)?;
        file.lock_exclusive()
            .map_err(|e| Error::store_io(&path, e))?;
        Ok(Self { _file: file })
    }

    /// `Ok(None)` when another holder has it.
    pub fn try_exclusive(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(ref e) if is_contended(e) => Ok(None),
            Err(e) => Err(Error::store_io(&path, e)),
        }
    }

    /// Wait for the lock without blocking the runtime.
    pub async fn acquire(dir: &Path) -> Result<Self> {
        loop {
            if let Some(lock) = Self::try_exclusive(dir)? {
                return Ok(lock);
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
    }
}

/// Everything guarded by the shared lock.
#[derive(Debug)]
pub struct ControlState {
    pub store: ConfigStore,
    pub keyboxes: KeyboxRegistry,
}

impl ControlState {
    pub fn new(store: ConfigStore, keyboxes: KeyboxRegistry) -> Self {
        Self { store, keyboxes }
    }

    pub fn into_shared(self) -> SharedState {
        SharedState {
            root: self.store.root().to_path_buf(),
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

/// Shared handle to [`ControlState`].
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<ControlState>>,
    root: PathBuf,
}

/// Holds both the mutex and the directory lock.
///
/// Field order matters: the file lock is released before the mutex.
pub struct StateGuard<'a> {
    _dir: DirLock,
    state: MutexGuard<'a, ControlState>,
}

impl SharedState {
    pub async fn lock(&self) -> Result<StateGuard<'_>> {
        let state = self.inner.lock().await;
        let dir = DirLock::acquire(&self.root).await?;
        Ok(StateGuard { _dir: dir, state })
    }

    /// For callers outside the async runtime. Panics if called from within it.
    pub fn blocking_lock(&self) -> Result<StateGuard<'_>> {
        let state = self.inner.blocking_lock();
        let dir = DirLock::exclusive(&self.root)?;
        Ok(StateGuard { _dir: dir, state })
    }
}

impl Deref for StateGuard<'_> {
    type Target = ControlState;

    fn deref(&self) -> &ControlState {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut ControlState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;

    #[test]
    fn test_dir_lock_is_exclusive() {
        let env = TestEnv::new();
        let held = DirLock::exclusive(env.path()).unwrap();
        assert!(env.path().join(LOCK_FILE_NAME).exists());
        assert!(DirLock::try_exclusive(env.path()).unwrap().is_none());

        drop(held);
        assert!(DirLock::try_exclusive(env.path()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_state_guard_holds_dir_lock() {
        let env = TestEnv::new();
        let state = env.shared_state();

        let guard = state.lock().await.unwrap();
        assert!(DirLock::try_exclusive(env.path()).unwrap().is_none());
        drop(guard);
        assert!(DirLock::try_exclusive(env.path()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_async_lock_waits_for_other_holder() {
        let env = TestEnv::new();
        let state = env.shared_state();
        let outside = DirLock::exclusive(env.path()).unwrap();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move {
                let guard = state.lock().await.unwrap();
                guard.store.root().to_path_buf()
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(outside);
        let root = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root, env.path());
    }
}
