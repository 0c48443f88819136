//! Config directory observer.
//!
//! Watches the config directory for trigger files and dispatches them. File
//! system events are debounced; a slow poll runs alongside so a dropped event
//! is still noticed within one poll interval.

mod queue;

pub use queue::{MAX_TRIGGER_BYTES, TriggerKind, TriggerQueue};

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::profile::apply_profile;
use crate::state::SharedState;

/// Debounce duration - wait this long after last event before draining
const DEBOUNCE_MS: u64 = 100;

/// Drain pending triggers while holding the shared lock.
///
/// `scan` is the keybox maintainer's wake handle.
pub async fn drain_triggers(state: &SharedState, queue: &TriggerQueue, scan: &Notify) -> usize {
    let guard = match state.lock().await {
        Ok(guard) => guard,
        Err(e) => {
            tracing::error!(error = %e, "could not take the state lock, triggers left pending");
            return 0;
        }
    };
    queue.drain(|kind, content| match kind {
        TriggerKind::ApplyProfile => apply_profile(&guard.store, content).map(|_| ()),
        TriggerKind::ScanKeyboxes => {
            scan.notify_one();
            Ok(())
        }
    })
}

fn is_trigger_event(event: &Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    ) && event.paths.iter().any(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .and_then(TriggerKind::from_file_name)
            .is_some()
    })
}

fn start_watcher(
    root: &std::path::Path,
    tx: mpsc::Sender<Event>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        },
        Config::default(),
    )?;
    watcher.watch(root, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Run the observer until the task is cancelled.
///
/// Drains once immediately so triggers left while the daemon was down are
/// consumed. If the watcher cannot be set up the observer keeps polling.
pub async fn watch_triggers(
    state: SharedState,
    root: PathBuf,
    poll_interval: Duration,
    scan: Arc<Notify>,
) {
    let queue = TriggerQueue::new(&root);
    let initial = drain_triggers(&state, &queue, &scan).await;
    if initial > 0 {
        tracing::info!(count = initial, "consumed triggers left from a previous run");
    }

    let (tx, mut rx) = mpsc::channel(100);
    let _watcher = match start_watcher(&root, tx) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "file watcher unavailable, polling only");
            None
        }
    };

    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    poll.tick().await;

    let mut pending_update = false;
    let mut last_event_time = Instant::now();
    let mut events_open = true;

    loop {
        let timeout = if pending_update {
            let debounce = Duration::from_millis(DEBOUNCE_MS);
            debounce.saturating_sub(last_event_time.elapsed())
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            event = rx.recv(), if events_open => {
                match event {
                    Some(event) if is_trigger_event(&event) => {
                        pending_update = true;
                        last_event_time = Instant::now();
                    }
                    Some(_) => {}
                    None => events_open = false,
                }
            }
            _ = tokio::time::sleep(timeout), if pending_update => {
                pending_update = false;
                drain_triggers(&state, &queue, &scan).await;
            }
            _ = poll.tick() => {
                drain_triggers(&state, &queue, &scan).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Setting;
    use crate::test_utils::TestEnv;

    #[tokio::test]
    async fn test_apply_profile_trigger_is_applied_and_consumed() {
        let env = TestEnv::new();
        let state = env.shared_state();
        let queue = TriggerQueue::new(env.path());
        let scan = Notify::new();

        queue.enqueue(TriggerKind::ApplyProfile, "maximal\n").unwrap();
        assert_eq!(drain_triggers(&state, &queue, &scan).await, 1);

        let guard = state.lock().await.unwrap();
        for setting in Setting::MANAGED {
            assert!(guard.store.is_enabled(setting).unwrap(), "{}", setting);
        }
        assert!(!env.path().join("apply_profile").exists());
    }

    #[tokio::test]
    async fn test_unknown_profile_trigger_is_consumed_without_changes() {
        let env = TestEnv::new();
        let state = env.shared_state();
        let queue = TriggerQueue::new(env.path());
        let scan = Notify::new();
        let before = state.lock().await.unwrap().store.snapshot().unwrap();

        queue.enqueue(TriggerKind::ApplyProfile, "turbo").unwrap();
        drain_triggers(&state, &queue, &scan).await;

        assert_eq!(state.lock().await.unwrap().store.snapshot().unwrap(), before);
        assert!(queue.pending().is_empty());
    }

    #[tokio::test]
    async fn test_scan_trigger_wakes_maintainer() {
        let env = TestEnv::new();
        let state = env.shared_state();
        let queue = TriggerQueue::new(env.path());
        let scan = Notify::new();

        queue.enqueue(TriggerKind::ScanKeyboxes, "").unwrap();
        drain_triggers(&state, &queue, &scan).await;

        // notify_one stores a permit when nobody is waiting yet.
        tokio::time::timeout(Duration::from_secs(1), scan.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_watch_loop_picks_up_new_trigger() {
        let env = TestEnv::new();
        let state = env.shared_state();
        let scan = Arc::new(Notify::new());
        let handle = tokio::spawn(watch_triggers(
            state.clone(),
            env.path().to_path_buf(),
            Duration::from_millis(200),
            scan,
        ));

        TriggerQueue::new(env.path())
            .enqueue(TriggerKind::ApplyProfile, "dailyuse")
            .unwrap();

        let trigger = env.path().join("apply_profile");
        for _ in 0..50 {
            if !trigger.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        handle.abort();

        assert!(!trigger.exists());
        let guard = state.lock().await.unwrap();
        assert!(guard.store.is_enabled(Setting::RkpBypass).unwrap());
        assert!(guard.store.is_enabled(Setting::HideSensitiveProps).unwrap());
        assert!(!guard.store.is_enabled(Setting::GlobalMode).unwrap());
    }

    #[tokio::test]
    async fn test_leftover_trigger_is_drained_at_startup() {
        let env = TestEnv::new();
        let state = env.shared_state();
        TriggerQueue::new(env.path())
            .enqueue(TriggerKind::ApplyProfile, "maximal")
            .unwrap();

        let handle = tokio::spawn(watch_triggers(
            state.clone(),
            env.path().to_path_buf(),
            Duration::from_secs(3600),
            Arc::new(Notify::new()),
        ));
        let trigger = env.path().join("apply_profile");
        for _ in 0..50 {
            if !trigger.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.abort();
        assert!(!trigger.exists());
    }
}
