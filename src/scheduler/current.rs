// ── Active scheduler per UI thread ───────────────────────────────────────────
//
// A process-wide registry maps each UI thread to the scheduler whose loop it
// runs.  `install` adds the entry and hands back an `Installed` guard; the
// entry is removed (and the scheduler shut down) when that guard drops, which
// the owning window does on teardown.  A thread has at most one entry:
// installing a second scheduler is a programming error and fails fast.

use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use super::Scheduler;
use crate::error::{Result, ShellError};

static REGISTRY: LazyLock<Mutex<HashMap<ThreadId, Scheduler>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<ThreadId, Scheduler>> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that a scheduler is the active one for its thread.
///
/// Dropping it unregisters the scheduler and shuts it down.
#[derive(Debug)]
#[must_use = "the scheduler is uninstalled as soon as this guard is dropped"]
pub struct Installed {
    scheduler: Scheduler,
}

impl Installed {
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Drop for Installed {
    fn drop(&mut self) {
        let mut reg = registry();
        let owner = self.scheduler.owner();
        if reg.get(&owner).is_some_and(|s| s.same_as(&self.scheduler)) {
            reg.remove(&owner);
        }
        drop(reg);
        self.scheduler.shutdown();
        tracing::debug!(target: "wm", ?owner, "scheduler uninstalled");
    }
}

/// Make `scheduler` the active scheduler of the calling thread.
///
/// Must be called on the scheduler's owning thread, and only once per
/// thread until the returned guard is dropped.
pub fn install(scheduler: Scheduler) -> Result<Installed> {
    let here = thread::current().id();
    if scheduler.owner() != here {
        return Err(ShellError::SchedulerMisuse(format!(
            "scheduler owned by {:?} cannot be installed on {here:?}",
            scheduler.owner()
        )));
    }

    let mut reg = registry();
    if reg.contains_key(&here) {
        return Err(ShellError::SchedulerMisuse(format!(
            "a scheduler is already installed on {here:?}"
        )));
    }
    reg.insert(here, scheduler.clone());
    drop(reg);

    tracing::debug!(target: "wm", owner = ?here, "scheduler installed");
    Ok(Installed { scheduler })
}

/// The scheduler installed on the calling thread, if any.
pub fn current() -> Option<Scheduler> {
    for_thread(thread::current().id())
}

/// The scheduler installed on `thread`, if any.
pub fn for_thread(thread: ThreadId) -> Option<Scheduler> {
    registry().get(&thread).cloned()
}
