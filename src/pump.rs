// ── Message pump ──────────────────────────────────────────────────────────────
//
// The one blocking call that keeps the UI thread alive: retrieve the next
// notification, dispatch it, repeat.  Scheduled work and window events are
// all serviced as side effects of dispatch.
//
//   NotStarted ──run()──▶ Running ──quit retrieved──▶ Terminated(code)
//                                  └─retrieval error──▶ Failed
//
// Handlers never stop the loop directly; they post a quit request, and the
// pump terminates only when it retrieves that request.

use crate::error::{Result, ShellError};

/// What one blocking retrieval produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieved<M> {
    Message(M),
    /// The termination notification (`WM_QUIT`) with its exit code.
    Quit(i32),
}

/// A thread's native message queue.
pub trait MessageSource {
    type Message;

    /// Block until the next notification is available.
    fn retrieve(&mut self) -> Result<Retrieved<Self::Message>>;

    /// Hand a notification to its window procedure.
    fn dispatch(&mut self, msg: Self::Message);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    NotStarted,
    Running,
    Terminated(i32),
    /// Retrieval failed; the queue is no longer serviced.
    Failed,
}

pub struct MessagePump<S> {
    source: S,
    state: PumpState,
    dispatched: u64,
}

impl<S: MessageSource> MessagePump<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: PumpState::NotStarted,
            dispatched: 0,
        }
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Notifications dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Run until the quit request is retrieved and return its exit code.
    ///
    /// A retrieval failure ends the loop with that error and leaves the pump
    /// `Failed`.  Running a pump that already terminated or failed is a
    /// programming error.
    pub fn run(&mut self) -> Result<i32> {
        match self.state {
            PumpState::Terminated(code) => {
                return Err(ShellError::SchedulerMisuse(format!(
                    "message pump already terminated with exit code {code}"
                )))
            }
            PumpState::Failed => {
                return Err(ShellError::SchedulerMisuse(
                    "message pump already failed".to_owned(),
                ))
            }
            PumpState::NotStarted | PumpState::Running => {}
        }

        self.state = PumpState::Running;
        tracing::debug!(target: "wm", "message pump running");

        loop {
            match self.source.retrieve() {
                Ok(Retrieved::Message(msg)) => {
                    self.source.dispatch(msg);
                    self.dispatched += 1;
                }
                Ok(Retrieved::Quit(code)) => {
                    self.state = PumpState::Terminated(code);
                    tracing::debug!(
                        target: "wm",
                        exit_code = code,
                        dispatched = self.dispatched,
                        "message pump terminated"
                    );
                    return Ok(code);
                }
                Err(e) => {
                    self.state = PumpState::Failed;
                    tracing::error!(target: "wm", error = %e, "message retrieval failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(windows)]
impl MessagePump<crate::platform::win32::window::Win32MessageSource> {
    /// A pump over the calling thread's Win32 message queue.
    pub fn native() -> Self {
        Self::new(crate::platform::win32::window::Win32MessageSource)
    }
}
