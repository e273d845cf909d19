use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::bytecode::NsxModule;
use crate::vm::value::{CubicSegment, Value};

/// Handle of one script thread. Unique for the lifetime of a `Vm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

/// Per-process virtual time. Advances only while the process is unpaused, so
/// every suspension timeout inside a paused process freezes with it.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    elapsed: Duration,
    paused: bool,
}

impl VirtualClock {
    pub fn now(&self) -> Duration {
        self.elapsed
    }

    pub fn advance(&mut self, dt: Duration) {
        if !self.paused {
            self.elapsed += dt;
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

/// One call record: which subroutine of which module, and where in the code
/// section the thread resumes.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub module: Rc<NsxModule>,
    pub subroutine: u16,
    pub pc: usize,
}

/// Why a thread is not currently runnable.
#[derive(Debug, Clone)]
pub struct Suspension {
    /// Process-clock instant the suspension began.
    pub since: Duration,
    /// Wake after this much virtual time; `None` sleeps until resumed
    /// explicitly or by a join.
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ScriptThread {
    pub id: ThreadId,
    pub name: String,
    pub frames: Vec<CallFrame>,
    pub stack: Vec<Value>,
    /// Segments of a bezier literal currently under construction.
    pub bezier: Vec<CubicSegment>,
    /// Set while any choice polled since the last SelectStart was pressed.
    pub select_result: bool,
    pub suspension: Option<Suspension>,
    /// Already ran its slice this tick; cleared when the tick ends.
    pub yielded: bool,
    pub done: bool,
}

impl ScriptThread {
    /// New threads start yielded: they run their first slice on a later
    /// tick, but are reported as created by the tick that spawned them.
    pub fn new(id: ThreadId, name: impl Into<String>, entry: CallFrame) -> Self {
        Self {
            id,
            name: name.into(),
            frames: vec![entry],
            stack: Vec::new(),
            bezier: Vec::new(),
            select_result: false,
            suspension: None,
            yielded: true,
            done: false,
        }
    }

    pub fn is_runnable(&self) -> bool {
        !self.done && !self.yielded && self.suspension.is_none()
    }
}

/// Deferred scheduler mutation. Everything a running slice wants to do to
/// the thread set goes through this queue and is applied between slices,
/// never while a thread borrows the set.
#[derive(Debug)]
pub enum ThreadAction {
    Create(ScriptThread),
    Terminate(ThreadId),
    Suspend {
        id: ThreadId,
        timeout: Option<Duration>,
    },
    Resume(ThreadId),
    /// `waiter` sleeps until `target` terminates.
    Join {
        waiter: ThreadId,
        target: ThreadId,
    },
}

/// Cross-process requests raised by running code; the `Vm` applies them
/// after the tick, since a slice only ever borrows its own process.
#[derive(Debug)]
pub enum ProcessRequest {
    Create { name: String, entry: CallFrame },
    Pause(String),
    Resume(String),
    Terminate(String),
}

/// An isolated group of threads sharing one pausable clock.
#[derive(Debug)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub clock: VirtualClock,
    pub threads: Vec<ScriptThread>,
    pub pending: VecDeque<ThreadAction>,
    /// Active joins as (waiter, target) pairs.
    joins: Vec<(ThreadId, ThreadId)>,
}

/// What one process did during a tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub new: Vec<ThreadId>,
    pub terminated: Vec<ThreadId>,
}

impl Process {
    pub fn new(id: ProcessId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            clock: VirtualClock::default(),
            threads: Vec::new(),
            pending: VecDeque::new(),
            joins: Vec::new(),
        }
    }

    pub fn thread(&self, id: ThreadId) -> Option<&ScriptThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut ScriptThread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    pub fn thread_by_name(&self, name: &str) -> Option<&ScriptThread> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn has_live_threads(&self) -> bool {
        self.threads.iter().any(|t| !t.done)
    }

    /// Wake every suspension whose timeout has elapsed on the process clock.
    /// Returns whether anything woke.
    pub fn resume_timed_out(&mut self) -> bool {
        let now = self.clock.now();
        let mut woke = false;
        for thread in &mut self.threads {
            let expired = matches!(
                &thread.suspension,
                Some(Suspension {
                    since,
                    timeout: Some(timeout),
                }) if now.saturating_sub(*since) >= *timeout
            );
            if expired {
                thread.suspension = None;
                woke = true;
            }
        }
        woke
    }

    /// Apply every queued action. Termination wakes joined waiters in the
    /// same pass, so a join resumes within the tick its target ends.
    pub fn drain_actions(&mut self, outcome: &mut TickOutcome) -> bool {
        let mut progressed = false;
        while let Some(action) = self.pending.pop_front() {
            progressed = true;
            match action {
                ThreadAction::Create(thread) => {
                    outcome.new.push(thread.id);
                    self.threads.push(thread);
                }
                ThreadAction::Terminate(id) => self.terminate(id, outcome),
                ThreadAction::Suspend { id, timeout } => {
                    let since = self.clock.now();
                    if let Some(thread) = self.thread_mut(id) {
                        thread.suspension = Some(Suspension { since, timeout });
                    }
                }
                ThreadAction::Resume(id) => {
                    if let Some(thread) = self.thread_mut(id) {
                        thread.suspension = None;
                    }
                }
                ThreadAction::Join { waiter, target } => {
                    // Joining an already-dead thread must not sleep forever.
                    if self.thread(target).is_none_or(|t| t.done) {
                        if let Some(thread) = self.thread_mut(waiter) {
                            thread.suspension = None;
                        }
                    } else {
                        self.joins.push((waiter, target));
                    }
                }
            }
        }
        progressed
    }

    pub(crate) fn terminate(&mut self, id: ThreadId, outcome: &mut TickOutcome) {
        if let Some(thread) = self.thread_mut(id) {
            thread.done = true;
            if !outcome.terminated.contains(&id) {
                outcome.terminated.push(id);
            }
        }
        let mut kept = Vec::with_capacity(self.joins.len());
        for (waiter, target) in self.joins.drain(..) {
            if target == id {
                if let Some(thread) = self.threads.iter_mut().find(|t| t.id == waiter) {
                    thread.suspension = None;
                }
            } else {
                kept.push((waiter, target));
            }
        }
        self.joins = kept;
    }

    /// End-of-tick bookkeeping: clear yield flags and drop dead threads.
    pub fn finish_tick(&mut self) {
        for thread in &mut self.threads {
            thread.yielded = false;
        }
        self.threads.retain(|t| !t.done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> CallFrame {
        CallFrame {
            module: Rc::new(NsxModule {
                name: "test".into(),
                mtime: 0,
                subroutines: Vec::new(),
                imports: Vec::new(),
                strings: Vec::new(),
                code: Vec::new(),
            }),
            subroutine: 0,
            pc: 0,
        }
    }

    #[test]
    fn paused_clock_freezes_timeouts() {
        let mut process = Process::new(ProcessId(0), "main");
        let mut thread = ScriptThread::new(ThreadId(1), "t", frame());
        thread.suspension = Some(Suspension {
            since: Duration::ZERO,
            timeout: Some(Duration::from_millis(100)),
        });
        process.threads.push(thread);

        process.clock.pause();
        process.clock.advance(Duration::from_millis(500));
        assert!(!process.resume_timed_out());

        process.clock.resume();
        process.clock.advance(Duration::from_millis(100));
        assert!(process.resume_timed_out());
        assert!(process.thread(ThreadId(1)).unwrap().suspension.is_none());
    }

    #[test]
    fn terminate_wakes_joined_waiter_in_same_pass() {
        let mut process = Process::new(ProcessId(0), "main");
        let mut waiter = ScriptThread::new(ThreadId(1), "waiter", frame());
        waiter.suspension = Some(Suspension {
            since: Duration::ZERO,
            timeout: None,
        });
        process.threads.push(waiter);
        process.threads.push(ScriptThread::new(ThreadId(2), "scene", frame()));

        process.pending.push_back(ThreadAction::Join {
            waiter: ThreadId(1),
            target: ThreadId(2),
        });
        process.pending.push_back(ThreadAction::Terminate(ThreadId(2)));

        let mut outcome = TickOutcome::default();
        process.drain_actions(&mut outcome);
        assert_eq!(outcome.terminated, vec![ThreadId(2)]);
        assert!(process.thread(ThreadId(1)).unwrap().suspension.is_none());
    }

    #[test]
    fn join_on_dead_thread_resumes_immediately() {
        let mut process = Process::new(ProcessId(0), "main");
        let mut waiter = ScriptThread::new(ThreadId(1), "waiter", frame());
        waiter.suspension = Some(Suspension {
            since: Duration::ZERO,
            timeout: None,
        });
        process.threads.push(waiter);

        process.pending.push_back(ThreadAction::Join {
            waiter: ThreadId(1),
            target: ThreadId(99),
        });
        let mut outcome = TickOutcome::default();
        process.drain_actions(&mut outcome);
        assert!(process.thread(ThreadId(1)).unwrap().suspension.is_none());
    }

    #[test]
    fn new_threads_start_yielded() {
        let thread = ScriptThread::new(ThreadId(3), "spawned", frame());
        assert!(thread.yielded);
        assert!(!thread.is_runnable());
    }
}
