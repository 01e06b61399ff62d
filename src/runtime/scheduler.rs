// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The scheduler: owns the ready queue, the task table and every wait registry, drives tasks to
//! their next suspension point, interprets system calls, and folds event-hub polling and sleep
//! checking into the same run loop.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    hub::{
        create_hub,
        EventHub,
        Interest,
    },
    logging,
    task::{
        unit,
        value,
        Frame,
        Resume,
        RunResult,
        Step,
        Task,
        TaskId,
        Value,
    },
    syscall::Syscall,
    SharedObject,
};
use ::std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    ops::{
        Deref,
        DerefMut,
    },
    os::fd::RawFd,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// FIFO ready queue, deduplicated by task id: a task already pending cannot be enqueued twice.
#[derive(Default)]
struct ReadyQueue {
    queue: VecDeque<TaskId>,
    pending: HashSet<TaskId>,
}

/// A sleeping task's wait record.
struct SleepEntry {
    start: Instant,
    duration: Duration,
}

/// Scheduler state. Tasks never see this directly; they reach it only through [Syscall] traps.
pub struct Scheduler {
    /// The ready-to-run queue.
    ready: ReadyQueue,
    /// Task table: every live task, keyed by id. A task being stepped is briefly checked out.
    tasks: HashMap<TaskId, Task>,
    /// Tasks waiting for another task to exit.
    exit_waiting: HashMap<TaskId, Vec<TaskId>>,
    /// Tasks waiting for a descriptor to become readable. At most one waiter per descriptor;
    /// registering a second silently replaces the first.
    read_waiting: HashMap<RawFd, TaskId>,
    /// Tasks waiting for a descriptor to become writable.
    write_waiting: HashMap<RawFd, TaskId>,
    /// Sleeping tasks.
    sleep_waiting: HashMap<TaskId, SleepEntry>,
    /// Tasks waiting on named events.
    event_waiting: HashMap<String, Vec<TaskId>>,
    /// The readiness multiplexer. Its registrations always mirror the combined read/write wait
    /// descriptor set.
    hub: Box<dyn EventHub>,
    /// Source of monotonically increasing task ids.
    next_id: u64,
    /// Number of live non-daemon tasks; the main loop runs while this is positive.
    user_tasks: usize,
    /// Id of the I/O polling daemon, once spawned.
    io_poller: Option<TaskId>,
    /// Whether the sleep-checking daemon is currently alive.
    sleep_checker: bool,
}

/// Clonable handle to one scheduler instance. Background frames hold clones of this handle; there
/// is no global scheduler.
#[derive(Clone)]
pub struct SharedScheduler(SharedObject<Scheduler>);

/// Daemon frame that integrates event-hub polling into the run loop: one poll per turn, blocking
/// only when nothing else can run.
struct IoPollFrame {
    scheduler: SharedScheduler,
}

/// Daemon frame that wakes elapsed sleepers once per turn. Spawned lazily on the first sleeper and
/// exits when none remain.
struct SleepCheckFrame {
    scheduler: SharedScheduler,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ReadyQueue {
    /// Enqueues at the tail, unless the id is already pending.
    fn push(&mut self, id: TaskId) {
        if self.pending.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<TaskId> {
        let id: TaskId = self.queue.pop_front()?;
        self.pending.remove(&id);
        Some(id)
    }

    fn contains(&self, id: TaskId) -> bool {
        self.pending.contains(&id)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Associate Functions for the Scheduler
impl Scheduler {
    fn new(hub: Box<dyn EventHub>) -> Self {
        Self {
            ready: ReadyQueue::default(),
            tasks: HashMap::<TaskId, Task>::new(),
            exit_waiting: HashMap::<TaskId, Vec<TaskId>>::new(),
            read_waiting: HashMap::<RawFd, TaskId>::new(),
            write_waiting: HashMap::<RawFd, TaskId>::new(),
            sleep_waiting: HashMap::<TaskId, SleepEntry>::new(),
            event_waiting: HashMap::<String, Vec<TaskId>>::new(),
            hub,
            next_id: 0,
            user_tasks: 0,
            io_poller: None,
            sleep_checker: false,
        }
    }

    /// Creates a task around `body`, stores it in the task table and enqueues it as ready.
    fn spawn_task(&mut self, name: &str, body: Box<dyn Frame>, daemon: bool) -> TaskId {
        self.next_id += 1;
        let id: TaskId = TaskId(self.next_id);
        trace!("spawn_task(): name={:?}, id={:?}, daemon={:?}", name, id, daemon);
        if !daemon {
            self.user_tasks += 1;
        }
        self.tasks.insert(id, Task::new(id, name, body, daemon));
        self.ready.push(id);
        id
    }

    /// Re-enqueues a blocked task by id, if it is still alive.
    fn schedule(&mut self, id: TaskId) {
        if self.tasks.contains_key(&id) {
            self.ready.push(id);
        } else {
            warn!("schedule(): dropping wakeup for dead task {:?}", id);
        }
    }

    /// Checks a running task back into the table and re-enqueues it at the tail.
    fn reschedule(&mut self, task: Task) {
        let id: TaskId = task.get_id();
        self.tasks.insert(id, task);
        self.ready.push(id);
    }

    /// Checks a running task back into the table without enqueueing it; it resumes only when some
    /// wait registry fires.
    fn park(&mut self, task: Task) {
        self.tasks.insert(task.get_id(), task);
    }

    /// Retires a finished task and wakes everything waiting for its exit.
    fn exit(&mut self, task: Task) {
        trace!("exit(): name={:?}, id={:?}", task.get_name(), task.get_id());
        if !task.is_daemon() {
            self.user_tasks -= 1;
        }
        if self.io_poller == Some(task.get_id()) {
            self.io_poller = None;
        }
        for waiter in self.exit_waiting.remove(&task.get_id()).unwrap_or_default() {
            self.schedule(waiter);
        }
    }

    /// Brings the hub's registration for `fd` back in line with the read/write wait tables. Called
    /// in the same dispatch step as every wait-table mutation.
    fn sync_hub(&mut self, fd: RawFd) -> Result<(), Fail> {
        let mut interest: Interest = Interest::NONE;
        if self.read_waiting.contains_key(&fd) {
            interest |= Interest::READ;
        }
        if self.write_waiting.contains_key(&fd) {
            interest |= Interest::WRITE;
        }
        if interest.is_empty() {
            self.hub.unregister(fd)
        } else {
            self.hub.register(fd, interest)
        }
    }

    /// Force-closes every existing task in `ids`: unwinds its frames, purges every wait-table and
    /// hub entry referencing it, and schedules it so it can retire on its next turn. Returns the
    /// subset actually killed.
    pub fn kill_tasks(&mut self, ids: &[TaskId]) -> Vec<TaskId> {
        let mut killed: Vec<TaskId> = Vec::new();
        for &id in ids {
            match self.tasks.get_mut(&id) {
                Some(task) => task.close(),
                None => continue,
            };
            self.purge_waits(id);
            // The closed task still needs a turn to retire through the normal exit path.
            self.ready.push(id);
            killed.push(id);
        }
        if !killed.is_empty() {
            debug!("kill_tasks(): killed={:?}", killed);
        }
        killed
    }

    /// Removes every wait-table entry referencing `id` and clears the matching hub registrations.
    /// Forced closure must never leave a stale reference behind.
    fn purge_waits(&mut self, id: TaskId) {
        self.sleep_waiting.remove(&id);
        let fds: Vec<RawFd> = self
            .read_waiting
            .iter()
            .filter(|(_, waiter)| **waiter == id)
            .map(|(&fd, _)| fd)
            .chain(
                self.write_waiting
                    .iter()
                    .filter(|(_, waiter)| **waiter == id)
                    .map(|(&fd, _)| fd),
            )
            .collect();
        for fd in fds {
            if self.read_waiting.get(&fd) == Some(&id) {
                self.read_waiting.remove(&fd);
            }
            if self.write_waiting.get(&fd) == Some(&id) {
                self.write_waiting.remove(&fd);
            }
            if let Err(e) = self.sync_hub(fd) {
                warn!("purge_waits(): failed to update hub for fd {:?} ({:?})", fd, e);
            }
        }
        for waiters in self.event_waiting.values_mut() {
            waiters.retain(|waiter| *waiter != id);
        }
        self.event_waiting.retain(|_, waiters| !waiters.is_empty());
    }

    /// Wakes every task currently waiting on `event`, delivering a clone of `value` to each. The
    /// waiter list is consumed whole; events are not latched for later waiters.
    fn fire_event(&mut self, event: &str, fired: Value) {
        let waiters: Vec<TaskId> = match self.event_waiting.remove(event) {
            Some(waiters) => waiters,
            None => return,
        };
        trace!("fire_event(): event={:?}, waiters={:?}", event, waiters);
        for id in waiters {
            match self.tasks.get_mut(&id) {
                Some(task) => task.set_resume(Resume::Value(fired.clone())),
                None => continue,
            }
            self.ready.push(id);
        }
    }

    /// Harvests hub readiness and wakes or kills the matching waiters. One-shot: readiness must be
    /// re-requested after each use.
    fn poll_io(&mut self, timeout: Option<Duration>) {
        if self.read_waiting.is_empty() && self.write_waiting.is_empty() {
            return;
        }
        let eventpairs: Vec<(RawFd, Interest)> = match self.hub.poll(timeout) {
            Ok(eventpairs) => eventpairs,
            Err(e) => {
                error!("poll_io(): hub poll failed ({:?})", e);
                return;
            },
        };
        let mut error_tasks: Vec<TaskId> = Vec::new();
        for (fd, readiness) in eventpairs {
            if readiness.contains(Interest::ERROR) {
                // I/O errors are fatal to the waiting task, not retried.
                if let Some(id) = self.read_waiting.remove(&fd) {
                    error_tasks.push(id);
                }
                if let Some(id) = self.write_waiting.remove(&fd) {
                    error_tasks.push(id);
                }
                debug!("poll_io(): error condition on fd={:?} ({:?})", fd, readiness);
            } else {
                if readiness.contains(Interest::READ) {
                    if let Some(id) = self.read_waiting.remove(&fd) {
                        self.schedule(id);
                    }
                }
                if readiness.contains(Interest::WRITE) {
                    if let Some(id) = self.write_waiting.remove(&fd) {
                        self.schedule(id);
                    }
                }
            }
            if let Err(e) = self.sync_hub(fd) {
                warn!("poll_io(): failed to update hub for fd {:?} ({:?})", fd, e);
            }
        }
        if !error_tasks.is_empty() {
            self.kill_tasks(&error_tasks);
        }
    }

    /// Wakes every sleeper whose requested duration has elapsed. Granularity is one ready-queue
    /// rotation; durations are a lower bound.
    fn check_sleepers(&mut self) {
        let now: Instant = Instant::now();
        let wakeups: Vec<TaskId> = self
            .sleep_waiting
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.start) >= entry.duration)
            .map(|(&id, _)| id)
            .collect();
        for id in wakeups {
            self.sleep_waiting.remove(&id);
            self.schedule(id);
        }
    }

    // Diagnostics. These exist for observability and tests; task bodies have no business calling
    // them.

    pub fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn num_user_tasks(&self) -> usize {
        self.user_tasks
    }

    pub fn is_ready(&self, id: TaskId) -> bool {
        self.ready.contains(id)
    }

    pub fn read_waiter(&self, fd: RawFd) -> Option<TaskId> {
        self.read_waiting.get(&fd).copied()
    }

    pub fn write_waiter(&self, fd: RawFd) -> Option<TaskId> {
        self.write_waiting.get(&fd).copied()
    }

    pub fn num_event_waiters(&self, event: &str) -> usize {
        self.event_waiting.get(event).map_or(0, |waiters| waiters.len())
    }

    pub fn num_sleepers(&self) -> usize {
        self.sleep_waiting.len()
    }
}

/// Associate Functions for the Shared Scheduler Handle
impl SharedScheduler {
    /// Creates a scheduler around the platform's event hub.
    pub fn new() -> Self {
        Self::with_hub(create_hub())
    }

    /// Creates a scheduler around a caller-provided hub.
    pub fn with_hub(hub: Box<dyn EventHub>) -> Self {
        logging::initialize();
        Self(SharedObject::new(Scheduler::new(hub)))
    }

    /// Creates and enqueues a new task; returns its id.
    pub fn spawn(&mut self, name: &str, body: Box<dyn Frame>) -> TaskId {
        self.spawn_task(name, body, false)
    }

    /// Spawns a daemon task: one that does not keep [Self::run] alive.
    fn spawn_daemon(&mut self, name: &str, body: Box<dyn Frame>) -> TaskId {
        self.spawn_task(name, body, true)
    }

    /// Spawns the sleep-checking daemon if no sleeper exists yet.
    fn ensure_sleep_checker(&mut self) {
        if !self.sleep_checker {
            self.sleep_checker = true;
            let frame: SleepCheckFrame = SleepCheckFrame { scheduler: self.clone() };
            self.spawn_daemon("sleep-check", Box::new(frame));
        }
    }

    /// Performs one dispatch step: pops one ready task, trampolines it to its next suspension
    /// point, and interprets the outcome. Returns `false` when the ready queue was empty.
    pub fn dispatch(&mut self) -> bool {
        let id: TaskId = match self.ready.pop() {
            Some(id) => id,
            None => return false,
        };
        // Check the task out of the table for the duration of its step.
        let mut task: Task = match self.tasks.remove(&id) {
            Some(task) => task,
            None => {
                warn!("dispatch(): ready queue referenced dead task {:?}", id);
                return true;
            },
        };
        match task.run() {
            RunResult::Trap(call) => self.handle_syscall(task, call),
            RunResult::Yielded => self.reschedule(task),
            RunResult::Done => self.exit(task),
            RunResult::Faulted(e) => {
                // A fault is fatal to the task alone; the loop carries on.
                warn!(
                    "dispatch(): task faulted: name={:?}, id={:?}, error={:?}",
                    task.get_name(),
                    task.get_id(),
                    e
                );
                self.exit(task);
            },
        }
        true
    }

    /// Runs the dispatch loop until no non-daemon task remains. The I/O polling daemon is
    /// launched on first entry.
    pub fn run(&mut self) {
        if self.io_poller.is_none() {
            let frame: IoPollFrame = IoPollFrame { scheduler: self.clone() };
            let id: TaskId = self.spawn_daemon("io-poll", Box::new(frame));
            self.io_poller = Some(id);
        }
        while self.num_user_tasks() > 0 {
            self.dispatch();
        }
    }

    /// Interprets one system call on behalf of `task`. Synchronous calls re-enqueue the task with
    /// a result; blocking calls park it in the matching wait registry.
    fn handle_syscall(&mut self, mut task: Task, call: Syscall) {
        trace!("handle_syscall(): id={:?}, call={:?}", task.get_id(), call);
        match call {
            Syscall::GetTaskId => {
                task.set_resume(Resume::Value(value(task.get_id())));
                self.reschedule(task);
            },
            Syscall::NewTask { name, body } => {
                let id: TaskId = self.spawn_task(&name, body, false);
                task.set_resume(Resume::Value(value(id)));
                self.reschedule(task);
            },
            Syscall::KillTask(ids) => {
                let killed: Vec<TaskId> = self.kill_tasks(&ids);
                task.set_resume(Resume::Value(value(killed)));
                self.reschedule(task);
            },
            Syscall::WaitTask(id) => {
                if self.tasks.contains_key(&id) {
                    self.exit_waiting.entry(id).or_default().push(task.get_id());
                    task.set_resume(Resume::Value(value(true)));
                    self.park(task);
                } else {
                    // Waiting for a task that does not exist returns immediately.
                    task.set_resume(Resume::Value(value(false)));
                    self.reschedule(task);
                }
            },
            Syscall::Sleep(duration) => {
                task.set_resume(Resume::unit());
                if duration.is_zero() {
                    // Sleep(0) is a plain yield to other runnable tasks.
                    self.reschedule(task);
                } else {
                    self.ensure_sleep_checker();
                    let entry: SleepEntry = SleepEntry {
                        start: Instant::now(),
                        duration,
                    };
                    self.sleep_waiting.insert(task.get_id(), entry);
                    self.park(task);
                }
            },
            Syscall::ReadWait(fd) => {
                self.read_waiting.insert(fd, task.get_id());
                match self.sync_hub(fd) {
                    Ok(()) => {
                        task.set_resume(Resume::unit());
                        self.park(task);
                    },
                    Err(e) => {
                        self.read_waiting.remove(&fd);
                        task.set_resume(Resume::Fault(e));
                        self.reschedule(task);
                    },
                }
            },
            Syscall::WriteWait(fd) => {
                self.write_waiting.insert(fd, task.get_id());
                match self.sync_hub(fd) {
                    Ok(()) => {
                        task.set_resume(Resume::unit());
                        self.park(task);
                    },
                    Err(e) => {
                        self.write_waiting.remove(&fd);
                        task.set_resume(Resume::Fault(e));
                        self.reschedule(task);
                    },
                }
            },
            Syscall::Wait(event) => {
                // The resume value is assigned by whoever fires the event.
                self.event_waiting.entry(event).or_default().push(task.get_id());
                self.park(task);
            },
            Syscall::Fire(event, fired) => {
                self.fire_event(&event, fired);
                task.set_resume(Resume::unit());
                self.reschedule(task);
            },
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for SharedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for SharedScheduler {
    type Target = Scheduler;

    fn deref(&self) -> &Self::Target {
        self.0.deref()
    }
}

impl DerefMut for SharedScheduler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.deref_mut()
    }
}

impl Frame for IoPollFrame {
    fn resume(&mut self, _resume: Resume) -> Step {
        let mut scheduler: SharedScheduler = self.scheduler.clone();
        if scheduler.num_user_tasks() == 0 {
            // The main loop is over; retire so the ready queue can drain.
            return Step::Return(unit());
        }
        // Block only when nothing else can make progress; otherwise poll and move on, so ready
        // tasks and sleepers keep their turn.
        let timeout: Option<Duration> = if scheduler.ready.is_empty() && scheduler.sleep_waiting.is_empty() {
            None
        } else {
            Some(Duration::ZERO)
        };
        scheduler.poll_io(timeout);
        Step::Yield(unit())
    }
}

impl Frame for SleepCheckFrame {
    fn resume(&mut self, _resume: Resume) -> Step {
        let mut scheduler: SharedScheduler = self.scheduler.clone();
        if scheduler.sleep_waiting.is_empty() {
            // No sleepers left; retire until respawned on demand.
            scheduler.sleep_checker = false;
            return Step::Return(unit());
        }
        scheduler.check_sleepers();
        Step::Yield(unit())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::{
        scheduler::SharedScheduler,
        task::{
            downcast,
            unit,
            value,
            Resume,
            Step,
            TaskId,
        },
        syscall::Syscall,
    };
    use ::anyhow::Result;
    use ::std::{
        cell::RefCell,
        rc::Rc,
    };

    /// Body that records its own task id and exits.
    fn record_own_id(seen: Rc<RefCell<Option<TaskId>>>) -> impl FnMut(Resume) -> Step {
        let mut asked: bool = false;
        move |resume: Resume| -> Step {
            if !asked {
                asked = true;
                return Step::Trap(Syscall::GetTaskId);
            }
            let v = match resume.into_result() {
                Ok(v) => v,
                Err(e) => return Step::Fault(e),
            };
            *seen.borrow_mut() = downcast::<TaskId>(&v);
            Step::Return(unit())
        }
    }

    #[test]
    fn get_taskid_returns_own_id() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let seen: Rc<RefCell<Option<TaskId>>> = Rc::new(RefCell::new(None));
        let id: TaskId = scheduler.spawn("get-id", Box::new(record_own_id(seen.clone())));
        scheduler.run();
        crate::ensure_eq!(*seen.borrow(), Some(id));
        crate::ensure_eq!(scheduler.contains_task(id), false);
        Ok(())
    }

    #[test]
    fn ready_queue_deduplicates() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let body = |_resume: Resume| -> Step { Step::Return(unit()) };
        let id: TaskId = scheduler.spawn("noop", Box::new(body));

        // A second enqueue of a pending id is dropped.
        scheduler.schedule(id);
        scheduler.schedule(id);
        crate::ensure_eq!(scheduler.dispatch(), true);
        crate::ensure_eq!(scheduler.dispatch(), false);
        Ok(())
    }

    #[test]
    fn round_robin_fairness() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(vec![]));

        for tag in 0..3u32 {
            let order: Rc<RefCell<Vec<u32>>> = order.clone();
            let body = move |_resume: Resume| -> Step {
                order.borrow_mut().push(tag);
                Step::Yield(unit())
            };
            scheduler.spawn(&format!("spinner-{}", tag), Box::new(body));
        }

        // Nine dispatch steps serve each task three times, in creation order, indefinitely.
        for _ in 0..9 {
            crate::ensure_eq!(scheduler.dispatch(), true);
        }
        crate::ensure_eq!(*order.borrow(), vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
        Ok(())
    }

    #[test]
    fn fire_wakes_all_current_waiters() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let delivered: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(vec![]));

        for i in 0..2 {
            let delivered: Rc<RefCell<Vec<u64>>> = delivered.clone();
            let mut waited: bool = false;
            let body = move |resume: Resume| -> Step {
                if !waited {
                    waited = true;
                    return Step::Trap(Syscall::Wait("rendezvous".to_string()));
                }
                let v = match resume.into_result() {
                    Ok(v) => v,
                    Err(e) => return Step::Fault(e),
                };
                delivered.borrow_mut().push(downcast::<u64>(&v).unwrap());
                Step::Return(unit())
            };
            scheduler.spawn(&format!("waiter-{}", i), Box::new(body));
        }

        let mut fired: bool = false;
        let firer = move |_resume: Resume| -> Step {
            if !fired {
                fired = true;
                return Step::Trap(Syscall::Fire("rendezvous".to_string(), value(7u64)));
            }
            Step::Return(unit())
        };
        scheduler.spawn("firer", Box::new(firer));
        scheduler.run();

        // Both waiters received the same value.
        crate::ensure_eq!(*delivered.borrow(), vec![7, 7]);
        // Events are not latched: no waiter list remains.
        crate::ensure_eq!(scheduler.num_event_waiters("rendezvous"), 0);
        Ok(())
    }

    #[test]
    fn wait_after_fire_sees_nothing() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();

        let mut fired: bool = false;
        let firer = move |_resume: Resume| -> Step {
            if !fired {
                fired = true;
                return Step::Trap(Syscall::Fire("gone".to_string(), value(1u64)));
            }
            Step::Return(unit())
        };
        scheduler.spawn("firer", Box::new(firer));

        // Run the firer to completion before anyone waits.
        while scheduler.num_user_tasks() > 0 {
            scheduler.dispatch();
        }

        let mut waited: bool = false;
        let waiter = move |_resume: Resume| -> Step {
            if !waited {
                waited = true;
                return Step::Trap(Syscall::Wait("gone".to_string()));
            }
            Step::Return(unit())
        };
        let id: TaskId = scheduler.spawn("late-waiter", Box::new(waiter));
        // The late waiter parks; nothing wakes it.
        while scheduler.dispatch() {}
        crate::ensure_eq!(scheduler.contains_task(id), true);
        crate::ensure_eq!(scheduler.num_event_waiters("gone"), 1);
        Ok(())
    }

    #[test]
    fn wait_task_on_dead_id_returns_false() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let outcome: Rc<RefCell<Option<bool>>> = Rc::new(RefCell::new(None));
        let outcome2: Rc<RefCell<Option<bool>>> = outcome.clone();

        let mut asked: bool = false;
        let body = move |resume: Resume| -> Step {
            if !asked {
                asked = true;
                return Step::Trap(Syscall::WaitTask(TaskId(4096)));
            }
            let v = match resume.into_result() {
                Ok(v) => v,
                Err(e) => return Step::Fault(e),
            };
            *outcome2.borrow_mut() = downcast::<bool>(&v);
            Step::Return(unit())
        };
        scheduler.spawn("waiter", Box::new(body));
        scheduler.run();
        crate::ensure_eq!(*outcome.borrow(), Some(false));
        Ok(())
    }

    #[test]
    fn fault_does_not_abort_the_loop() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let survived: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
        let survived2: Rc<RefCell<bool>> = survived.clone();

        let faulty = |_resume: Resume| -> Step {
            Step::Fault(crate::runtime::fail::Fail::new(libc::EIO, "doomed"))
        };
        scheduler.spawn("faulty", Box::new(faulty));

        let mut yielded: bool = false;
        let healthy = move |_resume: Resume| -> Step {
            if !yielded {
                yielded = true;
                return Step::Yield(unit());
            }
            *survived2.borrow_mut() = true;
            Step::Return(unit())
        };
        scheduler.spawn("healthy", Box::new(healthy));

        scheduler.run();
        crate::ensure_eq!(*survived.borrow(), true);
        Ok(())
    }

    #[test]
    fn kill_task_reports_killed_subset() -> Result<()> {
        let mut scheduler: SharedScheduler = SharedScheduler::new();
        let spinner = |_resume: Resume| -> Step { Step::Yield(unit()) };
        let victim: TaskId = scheduler.spawn("victim", Box::new(spinner));

        let killed: Vec<TaskId> = scheduler.kill_tasks(&[victim, TaskId(4096)]);
        crate::ensure_eq!(killed, vec![victim]);

        // The victim retires on its next turn.
        while scheduler.dispatch() {}
        crate::ensure_eq!(scheduler.contains_task(victim), false);
        Ok(())
    }
}
