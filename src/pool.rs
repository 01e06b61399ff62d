// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A bounded pool of expensively-created resources (database connections, typically), shared among
//! tasks. Resources are created lazily by a caller-supplied factory up to a hard cap; when the cap
//! is reached, acquirers park on a per-waiter event and a release hands its resource directly to
//! the waiter at the head of the line.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    task::{
        unit,
        Frame,
        Resume,
        Step,
        Value,
    },
    syscall::Syscall,
    SharedObject,
};
use ::std::collections::VecDeque;

//======================================================================================================================
// Structures
//======================================================================================================================

struct PoolInner {
    /// Pool name, used for diagnostics and to namespace waiter events.
    name: String,
    /// Hard cap on live resources.
    maxsize: usize,
    /// Number of resources pre-created by [InitFrame].
    minsize: usize,
    /// Creates one resource; the frame's final value is the resource.
    factory: Box<dyn FnMut() -> Box<dyn Frame>>,
    /// Idle resources. Most-recently released first, so a busy pool keeps reusing warm resources.
    free: VecDeque<Value>,
    /// Number of live resources, counting those checked out and those mid-creation.
    connected: usize,
    /// Event names of parked acquirers, in arrival order. Each name is unique to one waiter, so a
    /// release wakes exactly one task even though event firing is broadcast.
    waiters: VecDeque<String>,
    /// Source of unique waiter event names.
    next_waiter: u64,
    /// Number of resources dropped because they were released into a full pool.
    discarded: usize,
}

/// A shared handle to one pool. Resources travel as [Value]s; callers downcast to their concrete
/// resource type on acquisition.
#[derive(Clone)]
pub struct Pool(SharedObject<PoolInner>);

enum AcquireState {
    Idle,
    Creating,
    Waiting,
}

/// Pre-creates the pool's minimum population, one resource at a time. Resolves to unit.
pub struct InitFrame {
    pool: Pool,
    remaining: usize,
    creating: bool,
}

/// Checks one resource out of the pool, creating or waiting as capacity dictates. Resolves to the
/// resource.
pub struct AcquireFrame {
    pool: Pool,
    state: AcquireState,
}

/// Returns a resource to the pool, handing it straight to the longest-parked acquirer if one
/// exists. Resolves to unit.
pub struct ReleaseFrame {
    pool: Pool,
    resource: Option<Value>,
    fired: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Pool {
    /// Creates a pool that keeps at least `minsize` and at most `maxsize` resources. A `minsize`
    /// above `maxsize` is clamped down to it.
    pub fn new(name: &str, minsize: usize, maxsize: usize, factory: Box<dyn FnMut() -> Box<dyn Frame>>) -> Self {
        let minsize: usize = minsize.min(maxsize);
        Self(SharedObject::new(PoolInner {
            name: name.to_string(),
            maxsize,
            minsize,
            factory,
            free: VecDeque::<Value>::new(),
            connected: 0,
            waiters: VecDeque::<String>::new(),
            next_waiter: 0,
            discarded: 0,
        }))
    }

    /// Pre-creates the minimum population. Optional; an uninitialized pool fills on demand.
    pub fn init(&self) -> InitFrame {
        InitFrame {
            pool: self.clone(),
            remaining: self.0.minsize,
            creating: false,
        }
    }

    /// Checks a resource out, suspending when the pool is at capacity with nothing free.
    pub fn acquire(&self) -> AcquireFrame {
        AcquireFrame {
            pool: self.clone(),
            state: AcquireState::Idle,
        }
    }

    /// Checks a resource back in.
    pub fn release(&self, resource: Value) -> ReleaseFrame {
        ReleaseFrame {
            pool: self.clone(),
            resource: Some(resource),
            fired: false,
        }
    }

    /// Mints a waiter event name unique to this pool instance and waiter.
    fn next_waiter_event(&mut self) -> String {
        let inner: &mut PoolInner = &mut self.0;
        inner.next_waiter += 1;
        let ptr: *const PoolInner = inner as *const PoolInner;
        format!("pool-{}-{:p}-{}", inner.name, ptr, inner.next_waiter)
    }

    // Diagnostics.

    pub fn connected_count(&self) -> usize {
        self.0.connected
    }

    pub fn free_count(&self) -> usize {
        self.0.free.len()
    }

    pub fn waiter_count(&self) -> usize {
        self.0.waiters.len()
    }

    pub fn discarded_count(&self) -> usize {
        self.0.discarded
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Frame for InitFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        let mut pool: Pool = self.pool.clone();
        if self.creating {
            self.creating = false;
            match resume.into_result() {
                Ok(resource) => {
                    pool.0.free.push_back(resource);
                    self.remaining -= 1;
                },
                Err(e) => {
                    // The slot reserved for this resource is handed back.
                    pool.0.connected -= 1;
                    return Step::Fault(e);
                },
            }
        }
        if self.remaining > 0 && pool.0.connected < pool.0.maxsize {
            pool.0.connected += 1;
            self.creating = true;
            let body: Box<dyn Frame> = (pool.0.factory)();
            return Step::Call(body);
        }
        debug!("init(): pool={:?}, free={:?}", pool.0.name, pool.0.free.len());
        Step::Return(unit())
    }
}

impl Frame for AcquireFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        let mut pool: Pool = self.pool.clone();
        match self.state {
            AcquireState::Idle => {
                if let Some(resource) = pool.0.free.pop_front() {
                    return Step::Return(resource);
                }
                if pool.0.connected < pool.0.maxsize {
                    // Reserve the slot before creating, so concurrent acquirers cannot overshoot
                    // the cap while the factory is suspended.
                    pool.0.connected += 1;
                    self.state = AcquireState::Creating;
                    let body: Box<dyn Frame> = (pool.0.factory)();
                    return Step::Call(body);
                }
                let event: String = pool.next_waiter_event();
                pool.0.waiters.push_back(event.clone());
                self.state = AcquireState::Waiting;
                trace!("acquire(): pool={:?} at capacity, parking on {:?}", pool.0.name, event);
                Step::Trap(Syscall::Wait(event))
            },
            AcquireState::Creating => match resume.into_result() {
                Ok(resource) => Step::Return(resource),
                Err(e) => {
                    pool.0.connected -= 1;
                    Step::Fault(e)
                },
            },
            // A release fired our private event with the resource itself.
            AcquireState::Waiting => match resume.into_result() {
                Ok(resource) => Step::Return(resource),
                Err(e) => Step::Fault(e),
            },
        }
    }
}

impl Frame for ReleaseFrame {
    fn resume(&mut self, resume: Resume) -> Step {
        let mut pool: Pool = self.pool.clone();
        if self.fired {
            // Back from handing the resource to a waiter.
            return match resume.into_result() {
                Ok(_) => Step::Return(unit()),
                Err(e) => Step::Fault(e),
            };
        }
        let resource: Value = match self.resource.take() {
            Some(resource) => resource,
            None => return Step::Return(unit()),
        };
        if let Some(event) = pool.0.waiters.pop_front() {
            self.fired = true;
            return Step::Trap(Syscall::Fire(event, resource));
        }
        if pool.0.free.len() >= pool.0.maxsize {
            // More releases than the pool can hold; drop the surplus resource.
            pool.0.connected = pool.0.connected.saturating_sub(1);
            pool.0.discarded += 1;
            warn!("release(): pool={:?} is full, discarding resource", pool.0.name);
            return Step::Return(unit());
        }
        pool.0.free.push_front(resource);
        Step::Return(unit())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
