// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::std::{
    cell::RefCell,
    rc::Rc,
};
use ::weft::{
    downcast,
    unit,
    value,
    Frame,
    Pool,
    Resume,
    SharedScheduler,
    Step,
    Value,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// A factory handing out distinct integer "connections", counting how many were made.
fn counting_factory(created: Rc<RefCell<u64>>) -> Box<dyn FnMut() -> Box<dyn Frame>> {
    Box::new(move || {
        let created: Rc<RefCell<u64>> = created.clone();
        let body = move |_resume: Resume| -> Step {
            let mut n = created.borrow_mut();
            *n += 1;
            Step::Return(value(*n))
        };
        Box::new(body)
    })
}

/// Spawns a task that delegates to `frame` and records its result.
fn spawn_collecting(scheduler: &mut SharedScheduler, name: &str, frame: Box<dyn Frame>, out: Rc<RefCell<Option<u64>>>) {
    let mut frame: Option<Box<dyn Frame>> = Some(frame);
    let body = move |resume: Resume| -> Step {
        if let Some(frame) = frame.take() {
            return Step::Call(frame);
        }
        let v: Value = match resume.into_result() {
            Ok(v) => v,
            Err(e) => return Step::Fault(e),
        };
        *out.borrow_mut() = downcast::<u64>(&v);
        Step::Return(unit())
    };
    scheduler.spawn(name, Box::new(body));
}

/// Spawns a task that delegates to `frame` and discards its result.
fn spawn_driving(scheduler: &mut SharedScheduler, name: &str, frame: Box<dyn Frame>) {
    let mut frame: Option<Box<dyn Frame>> = Some(frame);
    let body = move |resume: Resume| -> Step {
        if let Some(frame) = frame.take() {
            return Step::Call(frame);
        }
        match resume.into_result() {
            Ok(_) => Step::Return(unit()),
            Err(e) => Step::Fault(e),
        }
    };
    scheduler.spawn(name, Box::new(body));
}

//==============================================================================
// Tests for the Pool
//==============================================================================

/// Walks a small pool through its whole life: pre-population, draining, growth up to the cap,
/// parking at capacity, and a targeted handoff on release.
#[test]
fn pool_lifecycle() -> Result<()> {
    let mut scheduler: SharedScheduler = SharedScheduler::new();
    let created: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
    let pool: Pool = Pool::new("lifecycle", 2, 3, counting_factory(created.clone()));

    // Pre-populate: two connections, both idle.
    spawn_driving(&mut scheduler, "init", Box::new(pool.init()));
    scheduler.run();
    weft::ensure_eq!(pool.free_count(), 2);
    weft::ensure_eq!(pool.connected_count(), 2);
    weft::ensure_eq!(*created.borrow(), 2);

    // Three acquirers: two drain the free list, the third grows the pool to its cap.
    let holders: Vec<Rc<RefCell<Option<u64>>>> = (0..3).map(|_| Rc::new(RefCell::new(None))).collect();
    for (i, out) in holders.iter().enumerate() {
        spawn_collecting(&mut scheduler, &format!("holder-{}", i), Box::new(pool.acquire()), out.clone());
    }
    scheduler.run();
    weft::ensure_eq!(pool.free_count(), 0);
    weft::ensure_eq!(pool.connected_count(), 3);
    weft::ensure_eq!(*created.borrow(), 3);
    for out in &holders {
        weft::ensure_eq!(out.borrow().is_some(), true);
    }

    // A fourth acquirer finds the pool at capacity and parks.
    let fourth: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    spawn_collecting(&mut scheduler, "holder-3", Box::new(pool.acquire()), fourth.clone());
    for _ in 0..8 {
        scheduler.dispatch();
    }
    weft::ensure_eq!(fourth.borrow().is_none(), true);
    weft::ensure_eq!(pool.waiter_count(), 1);

    // Releasing one connection hands it straight to the parked acquirer; nothing new is made.
    let released: u64 = holders[0].borrow().unwrap();
    spawn_driving(&mut scheduler, "releaser", Box::new(pool.release(value(released))));
    scheduler.run();
    weft::ensure_eq!(*fourth.borrow(), Some(released));
    weft::ensure_eq!(pool.waiter_count(), 0);
    weft::ensure_eq!(pool.connected_count(), 3);
    weft::ensure_eq!(pool.free_count(), 0);
    weft::ensure_eq!(*created.borrow(), 3);
    Ok(())
}

/// Tests that a release with nobody waiting parks the resource on the free list for reuse.
#[test]
fn released_resources_are_reused() -> Result<()> {
    let mut scheduler: SharedScheduler = SharedScheduler::new();
    let created: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
    let pool: Pool = Pool::new("reuse", 0, 2, counting_factory(created.clone()));

    let first: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    spawn_collecting(&mut scheduler, "first", Box::new(pool.acquire()), first.clone());
    scheduler.run();
    let held: u64 = first.borrow().unwrap();

    spawn_driving(&mut scheduler, "releaser", Box::new(pool.release(value(held))));
    scheduler.run();
    weft::ensure_eq!(pool.free_count(), 1);

    // The next acquirer gets the same connection back.
    let second: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    spawn_collecting(&mut scheduler, "second", Box::new(pool.acquire()), second.clone());
    scheduler.run();
    weft::ensure_eq!(*second.borrow(), Some(held));
    weft::ensure_eq!(*created.borrow(), 1);
    Ok(())
}

/// Tests that each release at capacity wakes exactly one parked acquirer, oldest first.
#[test]
fn one_release_wakes_one_waiter() -> Result<()> {
    let mut scheduler: SharedScheduler = SharedScheduler::new();
    let created: Rc<RefCell<u64>> = Rc::new(RefCell::new(0));
    let pool: Pool = Pool::new("single-wake", 0, 1, counting_factory(created.clone()));

    let holder: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    spawn_collecting(&mut scheduler, "holder", Box::new(pool.acquire()), holder.clone());
    scheduler.run();
    let held: u64 = holder.borrow().unwrap();

    // Two tasks park behind the single connection.
    let first: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    let second: Rc<RefCell<Option<u64>>> = Rc::new(RefCell::new(None));
    spawn_collecting(&mut scheduler, "first", Box::new(pool.acquire()), first.clone());
    spawn_collecting(&mut scheduler, "second", Box::new(pool.acquire()), second.clone());
    for _ in 0..8 {
        scheduler.dispatch();
    }
    weft::ensure_eq!(pool.waiter_count(), 2);

    // One release serves only the older waiter.
    spawn_driving(&mut scheduler, "releaser", Box::new(pool.release(value(held))));
    for _ in 0..8 {
        scheduler.dispatch();
    }
    weft::ensure_eq!(*first.borrow(), Some(held));
    weft::ensure_eq!(second.borrow().is_none(), true);
    weft::ensure_eq!(pool.waiter_count(), 1);
    weft::ensure_eq!(*created.borrow(), 1);
    Ok(())
}
