//! Ordering of same-time events.

use std::cell::RefCell;
use std::rc::Rc;

use procsim::coroutine::BoxError;
use procsim::simulation::{Env, Priority};

#[test]
fn jobs_processed_in_time_priority_fifo_order() {
    let mut env = Env::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    // (id, priority, delay) in scheduling order.
    let jobs = [
        (0, Priority::Low, 3),
        (1, Priority::Normal, 1),
        (2, Priority::Urgent, 3),
        (3, Priority::Normal, 3),
        (4, Priority::Low, 1),
        (5, Priority::Normal, 3),
        (6, Priority::Urgent, 1),
        (7, Priority::Low, 3),
    ];
    for (id, priority, delay) in jobs {
        let ev = env.event(format!("job-{id}"));
        let log = log.clone();
        ev.add_callback(move |_| log.borrow_mut().push(id));
        env.schedule(&ev, priority, delay).unwrap();
    }

    env.run().unwrap();
    assert_eq!(*log.borrow(), [6, 1, 4, 2, 3, 5, 0, 7]);
}

#[test]
fn process_start_precedes_same_time_events() {
    let mut env = Env::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let ev = env.event("normal");
    {
        let log = log.clone();
        ev.add_callback(move |_| log.borrow_mut().push("normal"));
    }
    ev.succeed(()).unwrap();

    {
        let log = log.clone();
        env.process("p", move |_cx| async move {
            log.borrow_mut().push("process");
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run().unwrap();
    assert_eq!(*log.borrow(), ["process", "normal"]);
}

#[test]
fn same_time_wakeups_follow_trigger_order() {
    let mut env = Env::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let gate = env.event("gate");

    for name in ["a", "b", "c"] {
        let log = log.clone();
        let gate = gate.clone();
        env.process(name, move |cx| async move {
            cx.wait(&gate).await?;
            log.borrow_mut().push((name, cx.now()));
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }
    env.run().unwrap();
    assert!(log.borrow().is_empty());

    env.schedule(&gate, Priority::Normal, 4).unwrap();
    env.run().unwrap();
    assert_eq!(*log.borrow(), [("a", 4), ("b", 4), ("c", 4)]);
}

#[test]
fn step_processes_one_job_at_a_time() {
    let mut env = Env::new();
    env.timeout(2).unwrap();
    env.timeout(5).unwrap();

    assert_eq!(env.pending(), 2);
    assert!(env.step().unwrap());
    assert_eq!(env.now(), 2);
    assert_eq!(env.peek(), Some(5));
    assert!(env.step().unwrap());
    assert_eq!(env.now(), 5);
    assert!(!env.step().unwrap());
}
