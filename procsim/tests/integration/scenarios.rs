//! Whole-simulation scenarios.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use procsim::coroutine::BoxError;
use procsim::simulation::{Env, ExecutionError, SchedulingError};

#[test]
fn endless_processes_stop_at_bound() {
    let mut env = Env::new();
    let ticks = Rc::new(Cell::new(0u32));
    let tocks = Rc::new(Cell::new(0u32));

    let tick = {
        let ticks = ticks.clone();
        env.process("tick", move |cx| async move {
            while cx.wait(cx.timeout(2)?).await.is_ok() {
                ticks.set(ticks.get() + 1);
            }
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };
    let tock = {
        let tocks = tocks.clone();
        env.process("tock", move |cx| async move {
            while cx.wait(cx.timeout(1)?).await.is_ok() {
                tocks.set(tocks.get() + 1);
            }
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };

    assert_eq!(env.run_until(26).unwrap(), 26);
    assert!(tick.is_alive());
    assert!(tock.is_alive());
    // Normal-priority events at the bound are left pending.
    assert_eq!(ticks.get(), 12);
    assert_eq!(tocks.get(), 25);

    assert_eq!(env.run_until(30).unwrap(), 30);
    assert_eq!(ticks.get(), 14);
    assert_eq!(tocks.get(), 29);
}

#[test]
fn bounded_processes_end_cleanly() {
    let mut env = Env::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    for (name, period, count) in [("slow", 2, 3), ("fast", 1, 4)] {
        let log = log.clone();
        env.process(name, move |cx| async move {
            for _ in 0..count {
                cx.wait(cx.timeout(period)?).await?;
                log.borrow_mut().push((name, cx.now()));
            }
            Ok::<_, BoxError>(count)
        })
        .unwrap();
    }

    assert_eq!(env.run().unwrap(), 6);
    assert_eq!(env.live_processes(), 0);
    assert_eq!(
        *log.borrow(),
        [
            ("fast", 1),
            ("slow", 2),
            ("fast", 2),
            ("fast", 3),
            ("slow", 4),
            ("fast", 4),
            ("slow", 6),
        ]
    );
}

#[test]
fn run_until_rejects_past_deadline() {
    let mut env = Env::with_initial_time(10);

    assert!(matches!(
        env.run_until(9),
        Err(ExecutionError::InvalidDeadline {
            now: 10,
            deadline: 9
        })
    ));
    assert_eq!(env.run_until(10).unwrap(), 10);
}

#[test]
fn process_waits_for_another_process() {
    let mut env = Env::new();
    let scheduler = env.scheduler();

    let parent = env
        .process("parent", move |cx| async move {
            let child = scheduler.process("child", |cx| async move {
                cx.wait(cx.timeout(4)?).await?;
                Ok::<_, BoxError>(21u32)
            })?;
            let value = cx.wait(&child).await?;
            let doubled = value
                .and_then(|v| v.downcast_ref::<u32>().copied())
                .map(|v| v * 2);

            Ok::<_, BoxError>(doubled)
        })
        .unwrap();

    assert_eq!(env.run().unwrap(), 4);
    assert_eq!(parent.event().value_as::<Option<u32>>(), Some(Some(42)));
}

#[test]
fn failing_process_aborts_and_shuts_down() {
    let mut env = Env::new();
    let survivor_closed = Rc::new(Cell::new(false));

    struct Sentinel(Rc<Cell<bool>>);
    impl Drop for Sentinel {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    {
        let sentinel = Sentinel(survivor_closed.clone());
        env.process("survivor", move |cx| async move {
            let _sentinel = sentinel;
            cx.wait(cx.timeout(100)?).await?;
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }
    env.process("faulty", |cx| async move {
        cx.wait(cx.timeout(3)?).await?;
        Err::<(), BoxError>("out of spare parts".into())
    })
    .unwrap();

    let error = env.run().unwrap_err();
    assert!(matches!(error, ExecutionError::EventFailed { ref event, .. } if event == "faulty"));
    assert_eq!(env.now(), 3);
    assert!(survivor_closed.get());
    assert_eq!(env.pending(), 0);
    assert_eq!(env.live_processes(), 0);

    assert!(matches!(env.run(), Ok(3)));
    assert!(matches!(env.run_until(5), Err(ExecutionError::Terminated)));
    assert!(matches!(
        env.scheduler().timeout(1),
        Err(SchedulingError::ShutDown)
    ));
}

#[test]
fn halted_simulation_can_be_resumed() {
    let mut env = Env::new();
    let halter = env.halter();

    env.process("operator", move |cx| async move {
        cx.wait(cx.timeout(5)?).await?;
        halter.halt();
        cx.wait(cx.timeout(5)?).await?;
        Ok::<_, BoxError>(())
    })
    .unwrap();

    assert!(matches!(env.run(), Err(ExecutionError::Halted)));
    assert_eq!(env.now(), 5);
    assert!(!env.is_shut_down());
    assert_eq!(env.run().unwrap(), 10);
}

#[test]
fn dropping_env_closes_processes() {
    let closed = Rc::new(Cell::new(false));
    let scheduler = {
        let mut env = Env::new();
        let closed = closed.clone();
        env.process("sleeper", move |cx| async move {
            let result = cx.wait(cx.timeout(50)?).await;
            closed.set(result.is_err());
            Ok::<_, BoxError>(())
        })
        .unwrap();
        env.run_until(10).unwrap();

        env.scheduler()
    };

    // Closing a process drops its body without resuming it.
    assert!(!closed.get());
    assert_eq!(Rc::strong_count(&closed), 1);
    assert!(matches!(
        scheduler.timeout(1),
        Err(SchedulingError::EnvDropped)
    ));
}

#[test]
fn sub_condition_shared_between_parents_is_disabled_by_cancel() {
    let mut env = Env::new();
    let a = env.timeout(1).unwrap();
    let b = env.timeout(2).unwrap();
    let shared = a.and("shared", &b).unwrap();

    let first = env.any_of("first", [shared.clone()]).unwrap();
    let second = env.any_of("second", [shared.clone()]).unwrap();

    assert!(first.cancel());
    env.run().unwrap();

    assert!(!shared.is_triggered());
    assert!(!second.is_triggered());
}
