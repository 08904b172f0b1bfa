//! Conditions awaited from process bodies.

use std::cell::RefCell;
use std::rc::Rc;

use procsim::condition::ConditionValue;
use procsim::coroutine::BoxError;
use procsim::event::Event;
use procsim::process::WaitOutcome;
use procsim::simulation::{Env, ExecutionError};

#[test]
fn process_waits_for_all_of() {
    let mut env = Env::new();
    let scheduler = env.scheduler();

    let proc = env
        .process("collector", move |cx| async move {
            let a = scheduler.timeout_with(3, 1u32)?;
            let b = scheduler.timeout_with(7, 2u32)?;
            let both = scheduler.all_of("both", [a.clone(), b.clone()])?;

            let value = cx.wait(&both).await?;
            let value = value
                .as_ref()
                .and_then(|v| v.downcast_ref::<ConditionValue>())
                .cloned()
                .ok_or("condition without a value")?;

            let sum: u32 = value
                .iter()
                .filter_map(|ev| ev.value_as::<u32>())
                .sum();

            Ok::<_, BoxError>((cx.now(), sum))
        })
        .unwrap();

    env.run().unwrap();
    assert_eq!(proc.event().value_as::<(u64, u32)>(), Some((7, 3)));
}

#[test]
fn process_races_events_with_any_of() {
    let mut env = Env::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let log = log.clone();
        env.process("racer", move |cx| async move {
            let slow = cx.timeout(10)?;
            let fast = cx.timeout(4)?;
            let race = slow.or("race", &fast)?;
            cx.wait(&race).await?;

            log.borrow_mut().push((cx.now(), fast.is_processed(), slow.is_processed()));
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    assert_eq!(env.run().unwrap(), 10);
    assert_eq!(*log.borrow(), [(4, true, false)]);
}

#[test]
fn empty_conditions_resume_immediately() {
    let mut env = Env::new();
    let scheduler = env.scheduler();

    let proc = env
        .process("empty", move |cx| async move {
            cx.wait(scheduler.all_of("none", Vec::<Event>::new())?).await?;
            cx.wait(scheduler.any_of("none", Vec::<Event>::new())?).await?;

            Ok::<_, BoxError>(cx.now())
        })
        .unwrap();

    env.run().unwrap();
    assert_eq!(proc.event().value_as::<u64>(), Some(0));
}

#[test]
fn failed_child_aborts_unless_condition_is_handled() {
    let mut env = Env::new();
    let scheduler = env.scheduler();

    env.process("waiter", move |cx| async move {
        let broken = cx.event("broken");
        let later = cx.timeout(5)?;
        let all = scheduler.all_of("all", [broken.clone(), later])?;
        broken.fail("sensor fault")?;

        cx.wait(&all).await?;
        Ok::<_, BoxError>(())
    })
    .unwrap();

    match env.run() {
        Err(ExecutionError::EventFailed { event, cause }) => {
            assert_eq!(event, "all");
            assert_eq!(cause.downcast_ref::<&str>(), Some(&"sensor fault"));
        }
        other => panic!("unexpected run result: {other:?}"),
    }
    assert_eq!(env.now(), 5);
    assert!(env.is_shut_down());
    assert_eq!(env.live_processes(), 0);
}

#[test]
fn defused_condition_failure_closes_waiter() {
    let mut env = Env::new();
    let scheduler = env.scheduler();
    let reached = Rc::new(RefCell::new(false));

    let proc = {
        let reached = reached.clone();
        env.process("waiter", move |cx| async move {
            let broken = cx.event("broken");
            let all = scheduler.all_of("all", [broken.clone()])?;
            all.defuse();
            broken.fail(())?;

            cx.wait(&all).await?;
            *reached.borrow_mut() = true;
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };

    env.run().unwrap();
    assert!(!*reached.borrow());
    assert!(!proc.is_alive());
    assert!(proc.event().is_ok());
}

#[test]
fn wait_timeout_reports_which_came_first() {
    let mut env = Env::new();

    let proc = env
        .process("patient", move |cx| async move {
            let quick = cx.scheduler().timeout_with(2, "done")?;
            let first = cx.wait_timeout(&quick, 5).await?;

            let never = cx.event("never");
            let second = cx.wait_timeout(&never, 5).await?;

            let first = matches!(
                first,
                WaitOutcome::Completed(Some(ref v)) if v.downcast_ref::<&str>() == Some(&"done")
            );
            let second = matches!(second, WaitOutcome::TimedOut);

            Ok::<_, BoxError>((cx.now(), first, second))
        })
        .unwrap();

    env.run().unwrap();
    assert_eq!(proc.event().value_as::<(u64, bool, bool)>(), Some((7, true, true)));
}
