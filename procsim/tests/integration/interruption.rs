//! Process interruption.

use std::cell::RefCell;
use std::rc::Rc;

use procsim::coroutine::{BoxError, Interrupt};
use procsim::process::{InterruptError, Process};
use procsim::simulation::Env;

#[test]
fn interrupted_wait_observes_interrupt_at_interruption_time() {
    let mut env = Env::with_initial_time(5);
    let log = Rc::new(RefCell::new(Vec::new()));

    let sleeper = {
        let log = log.clone();
        env.process("sleeper", move |cx| async move {
            let nap = cx.timeout(10)?;
            match cx.wait(&nap).await {
                Ok(_) => log.borrow_mut().push(("woke", cx.now())),
                Err(signal) => {
                    let cause = signal.cause_as::<&str>().copied().unwrap_or("?");
                    log.borrow_mut().push((cause, cx.now()));
                }
            }
            cx.wait(&nap).await?;
            log.borrow_mut().push(("nap over", cx.now()));

            Ok::<_, BoxError>(())
        })
        .unwrap()
    };

    {
        let sleeper = sleeper.clone();
        env.process("alarm", move |cx| async move {
            cx.wait(cx.timeout(3)?).await?;
            sleeper.interrupt("alarm")?;
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run().unwrap();
    assert_eq!(*log.borrow(), [("alarm", 8), ("nap over", 15)]);
    assert!(!sleeper.is_alive());
}

#[test]
fn unhandled_interrupt_ends_process_quietly() {
    let mut env = Env::new();

    let victim = env
        .process("victim", |cx| async move {
            cx.wait(cx.timeout(100)?).await?;
            Ok::<_, BoxError>("finished")
        })
        .unwrap();

    {
        let victim = victim.clone();
        env.process("killer", move |cx| async move {
            cx.wait(cx.timeout(1)?).await?;
            victim.interrupt(())?;
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run_until(2).unwrap();
    assert!(!victim.is_alive());
    assert!(victim.event().is_ok());
    assert!(victim.value().is_none());
}

#[test]
fn process_cannot_interrupt_itself() {
    let mut env = Env::new();
    let outcome = Rc::new(RefCell::new(None));

    {
        let outcome = outcome.clone();
        env.process("narcissus", move |cx| async move {
            let this = cx.this().ok_or("no current process")?;
            *outcome.borrow_mut() = Some(this.interrupt(()));
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run().unwrap();
    assert_eq!(*outcome.borrow(), Some(Err(InterruptError::SelfInterrupt)));
}

#[test]
fn terminated_process_cannot_be_interrupted() {
    let mut env = Env::new();
    let quick = env
        .process("quick", |_cx| async { Ok::<_, BoxError>(()) })
        .unwrap();

    env.run().unwrap();
    assert_eq!(quick.interrupt(()), Err(InterruptError::Terminated));
}

#[test]
fn urgent_interrupt_preempts_same_time_event() {
    let mut env = Env::new();
    let gate = env.event("gate");
    let log = Rc::new(RefCell::new(Vec::new()));

    let victim = {
        let gate = gate.clone();
        let log = log.clone();
        env.process("victim", move |cx| async move {
            let result = cx.wait(&gate).await;
            log.borrow_mut().push(result.is_ok());
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };
    env.run().unwrap();

    gate.succeed(()).unwrap();
    victim.interrupt(()).unwrap();
    env.run().unwrap();
    assert_eq!(*log.borrow(), [false]);
    assert_eq!(victim.interrupt(()), Err(InterruptError::Terminated));
}

#[test]
fn interrupt_dropped_when_victim_finishes_first() {
    let mut env = Env::new();
    let gate = env.event("gate");
    let slot: Rc<RefCell<Option<Process>>> = Rc::default();
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let gate = gate.clone();
        let slot = slot.clone();
        env.process("killer", move |cx| async move {
            cx.wait(&gate).await?;
            let victim = slot.borrow().clone().ok_or("no victim")?;
            victim.interrupt("too late")?;
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }
    let victim = {
        let gate = gate.clone();
        let log = log.clone();
        env.process("victim", move |cx| async move {
            let result = cx.wait(&gate).await;
            log.borrow_mut().push(result.is_ok());
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };
    *slot.borrow_mut() = Some(victim.clone());
    env.run().unwrap();

    // The killer and the victim are both resumed by the gate, so the victim
    // terminates before the interruption is delivered.
    gate.succeed(()).unwrap();
    env.run().unwrap();
    assert_eq!(*log.borrow(), [true]);
    assert!(victim.event().is_ok());
}

#[test]
fn interrupts_are_delivered_in_order() {
    let mut env = Env::new();
    let causes = Rc::new(RefCell::new(Vec::new()));

    let listener: Process = {
        let causes = causes.clone();
        env.process("listener", move |cx| async move {
            let forever = cx.event("forever");
            for _ in 0..3 {
                if let Err(signal) = cx.wait(&forever).await {
                    causes
                        .borrow_mut()
                        .push(signal.cause_as::<u32>().copied().unwrap_or_default());
                }
            }
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };
    env.run().unwrap();

    for cause in [3u32, 1, 2] {
        listener.interrupt(cause).unwrap();
    }
    env.run().unwrap();

    assert_eq!(*causes.borrow(), [3, 1, 2]);
    assert!(!listener.is_alive());
}

#[test]
fn interrupt_cause_is_exposed() {
    let signal = Interrupt::new(String::from("preempted"));
    assert_eq!(signal.cause_as::<String>().map(String::as_str), Some("preempted"));
    assert!(signal.cause_as::<u32>().is_none());
}
