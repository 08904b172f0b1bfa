//! Shared resources used from process bodies.

use std::cell::RefCell;
use std::rc::Rc;

use procsim::coroutine::BoxError;
use procsim::process::WaitOutcome;
use procsim::resource::{Container, Resource, ResourceError};
use procsim::simulation::{Env, ExecutionError};

#[test]
fn drivers_are_served_in_arrival_order() {
    let mut env = Env::new();
    let station = Resource::new(&env.scheduler(), "station", 2);
    let log = Rc::new(RefCell::new(Vec::new()));

    for (driver, drive) in [(0, 4), (1, 1), (2, 3), (3, 2)] {
        let station = station.clone();
        let log = log.clone();
        env.process(format!("driver-{driver}"), move |cx| async move {
            cx.wait(cx.timeout(drive)?).await?;
            let slot = station.request("charge")?;
            cx.wait(&slot).await?;
            log.borrow_mut().push((driver, cx.now()));
            cx.wait(cx.timeout(40)?).await?;
            station.release("leave", slot)?;

            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    assert_eq!(env.run().unwrap(), 82);
    assert_eq!(*log.borrow(), [(1, 1), (3, 2), (2, 41), (0, 42)]);
    assert_eq!(station.count(), 0);
}

#[test]
fn impatient_customer_withdraws_request() {
    let mut env = Env::new();
    let counter = Resource::new(&env.scheduler(), "counter", 1);
    let log = Rc::new(RefCell::new(Vec::new()));

    {
        let counter = counter.clone();
        env.process("slow", move |cx| async move {
            let slot = counter.request("serve")?;
            cx.wait(&slot).await?;
            cx.wait(cx.timeout(10)?).await?;
            drop(slot);
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }
    {
        let counter = counter.clone();
        let log = log.clone();
        env.process("impatient", move |cx| async move {
            let slot = counter.request("serve")?;
            match cx.wait_timeout(&slot, 3).await? {
                WaitOutcome::Completed(_) => log.borrow_mut().push(("served", cx.now())),
                WaitOutcome::TimedOut => log.borrow_mut().push(("left", cx.now())),
            }
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run_until(5).unwrap();
    assert_eq!(*log.borrow(), [("left", 3)]);
    assert_eq!(counter.queue_len(), 0);
    assert_eq!(counter.count(), 1);

    env.run().unwrap();
    assert_eq!(counter.count(), 0);
}

#[test]
fn slot_of_closed_process_is_given_back() {
    let mut env = Env::new();
    let machine = Resource::new(&env.scheduler(), "machine", 1);

    let holder = {
        let machine = machine.clone();
        env.process("holder", move |cx| async move {
            let slot = machine.request("use")?;
            cx.wait(&slot).await?;
            cx.wait(cx.event("forever")).await?;
            drop(slot);
            Ok::<_, BoxError>(())
        })
        .unwrap()
    };

    let waiter = {
        let machine = machine.clone();
        env.process("waiter", move |cx| async move {
            let slot = machine.request("use")?;
            cx.wait(&slot).await?;
            Ok::<_, BoxError>(cx.now())
        })
        .unwrap()
    };

    env.run_until(5).unwrap();
    assert!(waiter.is_alive());

    holder.interrupt("breakdown").unwrap();
    env.run().unwrap();
    assert!(!holder.is_alive());
    assert_eq!(waiter.event().value_as::<u64>(), Some(5));
}

#[test]
fn container_partial_consumption_nets_out() {
    let mut env = Env::new();
    let tank = Container::new(&env.scheduler(), "tank", 100);

    let consumer = {
        let tank = tank.clone();
        env.process("consumer", move |cx| async move {
            let mut fuel = tank.request("fill", 30)?;
            cx.wait(&fuel).await?;
            cx.wait(cx.timeout(2)?).await?;
            fuel.consume(12)?;
            fuel.consume(5)?;
            fuel.close()?;

            Ok::<_, BoxError>(())
        })
        .unwrap()
    };

    env.run().unwrap();
    assert!(consumer.event().is_ok());
    assert_eq!(tank.amount(), 83);
}

#[test]
fn container_consumer_waits_for_producer() {
    let mut env = Env::new();
    let silo = Container::new(&env.scheduler(), "silo", 0);

    let consumer = {
        let silo = silo.clone();
        env.process("consumer", move |cx| async move {
            let mut grain = silo.request("load", 50)?;
            cx.wait(&grain).await?;
            grain.consume(50)?;
            Ok::<_, BoxError>(cx.now())
        })
        .unwrap()
    };

    {
        let silo = silo.clone();
        env.process("producer", move |cx| async move {
            for _ in 0..3 {
                cx.wait(cx.timeout(5)?).await?;
                silo.release("harvest", 20)?;
            }
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    env.run().unwrap();
    assert_eq!(consumer.event().value_as::<u64>(), Some(15));
    assert_eq!(silo.amount(), 10);
}

#[test]
fn overconsumption_fails_the_process() {
    let mut env = Env::new();
    let tank = Container::new(&env.scheduler(), "tank", 10);

    {
        let tank = tank.clone();
        env.process("greedy", move |cx| async move {
            let mut fuel = tank.request("fill", 4)?;
            cx.wait(&fuel).await?;
            fuel.consume(5)?;
            Ok::<_, BoxError>(())
        })
        .unwrap();
    }

    match env.run() {
        Err(ExecutionError::EventFailed { event, cause }) => {
            assert_eq!(event, "greedy");
            let failure = cause
                .downcast_ref::<procsim::process::ProcessFailure>()
                .unwrap();
            assert!(matches!(
                failure.error().downcast_ref::<ResourceError>(),
                Some(ResourceError::Overconsumption {
                    planned: 4,
                    requested: 5,
                    ..
                })
            ));
        }
        other => panic!("unexpected run result: {other:?}"),
    }
    // The reservation was returned when the process body was dropped.
    assert_eq!(tank.amount(), 10);
}
