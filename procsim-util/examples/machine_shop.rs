//! Example: a machine shop whose machines break down at random and share a
//! single repairman.
//!
//! This example demonstrates in particular:
//!
//! * process interruption,
//! * shared resources,
//! * broadcast notifications,
//! * observable state,
//! * optional real-time pacing (run with `--paced`).
//!
//! ```text
//! ┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//! ┃ Machine shop                                         ┃
//! ┃  ┌───────────┐ interrupt ┌───────────┐ parts         ┃
//! ┃  │ Breakdown ├──────────►│  Machine  ├───────────────╂─► Reporter
//! ┃  │           │◄──────────┤           │               ┃
//! ┃  └───────────┘ repaired  └─────┬─────┘               ┃
//! ┃                                │ request             ┃
//! ┃                          ┌─────▼─────┐               ┃
//! ┃                          │ Repairman │               ┃
//! ┃                          └───────────┘               ┃
//! ┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use procsim::coroutine::BoxError;
use procsim::process::{Process, ProcessContext};
use procsim::resource::Resource;
use procsim::simulation::{Env, SimulationError};
use procsim::time::{SystemClock, Time};
use procsim_util::helper_processes::Ticker;
use procsim_util::notifier::Notifier;
use procsim_util::observables::ObservableValue;

const SEED: u64 = 42;
const MACHINES: usize = 5;
/// Range of the time needed to make a part, in minutes.
const PART_TIME: (Time, Time) = (8, 12);
/// Range of the time to failure of a machine, in minutes.
const TIME_TO_FAILURE: (Time, Time) = (60, 540);
const REPAIR_TIME: Time = 30;
/// Four weeks, in minutes.
const SIM_TIME: Time = 4 * 7 * 24 * 60;
/// Wall-clock duration of one simulated minute in paced mode.
const PACED_TICK: Duration = Duration::from_micros(20);

type SharedRng = Rc<RefCell<StdRng>>;

/// Everything a machine needs to run.
struct Machine {
    id: usize,
    rng: SharedRng,
    repairman: Resource,
    repaired: Notifier,
    made: Rc<RefCell<Vec<u64>>>,
    parts: ObservableValue<u64>,
}

impl Machine {
    /// Makes parts forever, calling the repairman whenever it breaks down.
    async fn run(self, cx: ProcessContext) -> Result<(), BoxError> {
        loop {
            let mut remaining = self.rng.borrow_mut().gen_range(PART_TIME.0..=PART_TIME.1);
            while remaining > 0 {
                let start = cx.now();
                match cx.wait(cx.timeout(remaining)?).await {
                    Ok(_) => remaining = 0,
                    Err(_) => {
                        remaining -= cx.now() - start;

                        let repair = self.repairman.request(format!("repair-{}", self.id))?;
                        cx.wait(&repair).await?;
                        cx.wait(cx.timeout(REPAIR_TIME)?).await?;
                        self.repairman.release("repair done", repair)?;

                        self.repaired.notify_one(self.id)?;
                    }
                }
            }

            self.made.borrow_mut()[self.id] += 1;
            self.parts.modify(|parts| *parts += 1)?;
        }
    }
}

/// Breaks a machine down at random times, waiting for each repair before
/// starting the next time to failure.
async fn breakdown(
    cx: ProcessContext,
    machine: Process,
    rng: SharedRng,
    repaired: Notifier,
    repairs: Rc<RefCell<u64>>,
) -> Result<(), BoxError> {
    loop {
        let ttf = rng
            .borrow_mut()
            .gen_range(TIME_TO_FAILURE.0..=TIME_TO_FAILURE.1);
        cx.wait(cx.timeout(ttf)?).await?;

        let done = repaired.wait();
        machine.interrupt("breakdown")?;
        cx.wait(done).await?;
        *repairs.borrow_mut() += 1;
    }
}

fn main() -> Result<(), SimulationError> {
    let paced = std::env::args().any(|arg| arg == "--paced");

    // ---------------
    // Bench assembly.
    // ---------------

    let mut env = Env::new();
    let scheduler = env.scheduler();

    let rng: SharedRng = Rc::new(RefCell::new(StdRng::seed_from_u64(SEED)));
    let repairman = Resource::new(&scheduler, "repairman", 1);
    let made = Rc::new(RefCell::new(vec![0u64; MACHINES]));
    let parts = ObservableValue::new(&scheduler, "parts", 0u64);
    let repairs = Rc::new(RefCell::new(0u64));

    for id in 0..MACHINES {
        let repaired = Notifier::new(&scheduler, format!("repaired-{id}"));
        let machine = Machine {
            id,
            rng: rng.clone(),
            repairman: repairman.clone(),
            repaired: repaired.clone(),
            made: made.clone(),
            parts: parts.clone(),
        };
        let machine = env.process(format!("machine-{id}"), move |cx| machine.run(cx))?;

        let rng = rng.clone();
        let repairs = repairs.clone();
        env.process(format!("breakdown-{id}"), move |cx| {
            breakdown(cx, machine, rng, repaired, repairs)
        })?;
    }

    // Reports every thousandth part.
    {
        let parts = parts.clone();
        env.process("reporter", move |cx| async move {
            while let Ok(Some(value)) = cx.wait(parts.changed()).await {
                if let Some(count) = value.downcast_ref::<u64>() {
                    if count % 1000 == 0 {
                        println!("t={:>6}: {count} parts made", cx.now());
                    }
                }
            }
            Ok::<_, BoxError>(())
        })?;
    }

    if paced {
        env.set_clock(SystemClock::new(PACED_TICK));
        Ticker::new(60).spawn(&scheduler)?;
    }

    // ----------
    // Simulation.
    // ----------

    env.run_until(SIM_TIME)?;

    let made = made.borrow();
    for (id, count) in made.iter().enumerate() {
        println!("machine {id} made {count} parts");
    }
    println!("{} repairs", repairs.borrow());

    assert_eq!(made.iter().sum::<u64>(), parts.get());
    assert!(parts.get() > 0);
    assert!(repairman.count() <= 1);

    Ok(())
}
