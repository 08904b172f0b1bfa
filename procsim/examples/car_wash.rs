//! Example: a car wash with a limited number of washing machines.
//!
//! This example demonstrates in particular:
//!
//! * processes spawning other processes,
//! * shared resources with FIFO queues,
//! * bounded simulation runs.
//!
//! ```text
//!                    ┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┓
//!                    ┃ Car wash                              ┃
//! ┌───────────┐ cars ┃  ┌─────────┐      ┌──────────────┐    ┃
//! │ Generator ├──────╂─►│  Queue  ├─────►│ Machines (2) ├────╂─► clean cars
//! └───────────┘      ┃  └─────────┘      └──────────────┘    ┃
//!                    ┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┛
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use procsim::coroutine::BoxError;
use procsim::process::ProcessContext;
use procsim::resource::Resource;
use procsim::simulation::{Env, Scheduler, SchedulingError, SimulationError};
use procsim::time::Time;

const MACHINES: usize = 2;
const WASH_TIME: Time = 5;
const ARRIVAL_PERIOD: Time = 3;
const INITIAL_CARS: usize = 4;
const SIM_TIME: Time = 20;

/// Record of a car that went through the wash.
#[derive(Clone, Copy, Debug)]
struct Visit {
    car: usize,
    arrival: Time,
    start: Time,
    departure: Time,
}

type Journal = Rc<RefCell<Vec<Visit>>>;

/// The life of a car: queue for a machine, get washed, leave.
async fn car(
    cx: ProcessContext,
    car: usize,
    wash: Resource,
    journal: Journal,
) -> Result<(), BoxError> {
    let arrival = cx.now();

    let machine = wash.request("machine")?;
    cx.wait(&machine).await?;
    let start = cx.now();

    cx.wait(cx.timeout(WASH_TIME)?).await?;
    wash.release("machine", machine)?;

    journal.borrow_mut().push(Visit {
        car,
        arrival,
        start,
        departure: cx.now(),
    });

    Ok(())
}

fn spawn_car(
    scheduler: &Scheduler,
    id: usize,
    wash: &Resource,
    journal: &Journal,
) -> Result<(), SchedulingError> {
    let wash = wash.clone();
    let journal = journal.clone();
    scheduler.process(format!("car-{id}"), move |cx| car(cx, id, wash, journal))?;

    Ok(())
}

fn main() -> Result<(), SimulationError> {
    // ---------------
    // Bench assembly.
    // ---------------

    let mut env = Env::new();
    let scheduler = env.scheduler();
    let wash = Resource::new(&scheduler, "car wash", MACHINES);
    let journal = Journal::default();

    // Cars already waiting when the car wash opens.
    for id in 0..INITIAL_CARS {
        spawn_car(&scheduler, id, &wash, &journal)?;
    }

    // Periodic arrival of new cars.
    {
        let wash = wash.clone();
        let journal = journal.clone();
        env.process("generator", move |cx| async move {
            let mut id = INITIAL_CARS;
            while cx.wait(cx.timeout(ARRIVAL_PERIOD)?).await.is_ok() {
                spawn_car(cx.scheduler(), id, &wash, &journal)?;
                id += 1;
            }

            Ok::<_, BoxError>(())
        })?;
    }

    // ----------
    // Simulation.
    // ----------

    let end = env.run_until(SIM_TIME)?;
    assert_eq!(end, SIM_TIME);

    let journal = journal.borrow();
    for visit in journal.iter() {
        println!(
            "car {:>2}: arrived at {:>2}, washed at {:>2}, left at {:>2}",
            visit.car, visit.arrival, visit.start, visit.departure
        );
    }

    // Cars are washed in the order of arrival.
    let mut by_car = journal.clone();
    by_car.sort_by_key(|visit| visit.car);
    assert!(by_car.windows(2).all(|w| w[0].start <= w[1].start));

    // No more cars are washed at once than there are machines.
    for visit in journal.iter() {
        let busy = journal
            .iter()
            .filter(|other| other.start <= visit.start && visit.start < other.departure)
            .count();
        assert!(busy <= MACHINES);
    }

    // Departures at the end time itself are left pending.
    assert_eq!(journal.len(), 6);
    assert_eq!(wash.count(), MACHINES);

    Ok(())
}
