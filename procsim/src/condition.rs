//! Composite events.
//!
//! A condition is an [`Event`] whose outcome is derived from a list of child
//! events according to a [`Quantifier`]:
//!
//! * an *all-of* condition succeeds once all of its children have succeeded,
//! * an *any-of* condition succeeds as soon as one of its children has
//!   succeeded.
//!
//! A condition with no children succeeds immediately. A condition whose
//! quantifier can no longer be satisfied fails, but only after all of its
//! children were processed; its failure cause is the cause of the first
//! failed child. Failed children are defused by the condition, which thereby
//! takes responsibility for their failure.
//!
//! The value of a successful condition is a [`ConditionValue`] listing, in
//! declaration order, the children that had succeeded when the condition was
//! triggered. Child conditions are flattened into their own children.
//!
//! Conditions are created with [`Scheduler::all_of`] and
//! [`Scheduler::any_of`], or by combining two events with [`Event::and`] and
//! [`Event::or`].
//!
//! Sharing a child *condition* between several parent conditions is not
//! supported: cancelling the child on behalf of one parent silently disables
//! it for the others. Plain events can be shared freely.
//!
//! [`Scheduler::all_of`]: crate::simulation::Scheduler::all_of
//! [`Scheduler::any_of`]: crate::simulation::Scheduler::any_of
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::event::{CallbackKey, Event, EventKind, Outcome, Value};
use crate::simulation::{Priority, Scheduler, SchedulingError};

/// The rule by which a condition evaluates its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// All children must succeed.
    AllOf,
    /// One successful child is enough.
    AnyOf,
}

impl Quantifier {
    fn is_satisfied(self, ok_count: usize, len: usize) -> bool {
        match self {
            Self::AllOf => ok_count == len,
            Self::AnyOf => ok_count > 0,
        }
    }
}

struct ConditionState {
    keys: Vec<Option<CallbackKey>>,
    ok_count: usize,
    processed_count: usize,
    first_failure: Option<Value>,
    is_cancelled: bool,
}

/// The evaluation state of a condition event.
pub(crate) struct ConditionNode {
    quantifier: Quantifier,
    children: Vec<Event>,
    state: RefCell<ConditionState>,
}

impl ConditionNode {
    /// Unregisters the condition from all children it still listens to.
    fn detach(&self) {
        let keys = std::mem::take(&mut self.state.borrow_mut().keys);
        for (child, key) in self.children.iter().zip(keys) {
            if let Some(key) = key {
                child.remove_callback(key);
            }
        }
    }

    /// Permanently disables the condition and its pending child conditions.
    fn cancel(&self) {
        self.state.borrow_mut().is_cancelled = true;
        self.detach();
        self.cancel_children();
    }

    fn cancel_children(&self) {
        for child in &self.children {
            if !child.is_triggered() {
                if let Some(node) = child.condition() {
                    node.cancel();
                }
            }
        }
    }

    /// Appends the succeeded children, flattening child conditions.
    fn collect(&self, events: &mut Vec<Event>) {
        for child in &self.children {
            if !(child.is_processed() && child.is_ok()) {
                continue;
            }
            match child.condition() {
                Some(node) => node.collect(events),
                None => events.push(child.clone()),
            }
            if self.quantifier == Quantifier::AnyOf {
                break;
            }
        }
    }
}

/// Creates a condition event and registers it with its children.
pub(crate) fn build(
    scheduler: &Scheduler,
    id: String,
    quantifier: Quantifier,
    children: Vec<Event>,
) -> Result<Event, SchedulingError> {
    // Fail early rather than leave a condition that can never be scheduled.
    scheduler.core()?;

    let node = Rc::new(ConditionNode {
        quantifier,
        state: RefCell::new(ConditionState {
            keys: vec![None; children.len()],
            ok_count: 0,
            processed_count: 0,
            first_failure: None,
            is_cancelled: false,
        }),
        children,
    });
    let event = Event::new(id, scheduler.clone(), EventKind::Condition(node.clone()));

    if node.children.is_empty() {
        event.resolve(
            Outcome::Ok(Some(Value::new(ConditionValue::default()))),
            Priority::Normal,
            0,
        )?;

        return Ok(event);
    }

    let weak_condition = event.downgrade();
    for (idx, child) in node.children.iter().enumerate() {
        if event.is_triggered() {
            break;
        }
        let weak_condition = weak_condition.clone();
        let key = child.add_callback(move |child| {
            if let Some(condition) = weak_condition.upgrade() {
                check(&condition, idx, child);
            }
        });
        if let Some(slot) = node.state.borrow_mut().keys.get_mut(idx) {
            *slot = key;
        }
    }
    Ok(event)
}

/// Evaluates a condition after one of its children was processed.
fn check(condition: &Event, idx: usize, child: &Event) {
    let Some(node) = condition.condition() else {
        return;
    };
    if condition.is_triggered() {
        return;
    }

    let verdict = {
        let mut state = node.state.borrow_mut();
        if state.is_cancelled {
            return;
        }
        if let Some(key) = state.keys.get_mut(idx) {
            *key = None;
        }
        state.processed_count += 1;
        if child.is_ok() {
            state.ok_count += 1;
        } else {
            child.defuse();
            if state.first_failure.is_none() {
                state.first_failure = child.cause();
            }
        }

        if node
            .quantifier
            .is_satisfied(state.ok_count, node.children.len())
        {
            Some(Ok(()))
        } else if state.processed_count == node.children.len() {
            Some(Err(state
                .first_failure
                .clone()
                .unwrap_or_else(|| Value::new(()))))
        } else {
            None
        }
    };

    let result = match verdict {
        None => return,
        Some(Ok(())) => {
            let mut events = Vec::new();
            node.collect(&mut events);
            node.detach();

            condition.resolve(
                Outcome::Ok(Some(Value::new(ConditionValue { events }))),
                Priority::Normal,
                0,
            )
        }
        Some(Err(cause)) => {
            node.detach();
            node.cancel_children();

            condition.resolve(Outcome::Failed(cause), Priority::Normal, 0)
        }
    };

    // Scheduling only fails once the environment is shutting down.
    if let Err(_e) = result {
        #[cfg(feature = "tracing")]
        tracing::debug!(condition = condition.id(), error = %_e, "condition not scheduled");
    }
}

/// The value of a successful condition.
#[derive(Clone, Default)]
pub struct ConditionValue {
    events: Vec<Event>,
}

impl ConditionValue {
    /// Returns the number of succeeded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if no event is listed.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Returns `true` if the event is listed.
    pub fn contains(&self, event: &Event) -> bool {
        self.events.iter().any(|e| e.ptr_eq(event))
    }

    /// Returns the value of a listed event.
    pub fn get(&self, event: &Event) -> Option<Value> {
        self.events
            .iter()
            .find(|e| e.ptr_eq(event))
            .and_then(Event::value)
    }

    /// Returns an iterator over the listed events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Returns the listed events.
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

impl fmt::Debug for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.events.iter().map(Event::id))
            .finish()
    }
}

impl Event {
    /// Returns the quantifier of a condition event.
    pub fn quantifier(&self) -> Option<Quantifier> {
        self.condition().map(|node| node.quantifier)
    }

    /// Returns the value of a successful condition event.
    pub fn condition_value(&self) -> Option<ConditionValue> {
        self.value_as::<ConditionValue>()
    }

    /// Creates a condition that succeeds once both events succeed.
    ///
    /// If both events are all-of conditions, the new condition takes over
    /// their children instead of nesting them.
    pub fn and(&self, id: impl Into<String>, other: &Event) -> Result<Event, SchedulingError> {
        self.combine(id.into(), Quantifier::AllOf, other)
    }

    /// Creates a condition that succeeds as soon as either event succeeds.
    ///
    /// If both events are any-of conditions, the new condition takes over
    /// their children instead of nesting them.
    pub fn or(&self, id: impl Into<String>, other: &Event) -> Result<Event, SchedulingError> {
        self.combine(id.into(), Quantifier::AnyOf, other)
    }

    /// Permanently disables a pending condition and its pending child
    /// conditions.
    ///
    /// Returns `false` if the event is not a condition or was already
    /// triggered.
    pub fn cancel(&self) -> bool {
        match self.condition() {
            Some(node) if !self.is_triggered() => {
                node.cancel();
                true
            }
            _ => false,
        }
    }

    fn combine(
        &self,
        id: String,
        quantifier: Quantifier,
        other: &Event,
    ) -> Result<Event, SchedulingError> {
        let children = match (self.condition(), other.condition()) {
            (Some(a), Some(b)) if a.quantifier == quantifier && b.quantifier == quantifier => {
                a.children.iter().chain(&b.children).cloned().collect()
            }
            _ => vec![self.clone(), other.clone()],
        };

        build(self.scheduler(), id, quantifier, children)
    }
}
