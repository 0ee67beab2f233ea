use crate::error::CoreError;
use crate::models::order::OrderPhase;
use crate::models::user::Actor;

/// Forward edges of the fulfillment pipeline. `Cancelled` and
/// `Rejected` are additionally reachable from any non-terminal phase.
fn forward_edge(from: OrderPhase, to: OrderPhase) -> bool {
    use OrderPhase::*;
    matches!(
        (from, to),
        (Pending, Accepted)
            | (Accepted, Preparing)
            | (Preparing, ReadyForPickup)
            | (ReadyForPickup, AssignedDriver)
            | (ReadyForPickup, DriverAccepted)
            | (AssignedDriver, DriverAccepted)
            | (DriverAccepted, PickedUp)
            | (PickedUp, Delivering)
            | (Delivering, Delivered)
    )
}

pub fn edge_exists(from: OrderPhase, to: OrderPhase) -> bool {
    if from.is_terminal() {
        return false;
    }
    forward_edge(from, to) || matches!(to, OrderPhase::Cancelled | OrderPhase::Rejected)
}

/// Once the driver holds the food, the restaurant can no longer reject.
fn driver_holds(from: OrderPhase) -> bool {
    matches!(from, OrderPhase::PickedUp | OrderPhase::Delivering)
}

fn actor_owns(actor: Actor, from: OrderPhase, to: OrderPhase) -> bool {
    use OrderPhase::*;
    match actor {
        Actor::Admin => true,
        Actor::Restaurant => {
            matches!(
                (from, to),
                (Pending, Accepted) | (Accepted, Preparing) | (Preparing, ReadyForPickup)
            ) || (to == Rejected && !driver_holds(from))
        }
        Actor::Driver => matches!(
            (from, to),
            (ReadyForPickup, AssignedDriver)
                | (ReadyForPickup, DriverAccepted)
                | (AssignedDriver, DriverAccepted)
                | (DriverAccepted, PickedUp)
                | (PickedUp, Delivering)
                | (Delivering, Delivered)
        ),
        Actor::Customer => to == Cancelled,
    }
}

/// Validates one transition request against the edge table. Errors
/// carry enough context for the actor-facing message; callers must not
/// have mutated anything before this check passes.
pub fn check(actor: Actor, from: OrderPhase, to: OrderPhase) -> Result<(), CoreError> {
    if !edge_exists(from, to) {
        return Err(CoreError::InvalidTransition { from, to });
    }
    if !actor_owns(actor, from, to) {
        return Err(CoreError::ActorNotAuthorized { actor, from, to });
    }
    Ok(())
}
