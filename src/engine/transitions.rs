//! Delivery lifecycle state machine.
//!
//! Every legal move lives in [`TRANSITIONS`]; nothing else in the crate decides
//! whether a status may follow another. [`apply`] validates the whole request
//! before touching the delivery, so a refused transition leaves it unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::delivery::{set_once, Delivery, DeliveryEvent, DeliveryStatus, ProofOfDelivery};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Assign,
    Accept,
    Reject,
    PickUp,
    StartTransit,
    Arrive,
    Deliver,
    Complete,
    Cancel,
}

impl Transition {
    pub const ALL: [Transition; 9] = [
        Transition::Assign,
        Transition::Accept,
        Transition::Reject,
        Transition::PickUp,
        Transition::StartTransit,
        Transition::Arrive,
        Transition::Deliver,
        Transition::Complete,
        Transition::Cancel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Assign => "assign",
            Transition::Accept => "accept",
            Transition::Reject => "reject",
            Transition::PickUp => "pick_up",
            Transition::StartTransit => "start_transit",
            Transition::Arrive => "arrive",
            Transition::Deliver => "deliver",
            Transition::Complete => "complete",
            Transition::Cancel => "cancel",
        }
    }

    fn event(self) -> DeliveryEvent {
        match self {
            Transition::Assign => DeliveryEvent::Assigned,
            Transition::Accept => DeliveryEvent::Accepted,
            Transition::Reject => DeliveryEvent::Rejected,
            Transition::PickUp => DeliveryEvent::PickedUp,
            Transition::StartTransit => DeliveryEvent::InTransit,
            Transition::Arrive => DeliveryEvent::Arrived,
            Transition::Deliver | Transition::Complete => DeliveryEvent::Delivered,
            Transition::Cancel => DeliveryEvent::Cancelled,
        }
    }
}

use DeliveryStatus::{
    Accepted, Arrived, Assigned, Cancelled, Delivered, InTransit, Pending, PickedUp,
};

/// `(from, transition, to)` adjacency of the lifecycle.
pub const TRANSITIONS: &[(DeliveryStatus, Transition, DeliveryStatus)] = &[
    (Pending, Transition::Assign, Assigned),
    (Assigned, Transition::Accept, Accepted),
    (Assigned, Transition::Reject, Pending),
    (Accepted, Transition::Reject, Pending),
    (Accepted, Transition::PickUp, PickedUp),
    (PickedUp, Transition::StartTransit, InTransit),
    (InTransit, Transition::Arrive, Arrived),
    (Arrived, Transition::Deliver, Delivered),
    (PickedUp, Transition::Complete, Delivered),
    (InTransit, Transition::Complete, Delivered),
    (Arrived, Transition::Complete, Delivered),
    (Pending, Transition::Cancel, Cancelled),
    (Assigned, Transition::Cancel, Cancelled),
    (Accepted, Transition::Cancel, Cancelled),
    (PickedUp, Transition::Cancel, Cancelled),
    (InTransit, Transition::Cancel, Cancelled),
    (Arrived, Transition::Cancel, Cancelled),
];

pub fn next_status(from: DeliveryStatus, transition: Transition) -> Option<DeliveryStatus> {
    TRANSITIONS
        .iter()
        .find(|(source, candidate, _)| *source == from && *candidate == transition)
        .map(|(_, _, target)| *target)
}

/// Transition behind the generic "set status" action. Statuses that need a
/// dedicated action (assign, accept, cancel, …) have none.
pub fn transition_to(target: DeliveryStatus) -> Option<Transition> {
    match target {
        PickedUp => Some(Transition::PickUp),
        InTransit => Some(Transition::StartTransit),
        Arrived => Some(Transition::Arrive),
        Delivered => Some(Transition::Deliver),
        Pending | Assigned | Accepted | Cancelled => None,
    }
}

/// Extra data a transition may carry.
#[derive(Debug, Clone, Default)]
pub struct TransitionInput {
    pub driver_id: Option<Uuid>,
    pub note: Option<String>,
    pub proof: Option<ProofOfDelivery>,
}

impl TransitionInput {
    pub fn note(note: Option<String>) -> Self {
        Self {
            note,
            ..Default::default()
        }
    }
}

pub fn refused(delivery: &Delivery, transition: Transition) -> AppError {
    let reason = match (delivery.status, transition) {
        (Delivered, Transition::Cancel) => "a delivered delivery cannot be cancelled".to_string(),
        (Cancelled, _) => "delivery is cancelled".to_string(),
        (Assigned, Transition::Assign) => match delivery.driver_id {
            Some(driver) => format!("delivery already has driver {driver} assigned"),
            None => "delivery is already assigned".to_string(),
        },
        (from, transition) => format!("cannot {} a delivery that is {from}", transition.as_str()),
    };
    AppError::Conflict(format!("delivery {}: {reason}", delivery.id))
}

/// Applies `transition` to `delivery`, returning the new status.
pub fn apply(
    delivery: &mut Delivery,
    transition: Transition,
    input: TransitionInput,
    at: DateTime<Utc>,
) -> AppResult<DeliveryStatus> {
    let target = next_status(delivery.status, transition).ok_or_else(|| refused(delivery, transition))?;

    let note = input.note.map(|note| note.trim().to_string()).filter(|note| !note.is_empty());

    match transition {
        Transition::Assign if input.driver_id.is_none() => {
            return Err(AppError::InvalidInput("assign requires a driver".to_string()));
        }
        Transition::Complete if !input.proof.as_ref().is_some_and(ProofOfDelivery::is_present) => {
            return Err(AppError::InvalidInput(
                "proof of delivery needs a signature or a photo".to_string(),
            ));
        }
        Transition::Cancel if note.is_none() => {
            return Err(AppError::InvalidInput(
                "a cancellation reason is required".to_string(),
            ));
        }
        _ => {}
    }

    match transition {
        Transition::Assign => {
            delivery.driver_id = input.driver_id;
            delivery.assigned_at = Some(at);
        }
        Transition::Accept => {
            delivery.accepted_at = Some(at);
        }
        Transition::Reject => {
            delivery.driver_id = None;
            delivery.assigned_at = None;
            delivery.accepted_at = None;
        }
        Transition::PickUp => {
            set_once(&mut delivery.picked_up_at, at);
        }
        Transition::StartTransit => {}
        Transition::Arrive => {
            set_once(&mut delivery.arrived_at_customer_at, at);
        }
        Transition::Deliver | Transition::Complete => {
            set_once(&mut delivery.actual_delivery_time, at);
            if input.proof.is_some() {
                delivery.proof_of_delivery = input.proof;
            }
        }
        Transition::Cancel => {
            delivery.cancel_reason = note.clone();
            delivery.cancelled_at = Some(at);
            delivery.driver_id = None;
        }
    }

    delivery.status = target;
    delivery.record(transition.event(), note, at);
    Ok(target)
}

/// Records the first geofence hit at the pickup while the driver is heading there.
pub fn mark_arrived_at_restaurant(delivery: &mut Delivery, at: DateTime<Utc>) -> bool {
    if delivery.status != Accepted || !set_once(&mut delivery.arrived_at_restaurant_at, at) {
        return false;
    }
    delivery.record(DeliveryEvent::ArrivedAtRestaurant, None, at);
    true
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{apply, next_status, transition_to, Transition, TransitionInput, TRANSITIONS};
    use crate::models::delivery::{
        Address, Delivery, DeliveryEvent, DeliveryStatus, ProofOfDelivery,
    };
    use crate::models::driver::GeoPoint;

    fn address() -> Address {
        Address {
            street: "Canal St 4".to_string(),
            city: Some("Amsterdam".to_string()),
            postal_code: None,
            location: GeoPoint {
                lat: 52.37,
                lng: 4.89,
            },
        }
    }

    fn delivery(status: DeliveryStatus) -> Delivery {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Delivery {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            restaurant_id: Uuid::new_v4(),
            pickup: address(),
            destination: address(),
            status,
            driver_id: Some(Uuid::from_u128(9)),
            status_history: Vec::new(),
            location_history: Vec::new(),
            estimated_distance_km: 0.0,
            estimated_duration_minutes: 0,
            delivery_fee: 0.0,
            instructions: None,
            assigned_at: None,
            accepted_at: None,
            picked_up_at: None,
            arrived_at_restaurant_at: None,
            arrived_at_customer_at: None,
            actual_delivery_time: None,
            cancelled_at: None,
            proof_of_delivery: None,
            tracking_code: "DLV-TEST".to_string(),
            customer_rating: None,
            customer_feedback: None,
            tip_amount: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    fn full_input() -> TransitionInput {
        TransitionInput {
            driver_id: Some(Uuid::from_u128(42)),
            note: Some("customer moved".to_string()),
            proof: Some(ProofOfDelivery {
                signature: Some("sig".to_string()),
                ..Default::default()
            }),
        }
    }

    fn expected(from: DeliveryStatus, transition: Transition) -> Option<DeliveryStatus> {
        use DeliveryStatus::*;
        match (from, transition) {
            (Pending, Transition::Assign) => Some(Assigned),
            (Assigned, Transition::Accept) => Some(Accepted),
            (Assigned | Accepted, Transition::Reject) => Some(Pending),
            (Accepted, Transition::PickUp) => Some(PickedUp),
            (PickedUp, Transition::StartTransit) => Some(InTransit),
            (InTransit, Transition::Arrive) => Some(Arrived),
            (Arrived, Transition::Deliver) => Some(Delivered),
            (PickedUp | InTransit | Arrived, Transition::Complete) => Some(Delivered),
            (Delivered | Cancelled, Transition::Cancel) => None,
            (_, Transition::Cancel) => Some(Cancelled),
            _ => None,
        }
    }

    #[test]
    fn table_matches_lifecycle_for_every_pair() {
        for from in DeliveryStatus::ALL {
            for transition in Transition::ALL {
                assert_eq!(
                    next_status(from, transition),
                    expected(from, transition),
                    "{from} / {}",
                    transition.as_str()
                );
            }
        }
    }

    #[test]
    fn table_has_no_duplicate_edges() {
        for (index, (from, transition, _)) in TRANSITIONS.iter().enumerate() {
            let duplicates = TRANSITIONS[index + 1..]
                .iter()
                .filter(|(f, t, _)| f == from && t == transition)
                .count();
            assert_eq!(duplicates, 0);
        }
    }

    #[test]
    fn refused_transitions_leave_delivery_untouched() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        for from in DeliveryStatus::ALL {
            for transition in Transition::ALL {
                if expected(from, transition).is_some() {
                    continue;
                }
                let mut subject = delivery(from);
                let before = serde_json::to_value(&subject).unwrap();

                assert!(apply(&mut subject, transition, full_input(), at).is_err());
                assert_eq!(serde_json::to_value(&subject).unwrap(), before);
            }
        }
    }

    #[test]
    fn pending_cannot_jump_to_delivered() {
        let mut subject = delivery(DeliveryStatus::Pending);
        let transition = transition_to(DeliveryStatus::Delivered).unwrap();
        assert!(apply(&mut subject, transition, TransitionInput::default(), Utc::now()).is_err());
        assert_eq!(subject.status, DeliveryStatus::Pending);
    }

    #[test]
    fn generic_updates_only_cover_driver_milestones() {
        assert_eq!(transition_to(DeliveryStatus::PickedUp), Some(Transition::PickUp));
        assert_eq!(transition_to(DeliveryStatus::Assigned), None);
        assert_eq!(transition_to(DeliveryStatus::Cancelled), None);
    }

    #[test]
    fn cancel_requires_reason_and_clears_driver() {
        let mut subject = delivery(DeliveryStatus::InTransit);
        let at = Utc::now();
        assert!(apply(&mut subject, Transition::Cancel, TransitionInput::note(Some("  ".into())), at).is_err());
        assert_eq!(subject.status, DeliveryStatus::InTransit);

        apply(
            &mut subject,
            Transition::Cancel,
            TransitionInput::note(Some("restaurant closed".into())),
            at,
        )
        .unwrap();
        assert_eq!(subject.status, DeliveryStatus::Cancelled);
        assert_eq!(subject.cancel_reason.as_deref(), Some("restaurant closed"));
        assert!(subject.driver_id.is_none());
        assert_eq!(subject.status_history.last().unwrap().event, DeliveryEvent::Cancelled);
    }

    #[test]
    fn complete_requires_proof() {
        let mut subject = delivery(DeliveryStatus::InTransit);
        assert!(apply(&mut subject, Transition::Complete, TransitionInput::default(), Utc::now()).is_err());

        apply(&mut subject, Transition::Complete, full_input(), Utc::now()).unwrap();
        assert_eq!(subject.status, DeliveryStatus::Delivered);
        assert!(subject.actual_delivery_time.is_some());
        assert!(subject.proof_of_delivery.is_some());
    }

    #[test]
    fn arrival_timestamp_is_set_once() {
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let mut subject = delivery(DeliveryStatus::InTransit);
        subject.arrived_at_customer_at = Some(first);

        apply(&mut subject, Transition::Arrive, TransitionInput::default(), first + Duration::minutes(1)).unwrap();
        assert_eq!(subject.arrived_at_customer_at, Some(first));
    }

    #[test]
    fn restaurant_arrival_only_while_heading_to_pickup() {
        let at = Utc::now();
        let mut accepted = delivery(DeliveryStatus::Accepted);
        assert!(super::mark_arrived_at_restaurant(&mut accepted, at));
        assert!(!super::mark_arrived_at_restaurant(&mut accepted, at));
        assert_eq!(accepted.status, DeliveryStatus::Accepted);

        let mut picked = delivery(DeliveryStatus::PickedUp);
        assert!(!super::mark_arrived_at_restaurant(&mut picked, at));
    }
}
