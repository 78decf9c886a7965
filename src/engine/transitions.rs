use crate::models::delivery::DeliveryStatus;
use crate::models::delivery::DeliveryStatus::*;

/// Legal one-hop moves out of each status. Terminal states map to nothing.
pub fn allowed_next(from: DeliveryStatus) -> &'static [DeliveryStatus] {
    match from {
        Requested => &[Accepted, Cancelled],
        Accepted => &[PickingUp, PickedUp, Cancelled],
        PickingUp => &[PickedUp, Cancelled],
        PickedUp => &[InTransit],
        InTransit => &[Arrived, Delivered, Returned],
        Arrived => &[Delivered, Returned, Failed],
        Delivered | Returned | Failed | Cancelled => &[],
    }
}

pub fn can_transition(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    allowed_next(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::{allowed_next, can_transition};
    use crate::models::delivery::DeliveryStatus;
    use crate::models::delivery::DeliveryStatus::*;

    const LEGAL: &[(DeliveryStatus, DeliveryStatus)] = &[
        (Requested, Accepted),
        (Requested, Cancelled),
        (Accepted, PickingUp),
        (Accepted, PickedUp),
        (Accepted, Cancelled),
        (PickingUp, PickedUp),
        (PickingUp, Cancelled),
        (PickedUp, InTransit),
        (InTransit, Arrived),
        (InTransit, Delivered),
        (InTransit, Returned),
        (Arrived, Delivered),
        (Arrived, Returned),
        (Arrived, Failed),
    ];

    #[test]
    fn every_pair_matches_the_table() {
        for from in DeliveryStatus::ALL {
            for to in DeliveryStatus::ALL {
                let expected = LEGAL.contains(&(from, to));
                assert_eq!(can_transition(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in DeliveryStatus::ALL {
            if status.is_terminal() {
                assert!(allowed_next(status).is_empty(), "{status}");
            } else {
                assert!(!allowed_next(status).is_empty(), "{status}");
            }
        }
    }

    #[test]
    fn no_retreat_from_arrived_and_no_cancel_after_pickup() {
        assert!(!can_transition(Arrived, InTransit));
        assert!(!can_transition(PickedUp, Cancelled));
        assert!(!can_transition(Requested, Delivered));
    }
}
