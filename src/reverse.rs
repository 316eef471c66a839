// reverse.rs — Reverse-Flip Handler.
//
// "Flatten opposite side, then open new side" as one logical action.
// Steps 2 and 3 are not atomic: a step-3 failure after a successful
// step-2 is reported as a partial outcome rather than folded into a
// plain failure, since the position state on the destination venue has
// already changed.

use uuid::Uuid;

use crate::error::MirrorError;
use crate::events::Side;
use crate::venue::DestinationVenue;

#[derive(Debug, Clone, PartialEq)]
pub enum ReverseFlipOutcome {
    /// Opposite side closed and the new side opened.
    Completed { closed_qty: f64, opened_qty: f64 },
    /// Step 2 (closing the opposite side) never succeeded.
    FailedToClose(String),
    /// Step 2 succeeded but step 3 (opening the new side) failed.
    ClosedButNotReopened { closed_qty: f64, reason: String },
}

pub async fn execute_reverse_flip(
    venue: &dyn DestinationVenue,
    symbol: &str,
    new_side: Side,
    new_side_quantity: f64,
) -> ReverseFlipOutcome {
    let opposite = new_side.opposite();

    let positions = match venue.query_positions(symbol).await {
        Ok(p) => p,
        Err(e) => return ReverseFlipOutcome::FailedToClose(e.to_string()),
    };
    let opposite_position = positions.into_iter().find(|p| p.side == opposite);

    let closed_qty = if let Some(pos) = opposite_position {
        match venue.close_position(symbol, opposite, None).await {
            Ok(result) => result.filled_qty,
            Err(e) => return ReverseFlipOutcome::FailedToClose(e.to_string()),
        }
    } else {
        0.0
    };

    if new_side_quantity <= 0.0 {
        return ReverseFlipOutcome::Completed {
            closed_qty,
            opened_qty: 0.0,
        };
    }

    let client_order_id = Uuid::new_v4().to_string();
    match venue
        .place_market_order(symbol, new_side, new_side_quantity, &client_order_id)
        .await
    {
        Ok(_) => ReverseFlipOutcome::Completed {
            closed_qty,
            opened_qty: new_side_quantity,
        },
        Err(e) => ReverseFlipOutcome::ClosedButNotReopened {
            closed_qty,
            reason: e.to_string(),
        },
    }
}

impl ReverseFlipOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReverseFlipOutcome::Completed { .. })
    }

    pub fn as_mirror_error(&self) -> Option<MirrorError> {
        match self {
            ReverseFlipOutcome::Completed { .. } => None,
            ReverseFlipOutcome::FailedToClose(reason) => Some(MirrorError::VenueTransient(reason.clone())),
            ReverseFlipOutcome::ClosedButNotReopened { reason, .. } => {
                Some(MirrorError::Internal(format!("reverse-flip partial outcome: {}", reason)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DestinationPosition;
    use crate::venue::SimVenue;

    #[tokio::test]
    async fn reverse_flip_closes_opposite_and_opens_new_side() {
        let venue = SimVenue::new();
        venue.seed_position(DestinationPosition {
            symbol: "ETHUSDT".into(),
            side: Side::Sell,
            size: 1.0,
            avg_price: 3000.0,
        });
        let outcome = execute_reverse_flip(&venue, "ETHUSDT", Side::Buy, 0.5).await;
        assert_eq!(
            outcome,
            ReverseFlipOutcome::Completed {
                closed_qty: 1.0,
                opened_qty: 0.5
            }
        );
        let positions = venue.query_positions("ETHUSDT").await.unwrap();
        assert!(positions.iter().all(|p| p.side != Side::Sell));
    }

    #[tokio::test]
    async fn no_opposite_position_skips_close_step() {
        let venue = SimVenue::new();
        let outcome = execute_reverse_flip(&venue, "ETHUSDT", Side::Buy, 0.5).await;
        assert_eq!(
            outcome,
            ReverseFlipOutcome::Completed {
                closed_qty: 0.0,
                opened_qty: 0.5
            }
        );
    }
}
