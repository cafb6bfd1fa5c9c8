//! Final placement of a finished session

use std::cmp::Ordering;

use crate::game::{PlayerId, TankId};

/// One tank's end-of-match standing
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub tank_id: TankId,
    pub player_id: PlayerId,
    pub display_name: String,
    pub kills: u32,
    pub damage_dealt: f32,
    /// Still alive and seated when the match ended
    pub survived: bool,
    pub winner: bool,
    /// Position in the elimination order, departures included
    pub eliminated_order: Option<usize>,
}

/// Kills first, then survivors, then whoever was eliminated later, then
/// player id. A total order, so placements never depend on input order.
fn compare(a: &Standing, b: &Standing) -> Ordering {
    b.kills
        .cmp(&a.kills)
        .then_with(|| b.survived.cmp(&a.survived))
        .then_with(|| b.eliminated_order.cmp(&a.eliminated_order))
        .then_with(|| a.player_id.cmp(&b.player_id))
        .then_with(|| a.tank_id.cmp(&b.tank_id))
}

/// Rank standings, returning `(placement, standing)` with placement from 1
pub fn rank(mut standings: Vec<Standing>) -> Vec<(usize, Standing)> {
    standings.sort_by(compare);
    standings
        .into_iter()
        .enumerate()
        .map(|(i, s)| (i + 1, s))
        .collect()
}
