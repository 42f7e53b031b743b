//! Single-game Glicko-2 rating update.
//!
//! One decisive game between two players, no draws and no volatility
//! iteration: each side's expectation is the logistic curve scaled by
//! the opponent's deviation-derived precision, the deviation shrinks by
//! the information the game carried, and the rating moves by the scaled
//! surprise. Pure: callers persist the result.

use crate::{DEFAULT_RATING, RD_FLOOR};

/// Conversion between display ratings and the internal Glicko-2 scale.
const GLICKO_SCALE: f64 = 173.7178;

/// A (rating, deviation) pair on the display scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glicko {
    pub rating: f64,
    pub rd: f64,
}

impl Default for Glicko {
    fn default() -> Self {
        Self {
            rating: DEFAULT_RATING,
            rd: crate::DEFAULT_RD,
        }
    }
}

impl Glicko {
    pub fn new(rating: f64, rd: f64) -> Self {
        Self { rating, rd }
    }
}

/// Precision weight of an opponent with internal deviation `phi`.
fn g(phi: f64) -> f64 {
    1.0 / (1.0 + 3.0 * phi * phi / (std::f64::consts::PI * std::f64::consts::PI)).sqrt()
}

/// Expected score of `mu` against an opponent at `mu_opp` with
/// deviation `phi_opp`, all on the internal scale.
fn expected(mu: f64, mu_opp: f64, phi_opp: f64) -> f64 {
    1.0 / (1.0 + (-g(phi_opp) * (mu - mu_opp)).exp())
}

/// One side's post-game values given its outcome (1.0 win, 0.0 loss).
fn update_side(mu: f64, phi: f64, mu_opp: f64, phi_opp: f64, score: f64) -> (f64, f64) {
    let e = expected(mu, mu_opp, phi_opp);
    let variance = 1.0 / (g(phi_opp).powi(2) * e * (1.0 - e));
    let new_phi = 1.0 / (1.0 / (phi * phi) + 1.0 / variance).sqrt();
    let new_mu = mu + new_phi * new_phi * g(phi_opp) * (score - e);
    (new_mu, new_phi)
}

/// Rates one decisive game. Returns the post-game (winner, loser)
/// pairs; each deviation is clamped to the floor of 30.
pub fn rate_duel(winner: Glicko, loser: Glicko) -> (Glicko, Glicko) {
    let (mu_w, phi_w) = (
        (winner.rating - DEFAULT_RATING) / GLICKO_SCALE,
        winner.rd / GLICKO_SCALE,
    );
    let (mu_l, phi_l) = (
        (loser.rating - DEFAULT_RATING) / GLICKO_SCALE,
        loser.rd / GLICKO_SCALE,
    );

    let (new_mu_w, new_phi_w) = update_side(mu_w, phi_w, mu_l, phi_l, 1.0);
    let (new_mu_l, new_phi_l) = update_side(mu_l, phi_l, mu_w, phi_w, 0.0);

    (
        Glicko {
            rating: DEFAULT_RATING + GLICKO_SCALE * new_mu_w,
            rd: (GLICKO_SCALE * new_phi_w).max(RD_FLOOR),
        },
        Glicko {
            rating: DEFAULT_RATING + GLICKO_SCALE * new_mu_l,
            rd: (GLICKO_SCALE * new_phi_l).max(RD_FLOOR),
        },
    )
}
