//! Scoring engine
//!
//! A pure translation from answer submissions to point awards, kept free of
//! session state so it can be unit-tested independently of the game state
//! machine. Full credit is awarded for an instant correct answer, decaying
//! linearly to zero credit at the deadline.

use std::time::Duration;

use crate::quiz::{ChoiceId, Question};

/// Computes the points awarded for an answer submission
///
/// Incorrect or absent choices score zero. A correct choice scores
/// `base_points` scaled by the fraction of the time limit still remaining at
/// submission, rounded to the nearest point. `elapsed` is clamped to
/// `[0, time_limit]`, so the result is always within `[0, base_points]`.
pub fn score(question: &Question, choice: Option<&ChoiceId>, elapsed: Duration) -> u64 {
    match choice {
        Some(choice) if *choice == question.correct_choice => {
            decayed_points(question.base_points, question.time_limit, elapsed)
        }
        _ => 0,
    }
}

/// Applies the linear time decay to a full point award
fn decayed_points(base_points: u64, time_limit: Duration, elapsed: Duration) -> u64 {
    let elapsed = elapsed.min(time_limit);
    let remaining = time_limit.saturating_sub(elapsed);
    let fraction = remaining.as_secs_f64() / time_limit.as_secs_f64();
    (base_points as f64 * fraction).round() as u64
}
