//! Leaderboard and standings functionality
//!
//! This module tracks the points earned by players across the questions of a
//! session and produces the ranked standings shown between questions and at
//! game over. Ranking is deterministic: descending by total score, with ties
//! broken by join order (a stable sort over the roster's insertion order).

use std::collections::HashMap;

use serde::Serialize;

use super::watcher::Id;

/// Score information for a single player
///
/// Contains the player's current total and their position in the standings,
/// sent to players so they can see their own performance.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ScoreMessage {
    /// Total points earned by the player
    pub points: u64,
    /// Current position in the standings (1-indexed)
    pub position: usize,
}

/// Tracks points earned per question and cumulative totals
///
/// The leaderboard never forgets a player: once points are recorded for an
/// id, the id stays ranked even if the player disconnects.
#[derive(Debug, Default)]
pub struct Leaderboard {
    /// Points earned by each player for each question, in question order
    points_by_question: Vec<Vec<(Id, u64)>>,
    /// Cumulative totals per player
    totals: HashMap<Id, u64>,
}

impl Leaderboard {
    /// Records the scores of one closed question and folds them into totals
    ///
    /// `scores` holds one entry per roster player, including zero entries for
    /// players who did not answer, so breakdowns stay aligned with question
    /// indices.
    pub fn record_question(&mut self, scores: Vec<(Id, u64)>) {
        for (id, points) in &scores {
            *self.totals.entry(*id).or_default() += points;
        }
        self.points_by_question.push(scores);
    }

    /// Returns the number of questions recorded so far
    pub fn questions_recorded(&self) -> usize {
        self.points_by_question.len()
    }

    /// Returns a player's cumulative total
    pub fn total(&self, id: Id) -> u64 {
        self.totals.get(&id).copied().unwrap_or_default()
    }

    /// Returns the points a player earned on each recorded question
    ///
    /// Questions for which the player has no entry contribute zero, so the
    /// returned vector always has one slot per recorded question.
    pub fn points_breakdown(&self, id: Id) -> Vec<u64> {
        self.points_by_question
            .iter()
            .map(|scores| {
                scores
                    .iter()
                    .find(|(entry, _)| *entry == id)
                    .map_or(0, |(_, points)| *points)
            })
            .collect()
    }

    /// Ranks the given players by total score
    ///
    /// `join_order` must iterate the roster in join order; equal scores keep
    /// that order, making the ranking deterministic and replayable.
    pub fn ranked(&self, join_order: impl Iterator<Item = Id>) -> Vec<(Id, u64)> {
        let mut standings: Vec<(Id, u64)> =
            join_order.map(|id| (id, self.total(id))).collect();
        standings.sort_by(|(_, a), (_, b)| b.cmp(a));
        standings
    }

    /// Returns a player's total and 1-indexed position in the standings
    pub fn score(&self, id: Id, join_order: impl Iterator<Item = Id>) -> Option<ScoreMessage> {
        self.ranked(join_order)
            .iter()
            .position(|(entry, _)| *entry == id)
            .map(|index| ScoreMessage {
                points: self.total(id),
                position: index + 1,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate_across_questions() {
        let mut leaderboard = Leaderboard::default();
        let player = Id::new();

        leaderboard.record_question(vec![(player, 600)]);
        leaderboard.record_question(vec![(player, 400)]);

        assert_eq!(leaderboard.total(player), 1000);
        assert_eq!(leaderboard.questions_recorded(), 2);
    }

    #[test]
    fn test_ranking_is_descending_by_score() {
        let mut leaderboard = Leaderboard::default();
        let first = Id::new();
        let second = Id::new();
        let third = Id::new();

        leaderboard.record_question(vec![(first, 1000), (second, 500), (third, 0)]);

        let ranked = leaderboard.ranked([third, second, first].into_iter());
        assert_eq!(ranked, vec![(first, 1000), (second, 500), (third, 0)]);
    }

    #[test]
    fn test_ties_keep_join_order() {
        let mut leaderboard = Leaderboard::default();
        let early = Id::new();
        let late = Id::new();

        leaderboard.record_question(vec![(early, 500), (late, 500)]);

        let ranked = leaderboard.ranked([early, late].into_iter());
        assert_eq!(ranked, vec![(early, 500), (late, 500)]);

        // Re-running with identical inputs yields identical ordering.
        assert_eq!(ranked, leaderboard.ranked([early, late].into_iter()));
    }

    #[test]
    fn test_unrecorded_player_ranks_with_zero() {
        let mut leaderboard = Leaderboard::default();
        let scorer = Id::new();
        let silent = Id::new();

        leaderboard.record_question(vec![(scorer, 250)]);

        let ranked = leaderboard.ranked([scorer, silent].into_iter());
        assert_eq!(ranked, vec![(scorer, 250), (silent, 0)]);
    }

    #[test]
    fn test_points_breakdown_pads_missing_questions() {
        let mut leaderboard = Leaderboard::default();
        let player = Id::new();
        let other = Id::new();

        leaderboard.record_question(vec![(other, 100)]);
        leaderboard.record_question(vec![(player, 300), (other, 100)]);

        assert_eq!(leaderboard.points_breakdown(player), vec![0, 300]);
    }

    #[test]
    fn test_score_positions_are_one_indexed() {
        let mut leaderboard = Leaderboard::default();
        let first = Id::new();
        let second = Id::new();

        leaderboard.record_question(vec![(first, 800), (second, 300)]);

        let join_order = [first, second];
        assert_eq!(
            leaderboard.score(second, join_order.into_iter()),
            Some(ScoreMessage {
                points: 300,
                position: 2
            })
        );
        assert_eq!(leaderboard.score(Id::new(), join_order.into_iter()), None);
    }
}
