// Derived aggregates over a timeline snapshot: per-persona score averages,
// the ranking, and judge vote flows.
//
// Nothing here is cached. Every function recomputes from the event slice it
// is given, so aggregates can never drift from the timeline they describe.

use serde::Serialize;

use crate::event::{CanonicalEvent, ScoreEvent, Timestamp};
use crate::normalize::PANEL_JUDGE;
use crate::protocol::VoteSummary;

/// Default score at or above which a judge's score counts as an "aye".
pub const DEFAULT_VOTE_THRESHOLD: f64 = 7.0;

/// Average score for one persona.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreItem {
    pub persona: String,
    /// Mean of every score the persona received, rounded to 2 decimals.
    pub score: f64,
    /// Rationale of the chronologically last score in the group.
    pub rationale: Option<String>,
    /// Number of scores averaged.
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Aye,
    Nay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteBasis {
    /// Flows come from explicit head-to-head outcomes.
    Pairwise,
    /// Flows come from numeric scores compared against a threshold.
    Threshold,
}

/// One judge's vote for or against one persona.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeVoteFlow {
    pub persona: String,
    pub judge: String,
    /// The underlying score; absent for pairwise outcomes.
    pub score: Option<f64>,
    pub vote: Vote,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteFlow {
    pub basis: VoteBasis,
    pub records: Vec<JudgeVoteFlow>,
}

/// Everything the UI reads besides the raw event list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregates {
    pub scores: Vec<ScoreItem>,
    pub ranking: Vec<String>,
    pub flow: VoteFlow,
}

impl Aggregates {
    pub fn compute(events: &[CanonicalEvent], vote: Option<&VoteSummary>, threshold: f64) -> Self {
        let scores = aggregate_scores(events);
        let ranking = ranking(&scores, vote);
        let flow = judge_vote_flow(events, threshold);
        Aggregates {
            scores,
            ranking,
            flow,
        }
    }
}

fn score_events(events: &[CanonicalEvent]) -> impl Iterator<Item = &ScoreEvent> {
    events.iter().filter_map(|e| match e {
        CanonicalEvent::Score(s) => Some(s),
        _ => None,
    })
}

/// Group score events by persona and average them. Groups keep the order in
/// which each persona was first scored.
pub fn aggregate_scores(events: &[CanonicalEvent]) -> Vec<ScoreItem> {
    struct Group<'a> {
        persona: &'a str,
        sum: f64,
        count: usize,
        last: &'a ScoreEvent,
    }

    let mut groups: Vec<Group<'_>> = Vec::new();
    for score in score_events(events) {
        match groups.iter_mut().find(|g| g.persona == score.persona) {
            Some(group) => {
                group.sum += score.score;
                group.count += 1;
                // Ties on timestamp go to the later delivery.
                if score.at >= group.last.at {
                    group.last = score;
                }
            }
            None => groups.push(Group {
                persona: &score.persona,
                sum: score.score,
                count: 1,
                last: score,
            }),
        }
    }

    groups
        .into_iter()
        .map(|g| ScoreItem {
            persona: g.persona.to_string(),
            score: round2(g.sum / g.count as f64),
            rationale: g.last.rationale.clone(),
            count: g.count,
        })
        .collect()
}

/// Persona ranking, best first. An explicit external ranking wins verbatim;
/// otherwise personas are ordered by average score, descending, keeping
/// first-scored order among ties.
pub fn ranking(scores: &[ScoreItem], vote: Option<&VoteSummary>) -> Vec<String> {
    if let Some(vote) = vote.filter(|v| !v.ranking.is_empty()) {
        return vote.ranking.clone();
    }

    let mut ordered: Vec<&ScoreItem> = scores.iter().collect();
    ordered.sort_by(|a, b| b.score.total_cmp(&a.score));
    ordered.into_iter().map(|s| s.persona.clone()).collect()
}

/// Judge vote flow. Pairwise outcomes take precedence: if any exist, each one
/// is an "aye" for its winner and scores are ignored. Otherwise every score
/// becomes an "aye" or "nay" against `threshold`.
pub fn judge_vote_flow(events: &[CanonicalEvent], threshold: f64) -> VoteFlow {
    let pairwise: Vec<JudgeVoteFlow> = events
        .iter()
        .filter_map(|e| match e {
            CanonicalEvent::Pairwise(p) => Some(JudgeVoteFlow {
                persona: p.winner.clone(),
                judge: p.judge.clone().unwrap_or_else(|| PANEL_JUDGE.to_string()),
                score: None,
                vote: Vote::Aye,
                at: p.at,
            }),
            _ => None,
        })
        .collect();

    if !pairwise.is_empty() {
        return VoteFlow {
            basis: VoteBasis::Pairwise,
            records: pairwise,
        };
    }

    let records = score_events(events)
        .map(|s| JudgeVoteFlow {
            persona: s.persona.clone(),
            judge: s.judge.clone(),
            score: Some(s.score),
            vote: if s.score >= threshold {
                Vote::Aye
            } else {
                Vote::Nay
            },
            at: s.at,
        })
        .collect();

    VoteFlow {
        basis: VoteBasis::Threshold,
        records,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
