use schema::{Entry, LeaderboardId, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    ViewOnly,
    Rejected(ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    pub leaderboard: LeaderboardId,
    pub submission: SubmissionOutcome,
    pub entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegacyImportSummary {
    pub feeds_attempted: usize,
    pub feeds_completed: usize,
    pub feeds_failed: usize,
    pub entries_inserted: usize,
}
