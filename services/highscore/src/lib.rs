pub mod api;
pub mod feed;
pub mod importer;
pub mod transport;
#[cfg(feature = "async-transport")]
pub mod transport_axum;

use std::collections::HashMap;

use ranking::LEADERBOARD_TOP_K;
use schema::{Entry, LeaderboardId, Submission, validate};
use store::{LeaderboardStore, StoreError};

use crate::api::{ListResponse, SubmissionOutcome};

pub const LIST_PARAM: &str = "highScoreList";
pub const ADD_OLD_ENTRIES_PARAM: &str = "addOldEntries";
pub const MISSING_LIST_MESSAGE: &str = "You need to pick a high score list";
pub const OLD_ENTRIES_ADDED_MESSAGE: &str = "The old high score entries have been added";

pub fn unknown_list_message(list: &str) -> String {
    format!("The high score list {list} does not exist")
}

/// Validates and stores a submission when one is present, then reads the
/// current top of the list. A rejected submission still yields the list.
pub fn submit_and_list(
    store: &dyn LeaderboardStore,
    leaderboard: LeaderboardId,
    params: &HashMap<String, String>,
) -> Result<ListResponse, StoreError> {
    let submission = match validate(leaderboard, params) {
        Ok(Submission::Entry(entry)) => {
            tracing::debug!(list = %leaderboard, score = entry.score(), "storing entry");
            store.insert(entry)?;
            SubmissionOutcome::Accepted
        }
        Ok(Submission::ViewOnly) => SubmissionOutcome::ViewOnly,
        Err(err) => {
            tracing::warn!(list = %leaderboard, error = %err, "discarding submission");
            SubmissionOutcome::Rejected(err)
        }
    };
    let entries = store.top_k(leaderboard, LEADERBOARD_TOP_K)?;
    Ok(ListResponse {
        leaderboard,
        submission,
        entries,
    })
}

/// One line per entry, each terminated by a newline.
pub fn render_entries(entries: &[Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.render_line());
        out.push('\n');
    }
    out
}
