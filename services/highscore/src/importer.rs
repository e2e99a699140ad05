use std::collections::HashMap;

use schema::{LeaderboardId, Submission, ValidationError, validate};
use store::{LeaderboardStore, StoreError};
use thiserror::Error;

use crate::{api::LegacyImportSummary, feed::FeedSource};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportReport {
    pub list: Option<String>,
    pub inserted: usize,
    pub stopped_at_unrecognized_list: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("line {line}: {list} row has {actual} columns, expected {expected}")]
    MissingColumns {
        line: usize,
        list: String,
        expected: usize,
        actual: usize,
    },
    #[error("line {line}: {source}")]
    Validation {
        line: usize,
        #[source]
        source: ValidationError,
    },
    #[error("line {line}: {source}")]
    Store {
        line: usize,
        #[source]
        source: StoreError,
    },
}

/// A feed that aborted part way. Rows stored before the fault stay stored.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error} ({} entries stored before the fault)", .report.inserted)]
pub struct ImportFault {
    pub report: ImportReport,
    pub error: ImportError,
}

#[derive(Debug, Clone, Copy)]
enum ImportState {
    AwaitingListHeader,
    ConsumingEntries(LeaderboardId),
}

/// Header line, then one comma-separated row per entry in schema order.
/// There is no block terminator: a later header is read as a row.
pub fn import_feed(store: &dyn LeaderboardStore, feed: &str) -> Result<ImportReport, ImportFault> {
    let mut report = ImportReport::default();
    let mut state = ImportState::AwaitingListHeader;

    for (index, line) in feed.lines().enumerate() {
        let line_number = index + 1;
        match state {
            ImportState::AwaitingListHeader => {
                report.list = Some(line.to_string());
                let Some(leaderboard) =
                    LeaderboardId::parse(line).filter(|id| id.accepts_legacy_import())
                else {
                    tracing::warn!(
                        list = line,
                        line = line_number,
                        "feed list is not importable, dropping remaining rows"
                    );
                    report.stopped_at_unrecognized_list = true;
                    break;
                };
                state = ImportState::ConsumingEntries(leaderboard);
            }
            ImportState::ConsumingEntries(leaderboard) => {
                if let Err(error) = import_row(store, leaderboard, line, line_number) {
                    return Err(ImportFault { report, error });
                }
                report.inserted += 1;
            }
        }
    }

    Ok(report)
}

fn import_row(
    store: &dyn LeaderboardStore,
    leaderboard: LeaderboardId,
    line: &str,
    line_number: usize,
) -> Result<(), ImportError> {
    let schema = leaderboard.schema();
    let mut columns: Vec<&str> = line.split(',').collect();
    while columns.last() == Some(&"") {
        columns.pop();
    }
    if columns.len() < schema.len() {
        return Err(ImportError::MissingColumns {
            line: line_number,
            list: leaderboard.to_string(),
            expected: schema.len(),
            actual: columns.len(),
        });
    }

    let raw: HashMap<String, String> = schema
        .field_names()
        .zip(columns)
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    let entry = match validate(leaderboard, &raw) {
        Ok(Submission::Entry(entry)) => entry,
        Ok(Submission::ViewOnly) => {
            return Err(ImportError::MissingColumns {
                line: line_number,
                list: leaderboard.to_string(),
                expected: schema.len(),
                actual: raw.len(),
            });
        }
        Err(source) => {
            return Err(ImportError::Validation {
                line: line_number,
                source,
            });
        }
    };
    store.insert(entry).map_err(|source| ImportError::Store {
        line: line_number,
        source,
    })
}

/// Fetches and imports every feed in `urls`. A fetch failure or fault only
/// ends the feed it happened in.
pub fn import_legacy_feeds(
    store: &dyn LeaderboardStore,
    source: &dyn FeedSource,
    urls: &[String],
) -> LegacyImportSummary {
    let mut summary = LegacyImportSummary::default();
    for url in urls {
        summary.feeds_attempted += 1;
        let feed = match source.fetch(url) {
            Ok(feed) => feed,
            Err(err) => {
                summary.feeds_failed += 1;
                tracing::warn!(url = %url, error = %err, "could not fetch legacy feed");
                continue;
            }
        };
        match import_feed(store, &feed) {
            Ok(report) => {
                summary.feeds_completed += 1;
                summary.entries_inserted += report.inserted;
                tracing::info!(
                    url = %url,
                    list = report.list.as_deref().unwrap_or_default(),
                    inserted = report.inserted,
                    stopped_at_unrecognized_list = report.stopped_at_unrecognized_list,
                    "imported legacy feed"
                );
            }
            Err(fault) => {
                summary.feeds_failed += 1;
                summary.entries_inserted += fault.report.inserted;
                tracing::warn!(url = %url, error = %fault, "legacy feed import aborted");
            }
        }
    }
    summary
}
