use schema::Entry;

/// Number of entries returned for any leaderboard read.
pub const LEADERBOARD_TOP_K: usize = 25;

/// Equal scores rank by `sequence`, earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    pub sequence: u64,
    pub entry: Entry,
}

impl RankedEntry {
    pub fn score(&self) -> i64 {
        self.entry.score()
    }
}

/// New entries go after every entry with the same score.
pub fn insertion_index(ranked: &[RankedEntry], score: i64) -> usize {
    ranked.partition_point(|existing| existing.score() >= score)
}

pub fn top_k(ranked: &[RankedEntry], k: usize) -> Vec<Entry> {
    ranked
        .iter()
        .take(k)
        .map(|ranked| ranked.entry.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::{FieldValue, LeaderboardId};
    use std::cmp::Ordering;

    fn compare_ranked(a: &RankedEntry, b: &RankedEntry) -> Ordering {
        b.score()
            .cmp(&a.score())
            .then_with(|| a.sequence.cmp(&b.sequence))
    }

    fn is_ranked(ranked: &[RankedEntry]) -> bool {
        ranked
            .windows(2)
            .all(|pair| compare_ranked(&pair[0], &pair[1]) != Ordering::Greater)
    }

    fn ranked(sequence: u64, name: &str, score: i64) -> RankedEntry {
        let entry = Entry::from_values(
            LeaderboardId::parse("breakout").unwrap(),
            vec![
                FieldValue::Text(name.to_string()),
                FieldValue::Integer(score),
                FieldValue::Integer(1),
                FieldValue::Text("2024-01-01".to_string()),
            ],
        )
        .unwrap();
        RankedEntry { sequence, entry }
    }

    fn insert(board: &mut Vec<RankedEntry>, entry: RankedEntry) {
        let index = insertion_index(board, entry.score());
        board.insert(index, entry);
    }

    #[test]
    fn higher_score_ranks_first() {
        let low = ranked(0, "a", 10);
        let high = ranked(1, "b", 20);
        assert_eq!(compare_ranked(&high, &low), Ordering::Less);
        assert_eq!(compare_ranked(&low, &high), Ordering::Greater);
    }

    #[test]
    fn equal_scores_rank_earliest_insert_first() {
        let first = ranked(3, "first", 50);
        let second = ranked(7, "second", 50);
        assert_eq!(compare_ranked(&first, &second), Ordering::Less);
    }

    #[test]
    fn insertion_index_keeps_board_sorted_with_stable_ties() {
        let mut board = Vec::new();
        for (sequence, (name, score)) in [("a", 5), ("b", 9), ("c", 5), ("d", 1), ("e", 9)]
            .into_iter()
            .enumerate()
        {
            insert(&mut board, ranked(sequence as u64, name, score));
        }
        assert!(is_ranked(&board));
        let names: Vec<String> = board
            .iter()
            .map(|r| r.entry.get("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["b", "e", "a", "c", "d"]);
    }

    #[test]
    fn top_k_caps_length() {
        let mut board = Vec::new();
        for sequence in 0..30 {
            insert(&mut board, ranked(sequence, "p", sequence as i64));
        }
        let top = top_k(&board, LEADERBOARD_TOP_K);
        assert_eq!(top.len(), 25);
        assert_eq!(top[0].score(), 29);
        assert_eq!(top[24].score(), 5);
        assert_eq!(top_k(&board[..3], LEADERBOARD_TOP_K).len(), 3);
        assert!(top_k(&[], LEADERBOARD_TOP_K).is_empty());
    }
}
