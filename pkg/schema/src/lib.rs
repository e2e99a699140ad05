use std::{collections::HashMap, fmt};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Field schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn int(name: &'static str) -> FieldDef {
    FieldDef {
        name,
        kind: FieldKind::Integer,
    }
}

const fn text(name: &'static str) -> FieldDef {
    FieldDef {
        name,
        kind: FieldKind::Text,
    }
}

/// Ordered field list of one leaderboard. The order is the stored property
/// order, the response rendering order and the legacy feed column order.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldSchema {
    fields: &'static [FieldDef],
}

impl FieldSchema {
    pub fn fields(&self) -> &'static [FieldDef] {
        self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> {
        self.fields.iter().map(|field| field.name)
    }
}

pub const SCORE_FIELD: &str = "score";

static BREAKOUT_SCHEMA: FieldSchema = FieldSchema {
    fields: &[text("name"), int("score"), int("level"), text("date")],
};

static COLUMNS_SCHEMA: FieldSchema = FieldSchema {
    fields: &[
        text("name"),
        int("score"),
        int("bricks"),
        int("level"),
        int("time"),
        text("date"),
    ],
};

static ETRIS_SCHEMA: FieldSchema = FieldSchema {
    fields: &[
        text("name"),
        int("score"),
        int("lines"),
        int("level"),
        int("time"),
        text("date"),
    ],
};

static WORD_ON_WORD_SCHEMA: FieldSchema = FieldSchema {
    fields: &[text("name"), int("score"), int("words"), text("date")],
};

static BALL_BONANZA_SCHEMA: FieldSchema = FieldSchema {
    fields: &[
        text("name"),
        int("score"),
        int("balls"),
        int("time"),
        text("date"),
    ],
};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Registration {
    id: &'static str,
    schema: &'static FieldSchema,
    legacy_import: bool,
}

/// Every leaderboard the service knows about. `legacy_import` marks the lists
/// that exist in the old hosted score files.
static REGISTRY: [Registration; 7] = [
    Registration {
        id: "breakout",
        schema: &BREAKOUT_SCHEMA,
        legacy_import: true,
    },
    Registration {
        id: "columns",
        schema: &COLUMNS_SCHEMA,
        legacy_import: true,
    },
    Registration {
        id: "etris",
        schema: &ETRIS_SCHEMA,
        legacy_import: false,
    },
    Registration {
        id: "wordonword_swe",
        schema: &WORD_ON_WORD_SCHEMA,
        legacy_import: true,
    },
    Registration {
        id: "wordonword_eng",
        schema: &WORD_ON_WORD_SCHEMA,
        legacy_import: true,
    },
    Registration {
        id: "wordonword_ger",
        schema: &WORD_ON_WORD_SCHEMA,
        legacy_import: true,
    },
    Registration {
        id: "ballbonanza",
        schema: &BALL_BONANZA_SCHEMA,
        legacy_import: false,
    },
];

/// Identifier of a registered leaderboard. Only obtainable through
/// [`LeaderboardId::parse`] or [`LeaderboardId::all`], so holding one proves
/// the list exists.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaderboardId(usize);

impl LeaderboardId {
    pub fn parse(raw: &str) -> Option<Self> {
        REGISTRY
            .iter()
            .position(|registration| registration.id == raw)
            .map(Self)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..REGISTRY.len()).map(Self)
    }

    pub fn as_str(self) -> &'static str {
        REGISTRY[self.0].id
    }

    pub fn schema(self) -> &'static FieldSchema {
        REGISTRY[self.0].schema
    }

    pub fn accepts_legacy_import(self) -> bool {
        REGISTRY[self.0].legacy_import
    }
}

impl fmt::Debug for LeaderboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LeaderboardId").field(&self.as_str()).finish()
    }
}

impl fmt::Display for LeaderboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn schema_for(raw: &str) -> Option<&'static FieldSchema> {
    LeaderboardId::parse(raw).map(LeaderboardId::schema)
}

pub fn is_registered(raw: &str) -> bool {
    LeaderboardId::parse(raw).is_some()
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// A typed score entry. Values are held in schema order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    leaderboard: LeaderboardId,
    values: Vec<FieldValue>,
    score: i64,
}

impl Entry {
    pub fn leaderboard(&self) -> LeaderboardId {
        self.leaderboard
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.leaderboard
            .schema()
            .position_of(name)
            .map(|index| &self.values[index])
    }

    /// `(name, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.leaderboard.schema().field_names().zip(self.values.iter())
    }

    /// Renders the entry as `name=value` pairs joined by commas.
    pub fn render_line(&self) -> String {
        self.fields()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("field '{field}' is not an integer: '{value}'")]
    NotAnInteger { field: &'static str, value: String },
    #[error("field '{field}' has kind {expected:?} but got a {actual:?} value")]
    KindMismatch {
        field: &'static str,
        expected: FieldKind,
        actual: FieldKind,
    },
    #[error("expected {expected} values, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("leaderboard schema has no integer score field")]
    MissingScore,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Entry(Entry),
    /// Not every declared field was present: the caller only wants to view
    /// the list.
    ViewOnly,
}

/// Converts raw string parameters into a typed entry for `leaderboard`.
///
/// Absence of any declared field yields [`Submission::ViewOnly`]. Presence is
/// checked for every field before any parsing happens, so a request missing
/// a field is never reported as malformed.
pub fn validate(
    leaderboard: LeaderboardId,
    raw: &HashMap<String, String>,
) -> Result<Submission, ValidationError> {
    let schema = leaderboard.schema();
    let mut present = Vec::with_capacity(schema.len());
    for field in schema.fields() {
        match raw.get(field.name) {
            Some(value) => present.push(value.as_str()),
            None => return Ok(Submission::ViewOnly),
        }
    }

    let mut values = Vec::with_capacity(schema.len());
    for (field, raw_value) in schema.fields().iter().zip(present) {
        values.push(parse_value(field, raw_value)?);
    }
    Entry::from_values(leaderboard, values).map(Submission::Entry)
}

fn parse_value(field: &FieldDef, raw: &str) -> Result<FieldValue, ValidationError> {
    match field.kind {
        FieldKind::Text => Ok(FieldValue::Text(raw.to_string())),
        FieldKind::Integer => raw
            .parse::<i32>()
            .map(|value| FieldValue::Integer(i64::from(value)))
            .map_err(|_| ValidationError::NotAnInteger {
                field: field.name,
                value: raw.to_string(),
            }),
    }
}

impl Entry {
    /// Builds an entry from already-typed values, checking count and kinds
    /// against the leaderboard schema.
    pub fn from_values(
        leaderboard: LeaderboardId,
        values: Vec<FieldValue>,
    ) -> Result<Self, ValidationError> {
        let schema = leaderboard.schema();
        if values.len() != schema.len() {
            return Err(ValidationError::FieldCount {
                expected: schema.len(),
                actual: values.len(),
            });
        }
        for (field, value) in schema.fields().iter().zip(&values) {
            let actual = match value {
                FieldValue::Integer(_) => FieldKind::Integer,
                FieldValue::Text(_) => FieldKind::Text,
            };
            if actual != field.kind {
                return Err(ValidationError::KindMismatch {
                    field: field.name,
                    expected: field.kind,
                    actual,
                });
            }
        }
        let score = match schema.position_of(SCORE_FIELD).map(|index| &values[index]) {
            Some(FieldValue::Integer(score)) => *score,
            _ => return Err(ValidationError::MissingScore),
        };
        Ok(Self {
            leaderboard,
            values,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn breakout() -> LeaderboardId {
        LeaderboardId::parse("breakout").unwrap()
    }

    #[test]
    fn registry_contains_the_seven_lists() {
        let ids: Vec<&str> = LeaderboardId::all().map(LeaderboardId::as_str).collect();
        assert_eq!(
            ids,
            vec![
                "breakout",
                "columns",
                "etris",
                "wordonword_swe",
                "wordonword_eng",
                "wordonword_ger",
                "ballbonanza"
            ]
        );
    }

    #[test]
    fn every_schema_has_an_integer_score() {
        for id in LeaderboardId::all() {
            let schema = id.schema();
            let index = schema.position_of(SCORE_FIELD).expect("score field");
            assert_eq!(schema.fields()[index].kind, FieldKind::Integer, "{id}");
        }
    }

    #[test]
    fn unknown_list_is_not_registered() {
        assert!(!is_registered("chess"));
        assert!(schema_for("chess").is_none());
        assert!(!is_registered("Breakout"));
        assert!(is_registered("wordonword_ger"));
    }

    #[test]
    fn word_on_word_variants_share_a_schema() {
        let swe = schema_for("wordonword_swe").unwrap();
        let eng = schema_for("wordonword_eng").unwrap();
        assert_eq!(swe, eng);
        let names: Vec<_> = swe.field_names().collect();
        assert_eq!(names, vec!["name", "score", "words", "date"]);
    }

    #[test]
    fn only_legacy_lists_accept_import() {
        let importable: Vec<&str> = LeaderboardId::all()
            .filter(|id| id.accepts_legacy_import())
            .map(LeaderboardId::as_str)
            .collect();
        assert_eq!(
            importable,
            vec![
                "breakout",
                "columns",
                "wordonword_swe",
                "wordonword_eng",
                "wordonword_ger"
            ]
        );
    }

    #[test]
    fn validates_complete_submission() {
        let raw = raw_fields(&[
            ("name", "Alice"),
            ("score", "100"),
            ("level", "3"),
            ("date", "2024-01-01"),
        ]);
        let Submission::Entry(entry) = validate(breakout(), &raw).unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(entry.score(), 100);
        assert_eq!(entry.get("level"), Some(&FieldValue::Integer(3)));
        assert_eq!(entry.render_line(), "name=Alice,score=100,level=3,date=2024-01-01");
    }

    #[test]
    fn missing_field_is_view_only_even_with_bad_integers() {
        let raw = raw_fields(&[("name", "Alice"), ("score", "lots"), ("level", "3")]);
        assert_eq!(validate(breakout(), &raw), Ok(Submission::ViewOnly));
        assert_eq!(
            validate(breakout(), &HashMap::new()),
            Ok(Submission::ViewOnly)
        );
    }

    #[test]
    fn rejects_non_integer_value() {
        let raw = raw_fields(&[
            ("name", "Alice"),
            ("score", "100"),
            ("level", "three"),
            ("date", "2024-01-01"),
        ]);
        assert_eq!(
            validate(breakout(), &raw),
            Err(ValidationError::NotAnInteger {
                field: "level",
                value: "three".to_string()
            })
        );
    }

    #[test]
    fn integers_are_not_trimmed() {
        let raw = raw_fields(&[
            ("name", "Alice"),
            ("score", " 100"),
            ("level", "3"),
            ("date", "2024-01-01"),
        ]);
        assert!(matches!(
            validate(breakout(), &raw),
            Err(ValidationError::NotAnInteger { field: "score", .. })
        ));
    }

    #[test]
    fn accepts_signed_integers_and_ignores_extra_parameters() {
        let raw = raw_fields(&[
            ("name", "Bob"),
            ("score", "-5"),
            ("level", "+2"),
            ("date", "yesterday"),
            ("highScoreList", "breakout"),
        ]);
        let Submission::Entry(entry) = validate(breakout(), &raw).unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(entry.score(), -5);
        assert_eq!(entry.get("level"), Some(&FieldValue::Integer(2)));
        assert_eq!(entry.get("highScoreList"), None);
    }

    #[test]
    fn integers_are_limited_to_32_bits() {
        let submission = |score: &str| {
            validate(
                breakout(),
                &raw_fields(&[
                    ("name", "Max"),
                    ("score", score),
                    ("level", "1"),
                    ("date", "2024-01-01"),
                ]),
            )
        };
        let Submission::Entry(entry) = submission("2147483647").unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(entry.score(), 2_147_483_647);
        assert!(submission("-2147483648").is_ok());
        assert_eq!(
            submission("2147483648"),
            Err(ValidationError::NotAnInteger {
                field: "score",
                value: "2147483648".to_string()
            })
        );
    }

    #[test]
    fn text_fields_pass_through_unmodified() {
        let raw = raw_fields(&[
            ("name", "  <b>Eve</b>, the 1st "),
            ("score", "7"),
            ("words", "12"),
            ("date", ""),
        ]);
        let id = LeaderboardId::parse("wordonword_eng").unwrap();
        let Submission::Entry(entry) = validate(id, &raw).unwrap() else {
            panic!("expected an entry");
        };
        assert_eq!(
            entry.get("name"),
            Some(&FieldValue::Text("  <b>Eve</b>, the 1st ".to_string()))
        );
        assert_eq!(entry.get("date"), Some(&FieldValue::Text(String::new())));
    }

    #[test]
    fn from_values_checks_kinds_and_count() {
        let err = Entry::from_values(breakout(), vec![FieldValue::Text("a".into())]);
        assert_eq!(
            err,
            Err(ValidationError::FieldCount {
                expected: 4,
                actual: 1
            })
        );
        let err = Entry::from_values(
            breakout(),
            vec![
                FieldValue::Text("a".into()),
                FieldValue::Text("1".into()),
                FieldValue::Integer(1),
                FieldValue::Text("d".into()),
            ],
        );
        assert!(matches!(
            err,
            Err(ValidationError::KindMismatch { field: "score", .. })
        ));
    }
}
