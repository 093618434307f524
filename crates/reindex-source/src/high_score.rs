//! High score rows.
//!
//! One row per `(user, beatmap, mods)` combination in the `osu_scores*_high`
//! tables. The document id is built from that natural key so re-indexing the
//! same score overwrites instead of duplicating.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use sqlx::FromRow;

use reindex_types::Cursor;

use crate::error::SourceError;
use crate::source::SourceRow;

/// Column used to page through score tables.
pub const SCORE_CURSOR_COLUMN: &str = "score_id";

/// A high score as stored in the score tables.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct HighScore {
    pub score_id: u64,
    pub beatmap_id: u32,
    pub user_id: u32,
    pub score: i32,
    #[sqlx(rename = "maxcombo")]
    pub max_combo: i32,
    pub rank: String,
    pub count50: i32,
    pub count100: i32,
    pub count300: i32,
    pub countmiss: i32,
    pub countgeki: i32,
    pub countkatu: i32,
    pub perfect: bool,
    /// Mod bitset; indexed as a list of acronyms
    #[serde(serialize_with = "serialize_mods")]
    pub enabled_mods: i32,
    pub date: DateTime<Utc>,
    pub pp: Option<f32>,
    pub replay: bool,
    pub hidden: i8,
    pub country_acronym: String,
}

impl SourceRow for HighScore {
    fn cursor(&self) -> Result<Cursor, SourceError> {
        Cursor::try_from(self.score_id).map_err(|_| {
            SourceError::Serialization(format!("score_id {} exceeds the cursor range", self.score_id))
        })
    }

    fn document_id(&self) -> String {
        format!("{}-{}-{}", self.user_id, self.beatmap_id, self.enabled_mods)
    }
}

// (bit, acronym, bit implied by this mod). Order matters: a mod that implies
// another must come after the one it hides.
const MODS: &[(u32, &str, Option<u32>)] = &[
    (0, "NF", None),
    (1, "EZ", None),
    (3, "HD", None),
    (20, "FI", None),
    (4, "HR", None),
    (9, "NC", Some(6)),
    (6, "DT", None),
    (7, "Relax", None),
    (8, "HT", None),
    (10, "FL", None),
    (12, "SO", None),
    (13, "AP", None),
    (14, "PF", Some(5)),
    (5, "SD", None),
    (2, "TD", None),
    (15, "4K", None),
    (16, "5K", None),
    (17, "6K", None),
    (18, "7K", None),
    (19, "8K", None),
    (24, "9K", None),
];

/// Expand a mod bitset into acronyms, dropping mods implied by others
/// (NC implies DT, PF implies SD).
pub fn mods_from_bitset(bitset: i32) -> Vec<&'static str> {
    let bits = bitset as u32;
    let mut implied = Vec::new();
    let mut mods: Vec<(u32, &'static str)> = Vec::new();

    for &(bit, acronym, implies) in MODS {
        if bits & (1 << bit) == 0 {
            continue;
        }
        if let Some(hidden) = implies {
            implied.push(hidden);
        }
        mods.push((bit, acronym));
        mods.retain(|(b, _)| !implied.contains(b));
    }

    mods.into_iter().map(|(_, acronym)| acronym).collect()
}

fn serialize_mods<S: Serializer>(bitset: &i32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(mods_from_bitset(*bitset))
}
