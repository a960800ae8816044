use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Roster category definition managed by admins
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Slot {
    pub id: String,
    pub code: String,
    pub name: String,
    pub min_select: i64,
    pub max_select: i64,
    pub description: Option<String>,
    pub requirements: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// New slot with a fresh id and the default selection bounds (4..=4).
    pub fn new(code: &str, name: &str, created_at: DateTime<Utc>) -> Self {
        Slot {
            id: uuid::Uuid::new_v4().to_string(),
            code: code.to_string(),
            name: name.to_string(),
            min_select: 4,
            max_select: 4,
            description: None,
            requirements: None,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn to_ref(&self) -> SlotRef {
        SlotRef {
            id: self.id.clone(),
            code: self.code.clone(),
            created_at: self.created_at,
        }
    }
}

/// Slot row from SQLite database
#[derive(Debug, sqlx::FromRow)]
pub struct SlotRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub min_select: i64,
    pub max_select: i64,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SlotRow {
    /// Convert database row to a `Slot`, parsing timestamps and the requirements document
    pub fn to_slot(&self) -> Result<Slot, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };

        let requirements = self
            .requirements
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| corrupt(format!("requirements: {}", e)))?;

        Ok(Slot {
            id: self.id.clone(),
            code: self.code.clone(),
            name: self.name.clone(),
            min_select: self.min_select,
            max_select: self.max_select,
            description: self.description.clone(),
            requirements,
            created_at: parse_timestamp(&self.created_at)
                .map_err(|e| corrupt(format!("created_at: {}", e)))?,
            updated_at: parse_timestamp(&self.updated_at)
                .map_err(|e| corrupt(format!("updated_at: {}", e)))?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

/// Identity of a slot as it appears in reports
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotRef {
    pub id: String,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Records sharing one normalized code: the oldest survives, the rest are candidates
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub key: String,
    pub survivor: SlotRef,
    pub candidates: Vec<SlotRef>,
}

impl DuplicateGroup {
    pub fn size(&self) -> usize {
        self.candidates.len() + 1
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeletionFailure {
    pub id: String,
    pub key: String,
    pub reason: String,
}

/// Surviving slot whose stored code does not satisfy the slot code format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NonconformingCode {
    pub id: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    #[default]
    DryRun,
    Apply,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::DryRun => write!(f, "dry-run"),
            Mode::Apply => write!(f, "apply"),
        }
    }
}

/// Outcome of one cleanup run
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub mode: Mode,
    pub records_scanned: usize,
    pub groups: Vec<DuplicateGroup>,
    pub duplicates_found: usize,
    pub deletions_attempted: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<DeletionFailure>,
    pub skipped: Vec<String>,
    pub nonconforming: Vec<NonconformingCode>,
}

impl CleanupReport {
    pub fn duplicate_groups(&self) -> usize {
        self.groups.len()
    }

    /// Ids a dry-run would hand to `apply`, in plan order
    pub fn candidate_ids(&self) -> Vec<String> {
        self.groups
            .iter()
            .flat_map(|g| g.candidates.iter().map(|c| c.id.clone()))
            .collect()
    }

    /// True when every candidate was deleted (or nothing had to be)
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total slots in database: {}", self.records_scanned)?;

        for group in &self.groups {
            writeln!(f, "Found {} slots for code '{}'", group.size(), group.key)?;
            writeln!(
                f,
                "  -> Keeping: {} (created: {})",
                group.survivor.id, group.survivor.created_at
            )?;
            let verb = match self.mode {
                Mode::DryRun => "Would delete",
                Mode::Apply => "Deleting",
            };
            for candidate in &group.candidates {
                writeln!(f, "  -> {}: {} (created: {})", verb, candidate.id, candidate.created_at)?;
            }
        }

        if self.groups.is_empty() {
            writeln!(f, "No duplicates found!")?;
        }

        for code in &self.nonconforming {
            writeln!(f, "Nonconforming code '{}' on slot {}", code.code, code.id)?;
        }

        writeln!(f)?;
        writeln!(f, "Mode: {}", self.mode)?;
        writeln!(f, "Records scanned: {}", self.records_scanned)?;
        writeln!(f, "Duplicate groups: {}", self.duplicate_groups())?;
        writeln!(f, "Duplicates found: {}", self.duplicates_found)?;
        writeln!(f, "Deletions attempted: {}", self.deletions_attempted)?;
        writeln!(f, "Deleted: {}", self.deleted.len())?;
        writeln!(f, "Failed: {}", self.failures.len())?;
        write!(f, "Skipped: {}", self.skipped.len())?;

        for failure in &self.failures {
            write!(f, "\n  failed {} ({}): {}", failure.id, failure.key, failure.reason)?;
        }

        Ok(())
    }
}
