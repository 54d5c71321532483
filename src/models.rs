use std::fmt;

use serde::Serialize;

use crate::table::Table;

pub const EMAIL: &str = "email";
pub const NIK: &str = "nik";
pub const GENDER: &str = "gender";
pub const PLATFORM: &str = "platform";
pub const STATUS_LEARNER: &str = "status_learner";
pub const LEARNER_STATUS: &str = "learner_status";
pub const CUSTOMER_ID: &str = "Customer ID";
pub const TITLE: &str = "title";
pub const TEST_NAME: &str = "Test Name";
pub const TOTAL_SCORE: &str = "total_score";
pub const FINAL_RESULT: &str = "final_result";
pub const TYPOLOGY: &str = "typology";
pub const LAST_UPDATED: &str = "last_updated";
pub const CREATED_AT: &str = "created_at";
pub const SCHEDULED_AT: &str = "scheduled_at";
pub const DONE_AT: &str = "done_at";
pub const UNIT: &str = "unit";
pub const SUBUNIT: &str = "subunit";
pub const LAYER: &str = "layer";
pub const LAYER_GROUP: &str = "layer_group";
pub const COMPANY: &str = "Company";
pub const INSTITUTION: &str = "institution";
pub const RANK: &str = "rank";

/// Columns kept from the employee registry workbook.
pub const REGISTRY_COLUMNS: [&str; 11] = [
    "name_sap",
    EMAIL,
    NIK,
    UNIT,
    SUBUNIT,
    "admin_hr",
    LAYER,
    "generation",
    GENDER,
    "division",
    "department",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LearnerStatus {
    Internal,
    External,
}

impl LearnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LearnerStatus::Internal => "Internal",
            LearnerStatus::External => "External",
        }
    }
}

impl fmt::Display for LearnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
            Gender::Unknown => "n/a",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five result sets handed to the presentation side.
#[derive(Debug, Clone, Default)]
pub struct FinalizedData {
    /// Full Discovery export.
    pub discovery: Table,
    /// Employee registry projection.
    pub registry: Table,
    /// Active learners (Discovery and capture) classified Internal/External.
    pub reconciled: Table,
    /// Registered users across Discovery and capture.
    pub activity_capture: Table,
    /// Scheduled capture sessions.
    pub capture_schedule: Table,
}

impl FinalizedData {
    pub fn tables(&self) -> [(&'static str, &Table); 5] {
        [
            ("discovery", &self.discovery),
            ("registry", &self.registry),
            ("reconciled", &self.reconciled),
            ("activity_capture", &self.activity_capture),
            ("capture_schedule", &self.capture_schedule),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LearnerCounts {
    pub overall: usize,
    pub internal: usize,
    pub external: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserCounts {
    pub overall: usize,
    pub active: usize,
    pub passive: usize,
}
