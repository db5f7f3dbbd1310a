use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Run,
    Ride,
    Swim,
    Walk,
    Hike,
    StrengthTraining,
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpsPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_m: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub offset_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gps: Option<GpsPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate_bpm: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_watts: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySession {
    pub lap_index: u32,
    pub duration_seconds: u32,
    #[serde(default)]
    pub records: Vec<ActivityRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetType {
    Working,
    Warmup,
    Dropset,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrengthSet {
    pub exercise_name: String,
    #[serde(default)]
    pub primary_muscle_groups: Vec<String>,
    #[serde(default)]
    pub secondary_muscle_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_kg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    pub set_type: SetType,
}

/// Canonical activity payload produced by a source adapter and carried
/// through the pipeline runtime until a destination consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardizedActivity {
    pub external_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(default)]
    pub sessions: Vec<ActivitySession>,
    #[serde(default)]
    pub strength_sets: Vec<StrengthSet>,
}

impl StandardizedActivity {
    pub fn new(external_id: impl Into<String>, source: Source, activity_type: ActivityType) -> Self {
        Self {
            external_id: external_id.into(),
            start_time: Utc::now(),
            activity_type,
            source,
            title: None,
            duration_seconds: None,
            distance_m: None,
            sessions: Vec::new(),
            strength_sets: Vec::new(),
        }
    }
}
