//! Correction proposals ("fix" reports) and their moderation state.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::{GeoPoint, Station, Stop, StopKind};

/// Moderation state of a proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProposalStatus::Pending),
            "accepted" => Some(ProposalStatus::Accepted),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// Moderator verdict on a pending proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accepted,
    Rejected,
}

/// What kind of record a proposal edits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Station,
    Train,
    Stop,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Station => "station",
            TargetKind::Train => "train",
            TargetKind::Stop => "stop",
        }
    }
}

/// The record a proposal edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionTarget {
    pub kind: TargetKind,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_index: Option<usize>,
}

/// A concrete edit to the dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ProposedChange {
    AddStation {
        station: Station,
    },
    #[serde(rename_all = "camelCase")]
    UpdateStation {
        station_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        location: Option<GeoPoint>,
    },
    #[serde(rename_all = "camelCase")]
    AddTrain {
        id: String,
        name: String,
        stops: Vec<Stop>,
        #[serde(default)]
        off_days: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateTrain {
        train_id: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        off_days: Option<Vec<String>>,
    },
    #[serde(rename_all = "camelCase")]
    ReplaceStops { train_id: String, stops: Vec<Stop> },
    #[serde(rename_all = "camelCase")]
    UpdateStop {
        train_id: String,
        stop_index: usize,
        #[serde(default)]
        stop_kind: Option<StopKind>,
        #[serde(default, with = "crate::timetable::hhmm")]
        scheduled_time: Option<NaiveTime>,
    },
}

impl ProposedChange {
    pub fn target(&self) -> CorrectionTarget {
        match self {
            ProposedChange::AddStation { station } => CorrectionTarget {
                kind: TargetKind::Station,
                id: station.id.clone(),
                stop_index: None,
            },
            ProposedChange::UpdateStation { station_id, .. } => CorrectionTarget {
                kind: TargetKind::Station,
                id: station_id.clone(),
                stop_index: None,
            },
            ProposedChange::AddTrain { id, .. } => CorrectionTarget {
                kind: TargetKind::Train,
                id: id.clone(),
                stop_index: None,
            },
            ProposedChange::UpdateTrain { train_id, .. }
            | ProposedChange::ReplaceStops { train_id, .. } => CorrectionTarget {
                kind: TargetKind::Train,
                id: train_id.clone(),
                stop_index: None,
            },
            ProposedChange::UpdateStop {
                train_id,
                stop_index,
                ..
            } => CorrectionTarget {
                kind: TargetKind::Stop,
                id: train_id.clone(),
                stop_index: Some(*stop_index),
            },
        }
    }
}

/// A user-submitted edit awaiting or past moderation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionProposal {
    pub id: String,
    pub target: CorrectionTarget,
    pub proposed_change: ProposedChange,
    pub reporter_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub status: ProposalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Revision produced when the proposal was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_revision: Option<i64>,
}

/// Request body for submitting a proposal.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeCorrectionRequest {
    pub reporter_token: String,
    pub change: ProposedChange,
    #[serde(default)]
    pub description: Option<String>,
}

/// Request body for a moderation decision.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: Decision,
}
