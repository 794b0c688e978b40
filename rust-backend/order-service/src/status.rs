//! Display status for orders.
//!
//! The `orders.status` column is free text: checkout writes `Pending`, the
//! payment webhook writes `Paid`/`Failed`, suppliers write whatever their
//! dashboard sends. Clients only ever see one of three buckets, derived here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizedStatus {
    Pending,
    Completed,
    Cancelled,
}

const COMPLETED_MARKERS: [&str; 5] = ["complete", "deliv", "paid", "received", "confirm"];

/// Maps any raw status into its display bucket. Never fails.
pub fn normalize(raw: Option<&str>) -> NormalizedStatus {
    let Some(raw) = raw else {
        return NormalizedStatus::Pending;
    };
    let s = raw.to_lowercase();

    if s.contains("cancel") {
        NormalizedStatus::Cancelled
    } else if COMPLETED_MARKERS.iter().any(|m| s.contains(m)) {
        NormalizedStatus::Completed
    } else {
        NormalizedStatus::Pending
    }
}

impl NormalizedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedStatus::Pending => "Pending",
            NormalizedStatus::Completed => "Completed",
            NormalizedStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for NormalizedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse used by the supplier status endpoint: only the exact labels.
impl FromStr for NormalizedStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(NormalizedStatus::Pending),
            "Completed" => Ok(NormalizedStatus::Completed),
            "Cancelled" => Ok(NormalizedStatus::Cancelled),
            other => Err(AppError::Validation(format!("invalid status: {other}"))),
        }
    }
}
