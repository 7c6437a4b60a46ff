//! Subscription plans and the per-job quantity cap they impose.

use crate::error::CoreError;

/// A user's subscription plan, stored as text in `users.plan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
    Business,
}

impl Plan {
    /// Parse from the database `plan` column.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            other => Err(CoreError::Validation(format!("Unknown plan '{other}'"))),
        }
    }

    /// Database name value.
    pub fn name(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }

    /// Maximum number of assets a single job may request.
    pub fn max_quantity(self) -> i32 {
        match self {
            Self::Free => 1,
            Self::Pro => 4,
            Self::Business => 8,
        }
    }

    /// Daily quota granted to new users on this plan.
    pub fn default_daily_quota(self) -> i32 {
        match self {
            Self::Free => 5,
            Self::Pro => 100,
            Self::Business => 500,
        }
    }
}

/// Clamp a requested quantity into `1..=plan.max_quantity()`.
pub fn clamp_quantity(requested: i32, plan: Plan) -> i32 {
    requested.clamp(1, plan.max_quantity())
}

/// Reject quantities outside `1..=cap`. Used by the job store as a last line
/// before insert, after the enqueue path has already clamped.
pub fn validate_quantity(quantity: i32, cap: i32) -> Result<(), CoreError> {
    if quantity < 1 || quantity > cap {
        return Err(CoreError::Validation(format!(
            "Quantity {quantity} is outside the allowed range 1..={cap}"
        )));
    }
    Ok(())
}
