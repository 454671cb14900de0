//! Global budget control
//!
//! Tracks spend and agent/team counts against hard limits, advisory soft
//! limits and a night-mode cap policy. Limit checks return [`LimitCheck`]
//! data; callers decide how a deny surfaces.

mod controller;
mod limits;

pub use controller::{BudgetController, BudgetState, BudgetStatus, SpendSnapshot, MAX_HISTORY};
pub use limits::{
    AlertAction, AlertThreshold, BudgetLimits, LimitCheck, LimitRequest, NightModeConfig,
    SoftLimits,
};
