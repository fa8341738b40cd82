//! Collection names used by the admin panel.

pub const USERS: &str = "users";
pub const LEADS: &str = "leads";
pub const ACTIVITY_LOGS: &str = "activity_logs";
pub const RATE_LIMITS: &str = "rate_limits";
pub const SECURITY_ALERTS: &str = "security_alerts";
pub const BACKUPS: &str = "backups";
pub const VALIDATION_ERRORS: &str = "validation_errors";
pub const DAILY_SUMMARIES: &str = "daily_summaries";

/// Every known collection
pub const ALL: &[&str] = &[
    USERS,
    LEADS,
    ACTIVITY_LOGS,
    RATE_LIMITS,
    SECURITY_ALERTS,
    BACKUPS,
    VALIDATION_ERRORS,
    DAILY_SUMMARIES,
];
