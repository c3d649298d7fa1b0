//! Node key expiry toggling and human-readable remaining time.

use mirage_core::db::unix_timestamp;
use tracing::info;

use crate::error::{ControlError, Result};
use crate::storage::{ControlDatabase, Machine, Organization};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Flip a machine between "never expires" and "expires after the org default".
///
/// Returns the remaining-time description of the new expiry, or an empty
/// string when expiry was disabled. Enabling expiry in an organization that
/// does not expire keys is rejected without a write. `machine` is updated
/// only after the write has committed.
pub async fn toggle_expiry(
    db: &ControlDatabase,
    machine: &mut Machine,
    org: &Organization,
) -> Result<String> {
    if machine.expiry != 0 {
        db.refresh_machine_expiry(machine.id, 0).await?;
        machine.expiry = 0;
        info!(machine_id = machine.id, "Machine key expiry disabled");
        return Ok(String::new());
    }

    let now = unix_timestamp();
    let expiry = org.key_expiry_from(now).ok_or_else(|| {
        ControlError::Invalid(format!("organization {} does not expire keys", org.name))
    })?;
    db.refresh_machine_expiry(machine.id, expiry).await?;
    machine.expiry = expiry;
    info!(machine_id = machine.id, expiry, "Machine key expiry enabled");
    Ok(remaining_expiry_description(expiry - now))
}

/// Describe a remaining duration, e.g. `"in 3 days"` or `"expired"`.
pub fn remaining_expiry_description(remaining_secs: i64) -> String {
    if remaining_secs <= 0 {
        return "expired".to_string();
    }
    let (n, unit) = if remaining_secs >= DAY {
        (remaining_secs / DAY, "day")
    } else if remaining_secs >= HOUR {
        (remaining_secs / HOUR, "hour")
    } else if remaining_secs >= MINUTE {
        (remaining_secs / MINUTE, "minute")
    } else {
        return "in less than a minute".to_string();
    };
    if n == 1 {
        format!("in 1 {unit}")
    } else {
        format!("in {n} {unit}s")
    }
}

/// Description for a stored expiry timestamp as seen at `now`.
pub fn describe_expiry(expiry: i64, now: i64) -> String {
    if expiry == 0 {
        String::new()
    } else {
        remaining_expiry_description(expiry - now)
    }
}
