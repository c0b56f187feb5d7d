use crate::registry::{tool_error, FunctionDeclaration, Registration, Schema, ToolContext};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct GetTimeInput {
    /// Minutes east of UTC; the user's own offset when absent.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    /// Seconds to add to the current time.
    #[serde(default)]
    pub offset: Option<f64>,
}

pub fn registration() -> Registration {
    Registration::function(
        FunctionDeclaration::new(
            "get_time",
            "Get the current time at a given UTC offset, or in the user's own timezone if no offset is given.",
            Schema::object()
                .property(
                    "utc_offset_minutes",
                    Schema::integer("Minutes east of UTC, e.g. -420 for UTC-7. Omit for the user's own timezone.")
                        .nullable()
                        .format("int32"),
                )
                .property(
                    "offset",
                    Schema::number(
                        "The number of seconds to add to the current time, if checking a different time. Omit or \
                         set to zero for current time.",
                    )
                    .format("double"),
                ),
        ),
        |ctx: ToolContext, input: GetTimeInput| async move {
            let minutes = input.utc_offset_minutes.unwrap_or(ctx.params.tz_offset_minutes);
            time_at(Utc::now(), minutes, input.offset.unwrap_or_default())
        },
        |input: &GetTimeInput| match input.utc_offset_minutes {
            Some(minutes) => format!("Checking the time at UTC{}", offset_label(minutes)),
            None => "Checking the time".to_string(),
        },
    )
}

fn offset_label(minutes: i32) -> String {
    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    if minutes % 60 == 0 {
        format!("{}{}", sign, minutes / 60)
    } else {
        format!("{}{}:{:02}", sign, minutes / 60, minutes % 60)
    }
}

fn time_at(now: DateTime<Utc>, offset_minutes: i32, shift_seconds: f64) -> Value {
    let Some(zone) = FixedOffset::east_opt(offset_minutes.saturating_mul(60)) else {
        return tool_error(format!("The UTC offset {} minutes is not valid", offset_minutes));
    };
    let shifted = now + Duration::milliseconds((shift_seconds * 1000.0) as i64);
    json!({"time": shifted.with_timezone(&zone).to_rfc2822()})
}
