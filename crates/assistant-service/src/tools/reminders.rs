use crate::registry::{tool_error, DeviceRpc, FunctionDeclaration, Registration, Schema, ToolContext};
use chrono::{Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SetReminderInput {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub delay_mins: Option<i64>,
    pub what: String,
}

#[derive(Debug, Deserialize)]
pub struct GetRemindersInput {}

#[derive(Debug, Deserialize)]
pub struct DeleteReminderInput {
    pub id: String,
}

pub fn registrations() -> Vec<Registration> {
    vec![
        Registration::action(
            FunctionDeclaration::new(
                "set_reminder",
                "Set a reminder for the user to perform a task at a time. Either time or delay must be provided, \
                 but not both.",
                Schema::object()
                    .property(
                        "time",
                        Schema::string(
                            "The time to schedule the reminder for in ISO 8601 format, e.g. \
                             '2023-07-12T00:00:00-07:00'. Always assume the user's timezone unless otherwise \
                             specified.",
                        )
                        .nullable(),
                    )
                    .property(
                        "delay_mins",
                        Schema::integer("The number of minutes to wait before reminding the user.")
                            .nullable()
                            .format("int32"),
                    )
                    .required_property(
                        "what",
                        Schema::string("What to remind the user to do. Phrase it as an instruction, e.g. 'Buy milk'."),
                    ),
            ),
            set_reminder,
            |_: &SetReminderInput| "Setting a reminder".to_string(),
        ),
        Registration::action(
            FunctionDeclaration::new(
                "get_reminders",
                "Get the user's existing reminders, including their IDs.",
                Schema::object(),
            ),
            get_reminders,
            |_: &GetRemindersInput| "Checking your reminders".to_string(),
        ),
        Registration::action(
            FunctionDeclaration::new(
                "delete_reminder",
                "Delete one of the user's reminders by its ID. Call get_reminders first to find the ID.",
                Schema::object().required_property("id", Schema::string("The ID of the reminder to delete.")),
            ),
            delete_reminder,
            |_: &DeleteReminderInput| "Deleting a reminder".to_string(),
        ),
    ]
}

/// Exactly one of `time` and `delay_mins` must be present. A delay is
/// resolved against the current UTC time.
fn reminder_time(input: &SetReminderInput) -> Result<String, &'static str> {
    let time = input.time.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let delay = input.delay_mins.filter(|d| *d != 0);
    match (time, delay) {
        (Some(_), Some(_)) => Err("Only one of time or delay may be provided."),
        (Some(time), None) => Ok(time.to_string()),
        (None, Some(delay)) => {
            Ok((Utc::now() + Duration::minutes(delay)).to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        (None, None) => Err("Either time or delay must be provided."),
    }
}

async fn set_reminder(ctx: ToolContext, input: SetReminderInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("set_reminder") {
        return tool_error("You need to update the app on your watch to set reminders.");
    }
    let time = match reminder_time(&input) {
        Ok(time) => time,
        Err(message) => return tool_error(message),
    };
    info!("Asking watch to set a reminder for {}...", time);
    rpc.call(json!({"time": time, "what": input.what, "action": "set_reminder"}))
        .await
}

async fn get_reminders(ctx: ToolContext, _input: GetRemindersInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("get_reminders") {
        return tool_error("You need to update the app on your watch to view reminders.");
    }
    rpc.call(json!({"action": "get_reminders"})).await
}

async fn delete_reminder(ctx: ToolContext, input: DeleteReminderInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("delete_reminder") {
        return tool_error("You need to update the app on your watch to delete reminders.");
    }
    rpc.call(json!({"id": input.id, "action": "delete_reminder"})).await
}
