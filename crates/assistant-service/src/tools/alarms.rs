use crate::registry::{tool_error, DeviceRpc, FunctionDeclaration, Registration, Schema, ToolContext};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

const SET_DESCRIPTION: &str = "Get or set an alarm or a timer for a given time.";

#[derive(Debug, Deserialize)]
pub struct AlarmInput {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, rename = "duration_seconds")]
    pub duration: Option<i64>,
    pub is_timer: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAlarmInput {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub is_timer: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetAlarmInput {
    pub is_timer: bool,
}

fn set_alarm_parameters() -> Schema {
    Schema::object()
        .property(
            "time",
            Schema::string(
                "If setting an alarm, the time to schedule the alarm for in ISO 8601 format, e.g. \
                 '2023-07-12T00:00:00-07:00'. Required for alarms. Must always be in the future.",
            )
            .nullable(),
        )
        .property(
            "duration_seconds",
            Schema::integer("If setting a timer, the number of seconds to set the timer for. Required for timers.")
                .nullable()
                .format("int32"),
        )
        .required_property(
            "is_timer",
            Schema::boolean("True if this is a timer, false if it's an alarm."),
        )
}

pub fn registrations() -> Vec<Registration> {
    let named = set_alarm_parameters().property(
        "name",
        Schema::string(
            "Only if explicitly specified by the user, the name of the alarm or timer. Use title case. \
             If the user didn't ask to name the timer, just leave it empty.",
        )
        .nullable(),
    );

    vec![
        Registration::action(
            FunctionDeclaration::new("set_alarm", SET_DESCRIPTION, set_alarm_parameters()),
            set_alarm,
            alarm_thought,
        )
        .anti_capability("named_alarms"),
        Registration::action(
            FunctionDeclaration::new("set_alarm", SET_DESCRIPTION, named),
            set_alarm,
            alarm_thought,
        )
        .capability("named_alarms"),
        Registration::action(
            FunctionDeclaration::new(
                "get_alarm",
                "Get any existing alarms or timers. **There is no get_timers, call this with is_timer=true instead.**",
                Schema::object().required_property(
                    "is_timer",
                    Schema::boolean("True if retrieving timers, false if returning alarms."),
                ),
            ),
            get_alarm,
            |input: &GetAlarmInput| {
                if input.is_timer {
                    "Checking your timers".to_string()
                } else {
                    "Checking your alarms".to_string()
                }
            },
        )
        .aliases(&["get_alarms", "get_timer", "get_timers"]),
        Registration::action(
            FunctionDeclaration::new(
                "delete_alarm",
                "Delete a specific alarm or timer by its expiration time. When deleting a timer, you must call \
                 get_alarm first to get the expiration time (calculating it from the chat history will only be \
                 approximate)",
                Schema::object()
                    .required_property(
                        "time",
                        Schema::string(
                            "The time of the alarm or timer to delete in ISO 8601 format, e.g. \
                             '2023-07-12T00:00:00-07:00'.",
                        ),
                    )
                    .required_property(
                        "is_timer",
                        Schema::boolean("True if deleting a timer, false if deleting an alarm."),
                    ),
            ),
            delete_alarm,
            |input: &DeleteAlarmInput| {
                if input.is_timer {
                    "Deleting a timer".to_string()
                } else {
                    "Deleting an alarm".to_string()
                }
            },
        ),
    ]
}

fn alarm_thought(input: &AlarmInput) -> String {
    if input.is_timer {
        "Setting a timer".to_string()
    } else if input.time.as_deref().unwrap_or_default().is_empty() {
        "Contemplating time".to_string()
    } else {
        "Setting an alarm".to_string()
    }
}

async fn set_alarm(ctx: ToolContext, input: AlarmInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("set_alarm") {
        return tool_error("You need to update the app on your watch to set alarms or timers.");
    }
    info!("Asking watch to set an alarm...");
    rpc.call(json!({
        "time": input.time.unwrap_or_default(),
        "duration": input.duration.unwrap_or_default(),
        "isTimer": input.is_timer,
        "name": input.name.unwrap_or_default(),
        "action": "set_alarm",
        "cancel": false,
    }))
    .await
}

async fn delete_alarm(ctx: ToolContext, input: DeleteAlarmInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("set_alarm") {
        return tool_error("You need to update the app on your watch to delete alarms or timers.");
    }
    info!("Asking watch to delete an alarm set for {}...", input.time);
    rpc.call(json!({
        "time": input.time,
        "isTimer": input.is_timer,
        "action": "set_alarm",
        "cancel": true,
    }))
    .await
}

async fn get_alarm(ctx: ToolContext, input: GetAlarmInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("get_alarm") {
        return tool_error("You need to update the app on your watch to get alarms or timers.");
    }
    rpc.call(json!({"isTimer": input.is_timer, "action": "get_alarm"})).await
}
