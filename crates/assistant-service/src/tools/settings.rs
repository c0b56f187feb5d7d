use crate::registry::{tool_error, DeviceRpc, FunctionDeclaration, Registration, Schema, ToolContext};
use serde::Deserialize;
use serde_json::{Map, Value};

const VIBRATION_PATTERNS: &[&str] = &["Reveille", "Mario", "Nudge Nudge", "Jackhammer", "Standard"];

const LANGUAGES: &[&str] = &[
    "auto", "af_ZA", "id_ID", "ms_MY", "cs_CZ", "da_DK", "de_DE", "en_US", "es_ES", "fil_PH", "fr_FR", "gl_ES",
    "hr_HR", "is_IS", "it_IT", "sw_TZ", "lv_LV", "lt_LT", "hu_HU", "nl_NL", "no_NO", "pl_PL", "pt_PT", "ro_RO",
    "ru_RU", "sk_SK", "sl_SI", "fi_FI", "sv_SE", "tr_TR", "zu_ZA",
];

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSettingsInput {
    #[serde(default)]
    pub unit_system: String,
    #[serde(default)]
    pub response_language: String,
    #[serde(default)]
    pub alarm_vibration_pattern: String,
    #[serde(default)]
    pub timer_vibration_pattern: String,
    #[serde(default)]
    pub quick_launch_behaviour: String,
    #[serde(default)]
    pub confirm_prompts: Option<bool>,
}

impl UpdateSettingsInput {
    /// Device-side setting names of everything the model asked to change,
    /// paired with the value and a phrase for the thought.
    fn changes(&self) -> Vec<(&'static str, Value, &'static str)> {
        let mut changes = Vec::new();
        let strings = [
            ("unitSystem", &self.unit_system, "unit system"),
            ("responseLanguage", &self.response_language, "response language"),
            ("alarmVibrationPattern", &self.alarm_vibration_pattern, "alarm vibration"),
            ("timerVibrationPattern", &self.timer_vibration_pattern, "timer vibration"),
            ("quickLaunchBehaviour", &self.quick_launch_behaviour, "quick launch behaviour"),
        ];
        for (key, value, label) in strings {
            if !value.is_empty() {
                changes.push((key, Value::String(value.clone()), label));
            }
        }
        if let Some(confirm) = self.confirm_prompts {
            changes.push(("confirmPrompts", Value::Bool(confirm), "prompt confirmation"));
        }
        changes
    }
}

pub fn registration() -> Registration {
    Registration::action(
        FunctionDeclaration::new(
            "update_settings",
            "Update the user's settings, e.g. their preferred unit system. Call if and only if the user asks you to \
             change something. Properties not specified won't be changed. No property is required. For security \
             reasons, changing the location permission can't be done with this method - the user must go to the \
             settings page.",
            Schema::object()
                .property(
                    "unit_system",
                    Schema::string(
                        "Whether the user prefers metric, imperial, 'UK hybrid' (temperature in celsius, distance \
                         in miles), or both metric and imperial. Or, 'auto' to figure it out based on the user's \
                         location.",
                    )
                    .one_of(&["auto", "imperial", "metric", "uk hybrid", "both"]),
                )
                .property(
                    "response_language",
                    Schema::string(
                        "The user's preferred response language. This is the language in which the assistant will \
                         respond to the user, or 'automatic' to use the language of the user's last message.",
                    )
                    .one_of(LANGUAGES),
                )
                .property(
                    "alarm_vibration_pattern",
                    Schema::string("The user's preferred alarm vibration pattern, used when alarms go off.")
                        .one_of(VIBRATION_PATTERNS),
                )
                .property(
                    "timer_vibration_pattern",
                    Schema::string("The user's preferred timer vibration pattern, used when timers go off.")
                        .one_of(VIBRATION_PATTERNS),
                )
                .property(
                    "quick_launch_behaviour",
                    Schema::string(
                        "The user's preferred quick launch behaviour. The app can open the home screen (same as a \
                         non-quick launch), open the conversation but time out and quit after a minute, or open \
                         the conversation and stick around.",
                    )
                    .one_of(&[
                        "open home screen",
                        "start conversation and time out",
                        "start conversation and stay open",
                    ]),
                )
                .property(
                    "confirm_prompts",
                    Schema::boolean(
                        "Whether the user wants to be asked to confirm their all of their queries before acting on \
                         them",
                    )
                    .nullable(),
                ),
        ),
        update_settings,
        settings_thought,
    )
    .capability("update_settings")
}

fn settings_thought(input: &UpdateSettingsInput) -> String {
    let labels: Vec<&str> = input.changes().into_iter().map(|(_, _, label)| label).collect();
    match labels.as_slice() {
        [] => "Updating settings".to_string(),
        [only] => format!("Updating {}", only),
        [init @ .., last] => format!("Updating {} and {}", init.join(", "), last),
    }
}

async fn update_settings(ctx: ToolContext, input: UpdateSettingsInput, mut rpc: DeviceRpc) -> Value {
    if !ctx.supports_action("update_settings") {
        return tool_error("You need to update the app on your watch to change settings.");
    }
    let mut request = Map::new();
    request.insert("action".to_string(), Value::from("update_settings"));
    for (key, value, _) in input.changes() {
        request.insert(key.to_string(), value);
    }
    rpc.call(Value::Object(request)).await
}
