use super::SessionParams;
use chrono::{DateTime, FixedOffset, Utc};

const LANGUAGES: &[(&str, &str)] = &[
    ("af", "Afrikaans"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("en", "English"),
    ("es", "Spanish"),
    ("fi", "Finnish"),
    ("fil", "Filipino"),
    ("fr", "French"),
    ("gl", "Galician"),
    ("hr", "Croatian"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("is", "Icelandic"),
    ("it", "Italian"),
    ("ko", "Korean"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("ms", "Malay"),
    ("nl", "Dutch"),
    ("no", "Norwegian"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sv", "Swedish"),
    ("sw", "Swahili"),
    ("tr", "Turkish"),
    ("zu", "Zulu"),
];

/// `en_US` and `EN` both resolve to "English".
pub fn language_name(code: &str) -> Option<&'static str> {
    let code = code.split('_').next().unwrap_or_default().to_ascii_lowercase();
    LANGUAGES.iter().find(|(c, _)| *c == code).map(|(_, name)| *name)
}

fn units_phrase(units: &str) -> Option<&'static str> {
    match units {
        "imperial" => Some("imperial units"),
        "metric" => Some("metric units"),
        "uk" | "uk hybrid" => Some("UK hybrid units (temperature in Celsius, wind speed in mph, etc.)"),
        "both" => Some("both imperial and metric units"),
        _ => None,
    }
}

fn time_sentence(params: &SessionParams, now: DateTime<Utc>) -> String {
    match FixedOffset::east_opt(params.tz_offset_minutes.saturating_mul(60)) {
        Some(zone) => format!(
            "The user's local time is {}. ",
            now.with_timezone(&zone).format("%a, %-d %b %Y %H:%M:%S%:z")
        ),
        None => String::new(),
    }
}

fn location_sentence(params: &SessionParams) -> String {
    match params.location {
        Some(location) => format!(
            "The user is near latitude {:.4}, longitude {:.4}. ",
            location.lat, location.lon
        ),
        None => "The user has not granted permission to access their location, but they could enable it on the \
                 settings page if needed. "
            .to_string(),
    }
}

fn language_sentence(params: &SessionParams) -> String {
    let mut sentence = String::new();
    if let Some(units) = params.units.as_deref().and_then(units_phrase) {
        sentence.push_str(&format!(
            "Give measurements in {}. Always specify the unit for temperature measurements. ",
            units
        ));
    }
    if let Some(language) = params.language.as_deref().and_then(language_name) {
        sentence.push_str(&format!("Respond in {}. ", language));
    }
    sentence
}

/// Map widgets are rendered when the model emits them but never advertised:
/// no registered tool records the places or routes they draw from.
fn widget_sentence(params: &SessionParams) -> String {
    let mut tags = String::new();
    if params.supports_widget("timer") {
        tags.push_str(
            "After setting a timer, show it with <!TIMER targetTime=[ISO 8601 time] name=[optional name]!>. ",
        );
    }
    if params.supports_widget("number") {
        tags.push_str(
            "When the answer is a single number, show it with <!NUMERIC-ANSWER number=[value] unit=[unit or none]!>. ",
        );
    }
    if tags.is_empty() {
        return tags;
    }
    format!(
        "You can show widgets by writing a tag on its own, which the watch renders in place of the tag. {}",
        tags
    )
}

/// Builds the system instruction for one generation request.
pub fn system_prompt(params: &SessionParams, now: DateTime<Utc>) -> String {
    let mut prompt = String::from(
        "You are a helpful assistant in the style of phone voice assistants. \
         Your name is Bobby, and you are running on a Pebble smartwatch. \
         The text you receive is transcribed from voice input. ",
    );
    prompt.push_str(&location_sentence(params));
    prompt.push_str(&time_sentence(params, now));
    prompt.push_str(
        "You may call multiple functions before responding to the user, if necessary. \
         If the user asks to set an alarm, assume they always want to set it for a time in the future. \
         As a creative, intelligent, helpful, friendly assistant, you should always try to answer the user's \
         question. Always try your best to answer the user's question. \
         **Never** claim to have taken an action (e.g. set a timer, alarm, or reminder) unless you have actually \
         used a tool to do so. \
         Even if in previous turns you have apparently taken an action (like setting an alarm) without using a \
         tool, you must still use tools if asked to do so again. \
         Your responses will be displayed on a very small screen, so be brief. Do not use markdown in your \
         responses. ",
    );
    prompt.push_str(&widget_sentence(params));
    prompt.push_str(&language_sentence(params));
    prompt
}
