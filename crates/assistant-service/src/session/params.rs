use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Everything the client declares when it opens a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionParams {
    pub prompt: String,
    pub token: String,
    /// Thread to resume, if any.
    pub thread_id: Option<String>,
    /// Minutes east of UTC.
    pub tz_offset_minutes: i32,
    /// Device actions the client can perform. Doubles as the capability list.
    pub actions: Vec<String>,
    pub widgets: Vec<String>,
    pub language: Option<String>,
    pub units: Option<String>,
    pub location: Option<Location>,
}

/// Raw query string of `/query`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub token: String,
    pub thread_id: Option<String>,
    pub tz_offset: Option<String>,
    pub actions: Option<String>,
    pub widgets: Option<String>,
    pub lang: Option<String>,
    pub units: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl SessionParams {
    /// Lenient: malformed optional values are dropped rather than rejected.
    pub fn from_query(query: QueryParams) -> Self {
        let location = match (query.lat.as_deref(), query.lon.as_deref()) {
            (Some(lat), Some(lon)) => match (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) {
                (Ok(lat), Ok(lon)) => Some(Location { lat, lon }),
                _ => None,
            },
            _ => None,
        };
        Self {
            tz_offset_minutes: query
                .tz_offset
                .as_deref()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0),
            actions: split_list(query.actions.as_deref()),
            widgets: split_list(query.widgets.as_deref()),
            thread_id: non_empty(query.thread_id),
            language: non_empty(query.lang),
            units: non_empty(query.units),
            prompt: query.prompt,
            token: query.token,
            location,
        }
    }

    pub fn from_pairs(pairs: &HashMap<String, String>) -> Self {
        let get = |k: &str| pairs.get(k).cloned();
        Self::from_query(QueryParams {
            prompt: get("prompt").unwrap_or_default(),
            token: get("token").unwrap_or_default(),
            thread_id: get("threadId"),
            tz_offset: get("tzOffset"),
            actions: get("actions"),
            widgets: get("widgets"),
            lang: get("lang"),
            units: get("units"),
            lat: get("lat"),
            lon: get("lon"),
        })
    }

    pub fn supports_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }

    pub fn supports_widget(&self, widget: &str) -> bool {
        self.widgets.iter().any(|w| w == widget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> HashMap<String, String> {
        list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_full_query() {
        let params = SessionParams::from_pairs(&pairs(&[
            ("prompt", "set a timer"),
            ("token", "abc"),
            ("threadId", "t-1"),
            ("tzOffset", "-420"),
            ("actions", "set_alarm,get_alarm,named_alarms"),
            ("widgets", "timer,weather"),
            ("lang", "en_GB"),
            ("units", "metric"),
            ("lat", "37.77"),
            ("lon", "-122.42"),
        ]));

        assert_eq!(params.prompt, "set a timer");
        assert_eq!(params.thread_id.as_deref(), Some("t-1"));
        assert_eq!(params.tz_offset_minutes, -420);
        assert!(params.supports_action("named_alarms"));
        assert!(params.supports_widget("weather"));
        assert_eq!(params.location, Some(Location { lat: 37.77, lon: -122.42 }));
    }

    #[test]
    fn test_empty_lists_declare_nothing() {
        let params = SessionParams::from_pairs(&pairs(&[("actions", ""), ("widgets", "")]));
        assert!(params.actions.is_empty());
        assert!(params.widgets.is_empty());
        assert_eq!(params.thread_id, None);
    }

    #[test]
    fn test_bad_optional_values_are_dropped() {
        let params = SessionParams::from_pairs(&pairs(&[
            ("tzOffset", "east"),
            ("lat", "1.0"),
            ("lon", "west"),
            ("threadId", "  "),
        ]));
        assert_eq!(params.tz_offset_minutes, 0);
        assert_eq!(params.location, None);
        assert_eq!(params.thread_id, None);
    }

    #[test]
    fn test_location_needs_both_coordinates() {
        let params = SessionParams::from_pairs(&pairs(&[("lat", "1.0")]));
        assert_eq!(params.location, None);
    }
}
