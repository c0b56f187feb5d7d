use super::{Widget, WidgetContext};
use crate::session::SessionParams;
use async_trait::async_trait;
use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

lazy_static! {
    static ref TIMER_RE: Regex = Regex::new(
        r#"<!TIMER targetTime=[\["]?(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d{0,5})?(?:Z|[+-](?:\d{4}|\d\d:\d\d)))[\]"!]? ?(?: name=[\["]?(.*?)[\]"]?)?[!/]>"#
    )
    .unwrap();
    static ref WEATHER_RE: Regex = Regex::new(
        r#"<!WEATHER-(CURRENT|SINGLE-DAY|MULTI-DAY) location=[\["]?(.+?)[\]"!]? units=[\["]?(imperial|metric|uk hybrid)[\]"!]?(?: day=[\["]?(.+?)[\]"]?)?[!/]>"#
    )
    .unwrap();
    static ref NUMBER_RE: Regex = Regex::new(
        r#"<!NUMERIC-ANSWER number=[\["]?(.+?)[\]"!]? ?(?: unit=[\["]?(.*?)[\]"]?)?[!/]>"#
    )
    .unwrap();
    static ref POI_RE: Regex = Regex::new(
        r#"<!POI-MAP poiKeys=[\["]?(.+?)[\]"!]? ?(?: showCurrentLocation=[\["]?(true|false)[\]"]?)?[!/]>"#
    )
    .unwrap();
    static ref ROUTE_RE: Regex =
        Regex::new(r#"<!ROUTE-MAP showMostRecentRoute=[\["]?true[\]"]?[!/]>"#).unwrap();
}

/// Turns one complete widget tag into a payload.
#[async_trait]
pub trait WidgetRenderer: Send + Sync {
    async fn render(&self, tag: &str, params: &SessionParams, context: &WidgetContext) -> anyhow::Result<Widget>;
}

/// Renders everything that can be built from session state alone. Weather
/// needs a forecast provider and always fails here.
#[derive(Debug, Default, Clone)]
pub struct DefaultWidgetRenderer;

#[async_trait]
impl WidgetRenderer for DefaultWidgetRenderer {
    async fn render(&self, tag: &str, params: &SessionParams, context: &WidgetContext) -> anyhow::Result<Widget> {
        if let Some(caps) = WEATHER_RE.captures(tag) {
            warn!("weather widget for {:?} requested without a forecast provider", &caps[2]);
            return Err(anyhow::anyhow!("error processing weather widget: no forecast provider"));
        }
        if let Some(caps) = TIMER_RE.captures(tag) {
            return timer_widget(&caps[1], caps.get(2).map_or("", |m| m.as_str()));
        }
        if let Some(caps) = NUMBER_RE.captures(tag) {
            return Ok(number_widget(&caps[1], caps.get(2).map_or("", |m| m.as_str())));
        }
        if let Some(caps) = POI_RE.captures(tag) {
            let show_location = caps.get(2).map_or(false, |m| m.as_str().eq_ignore_ascii_case("true"));
            return poi_widget(&caps[1], show_location, params, context);
        }
        if ROUTE_RE.is_match(tag) {
            return route_widget(context);
        }
        Err(anyhow::anyhow!("unknown widget {:?}", tag))
    }
}

fn timer_widget(target_time: &str, name: &str) -> anyhow::Result<Widget> {
    let parsed = DateTime::parse_from_rfc3339(target_time)
        .or_else(|_| DateTime::parse_from_str(target_time, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(target_time, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map_err(|e| anyhow::anyhow!("error processing timer widget: {}", e))?;
    let mut content = json!({"target_time": parsed.to_rfc3339()});
    let name = name.trim();
    if !name.is_empty() {
        content["name"] = json!(name);
    }
    Ok(Widget::new("timer", content))
}

fn number_widget(number: &str, unit: &str) -> Widget {
    let unit = unit.trim();
    let mut content = json!({"number": number});
    if !unit.is_empty() && !unit.eq_ignore_ascii_case("none") {
        content["unit"] = json!(unit);
    }
    Widget::new("number", content)
}

/// `poiKeys` is a comma-separated list of `index:label` pairs into the last
/// place search. Bad pairs are skipped.
fn poi_widget(
    keys: &str,
    show_location: bool,
    params: &SessionParams,
    context: &WidgetContext,
) -> anyhow::Result<Widget> {
    let keys = keys.replace('"', "");
    let mut markers = Vec::new();
    for marker in keys.split(',') {
        let Some((index, label)) = marker.split_once(':') else {
            continue;
        };
        let Ok(index) = index.trim().parse::<usize>() else {
            debug!("Error parsing POI index {:?}", index);
            continue;
        };
        match context.pois.get(index) {
            Some(poi) => markers.push(json!({"label": label.trim(), "lat": poi.lat, "lon": poi.lon})),
            None => debug!("Index {} out of range for POI results", index),
        }
    }
    if markers.is_empty() {
        return Err(anyhow::anyhow!("error processing map widget: no usable markers"));
    }
    let mut content = json!({"markers": markers});
    if show_location {
        if let Some(location) = params.location {
            content["user_location"] = json!({"lat": location.lat, "lon": location.lon});
        }
    }
    Ok(Widget::new("map", content))
}

fn route_widget(context: &WidgetContext) -> anyhow::Result<Widget> {
    match &context.last_route {
        Some(route) => Ok(Widget::new("map", json!({"route": route}))),
        None => Err(anyhow::anyhow!("error processing route widget: no route calculated")),
    }
}
