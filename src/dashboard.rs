//! ==============================================================================
//! dashboard.rs - dashboard aggregation and html rendering
//! ==============================================================================
//!
//! purpose:
//!     summarize the in-memory window (messages, readings, sensor types,
//!     devices) and render the latest message's readings as an html table.
//!
//! relationships:
//!     - reads: store.rs (borrow_all for totals, latest_one for the table)
//!     - used by: web.rs (GET /dashboard, GET /)
//!
//! ==============================================================================

use crate::domain::NormalizedReading;
use crate::store::MessageStore;

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// readings of the latest message shown on the dashboard
pub const MAX_DASHBOARD_READINGS: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub has_data: bool,
    pub total_messages: usize,
    pub total_readings: usize,
    pub sensor_type_count: usize,
    pub device_count: usize,
    pub latest_readings: Vec<NormalizedReading>,
}

impl DashboardData {
    pub fn collect(store: &MessageStore) -> Self {
        let mut data = Self::default();
        if store.is_empty() {
            return data;
        }

        // totals straight off the locked window; guard dropped at block end
        {
            let messages = store.borrow_all();

            let mut sensor_types = HashSet::new();
            let mut devices = HashSet::new();
            for message in messages.iter() {
                data.total_readings += message.total_readings;
                devices.insert(message.device_id.as_str());
                sensor_types.extend(message.sensor_types.iter().map(String::as_str));
            }

            data.has_data = true;
            data.total_messages = messages.len();
            data.sensor_type_count = sensor_types.len();
            data.device_count = devices.len();
        }

        if let Some(latest) = store.latest_one() {
            data.latest_readings = latest
                .readings
                .iter()
                .take(MAX_DASHBOARD_READINGS)
                .cloned()
                .collect();
        }

        data
    }
}

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
     .replace('<', "&lt;")
     .replace('>', "&gt;")
     .replace('"', "&quot;")
}

const STYLE: &str = r#"
    body { font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }
    .cards { display: flex; gap: 1rem; flex-wrap: wrap; margin-bottom: 2rem; }
    .card { background: #16213e; padding: 1rem 1.5rem; border-radius: 8px; min-width: 10rem; }
    .card b { display: block; font-size: 1.8rem; color: #4ecca3; }
    table { border-collapse: collapse; width: 100%; }
    td, th { padding: 0.4rem 0.8rem; border-bottom: 1px solid #333; text-align: left; vertical-align: top; }
    .muted { color: #888; }
"#;

pub fn render_dashboard(data: &DashboardData) -> String {
    let mut body = String::new();

    body.push_str(&format!(
        r#"<div class="cards">
    <div class="card"><b>{}</b>messages</div>
    <div class="card"><b>{}</b>readings</div>
    <div class="card"><b>{}</b>sensor types</div>
    <div class="card"><b>{}</b>devices</div>
</div>"#,
        data.total_messages, data.total_readings, data.sensor_type_count, data.device_count
    ));

    if !data.has_data {
        body.push_str(r#"<p class="muted">no data yet - point the app's push url at <code>/data</code></p>"#);
    } else {
        body.push_str("<h2>latest readings</h2>\n<table>\n<tr><th>sensor</th><th>time</th><th>accuracy</th><th>values</th></tr>\n");
        for reading in &data.latest_readings {
            let values: Vec<String> = reading
                .values
                .iter()
                .map(|v| {
                    format!(
                        r#"<span title="{}">{}: {} {}</span>"#,
                        html_escape(&v.description),
                        html_escape(&v.name),
                        html_escape(&v.value_text),
                        html_escape(&v.unit)
                    )
                })
                .collect();
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                html_escape(&reading.sensor_type),
                html_escape(&reading.readable_time_text),
                html_escape(&reading.accuracy_text),
                values.join("<br>")
            ));
        }
        body.push_str("</table>");
    }

    page("sensor dashboard", &body)
}

pub fn render_index(stored: usize, last_received: Option<DateTime<Utc>>) -> String {
    let last = match last_received {
        Some(at) => format!("last message at {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => "waiting for the first message".to_string(),
    };
    let body = format!(
        r#"<p>hub is running, {} messages in memory, {}.</p>
<table>
<tr><td><code>POST /data</code></td><td>ingest endpoint for the streaming app</td></tr>
<tr><td><code>GET /dashboard</code></td><td>live dashboard</td></tr>
<tr><td><code>GET /api/data</code></td><td>in-memory messages</td></tr>
<tr><td><code>GET /api/latest?n=10</code></td><td>most recent messages</td></tr>
<tr><td><code>GET /api/db/data?limit=&amp;device=&amp;sensor=</code></td><td>stored messages</td></tr>
<tr><td><code>GET /api/db/devices</code></td><td>per-device statistics</td></tr>
<tr><td><code>GET /api/db/stats</code></td><td>storage totals</td></tr>
</table>"#,
        stored, last
    );
    page("sensor hub", &body)
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><meta http-equiv="refresh" content="5"><title>{title}</title><style>{STYLE}</style></head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>"#
    )
}
