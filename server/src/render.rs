//! HTML page and chat-embed payload built from an aggregated status

use chrono::SecondsFormat;
use serde::Serialize;
use shared::{AggregatedStatus, RegionGroup};

pub const DEFAULT_EMBED_TITLE: &str = "Among Us Server Status";
pub const DEFAULT_EMBED_URL: &str = "https://among-us-server-status.herokuapp.com/";

const IP_COLUMN_WIDTH: usize = 15;
const CONNECTIONS_COLUMN_WIDTH: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedConfig {
    pub title: String,
    pub url: String,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_EMBED_TITLE.to_string(),
            url: DEFAULT_EMBED_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmbedResponse {
    pub embed: Embed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub timestamp: String,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Formats a count with comma thousands separators: 12345 -> "12,345"
pub fn format_connections(count: u32) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Monospaced table of one region: address, then right-aligned players
fn region_table(group: &RegionGroup) -> String {
    let rows: Vec<String> = group
        .servers
        .iter()
        .map(|server| {
            format!(
                "{:<ip_width$} {:>conn_width$} players",
                server.ip_address,
                format_connections(server.number_of_connections),
                ip_width = IP_COLUMN_WIDTH,
                conn_width = CONNECTIONS_COLUMN_WIDTH,
            )
        })
        .collect();

    format!("```\n{}\n```", rows.join("\n"))
}

pub fn build_embed(status: &AggregatedStatus, config: &EmbedConfig) -> EmbedResponse {
    let fields = status
        .groups
        .iter()
        .map(|group| EmbedField {
            name: format!("{} {}", group.region.emoji(), group.region.display_name()),
            value: region_table(group),
            inline: false,
        })
        .collect();

    EmbedResponse {
        embed: Embed {
            title: config.title.clone(),
            url: config.url.clone(),
            timestamp: status
                .computed_at
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            fields,
        },
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{}</title>\n</head>\n<body>\n<h1>{}</h1>\n{}</body>\n</html>\n",
        escape_html(title),
        escape_html(title),
        body
    )
}

/// Index page with one table per region
pub fn render_index(status: &AggregatedStatus, title: &str) -> String {
    let mut body = String::new();

    if status.is_empty() {
        body.push_str("<p>No master servers reported any regional servers.</p>\n");
    }

    for group in &status.groups {
        body.push_str(&format!(
            "<section>\n<h2>{} {}</h2>\n<table>\n<thead><tr><th>Name</th><th>Address</th>\
             <th>Port</th><th>Players</th></tr></thead>\n<tbody>\n",
            group.region.emoji(),
            escape_html(group.region.display_name())
        ));
        for server in &group.servers {
            body.push_str(&format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&server.name),
                escape_html(&server.ip_address),
                server.port,
                format_connections(server.number_of_connections)
            ));
        }
        body.push_str("</tbody>\n</table>\n</section>\n");
    }

    body.push_str(&format!(
        "<p>Last update: <time datetime=\"{ts}\">{ts}</time></p>\n",
        ts = status.computed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    page(title, &body)
}

/// Page served while no status can be produced
pub fn render_unavailable(title: &str, last_known: Option<&AggregatedStatus>) -> String {
    let mut body = String::from("<p>Server status is temporarily unavailable.</p>\n");
    if let Some(status) = last_known {
        body.push_str(&format!(
            "<p>Last successful update: {}</p>\n",
            status.computed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    page(title, &body)
}
