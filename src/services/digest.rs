//! Daily digest: every object whose latest record falls on the previous UTC
//! day, rendered as an HTML table and mailed to a fixed recipient.

use crate::models::record::ObjectRecord;
use crate::services::mailer::{DeliveryError, Mailer};
use crate::services::metadata_store::{MetadataError, MetadataStore, TimeFilter, TimeWindow};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error("no previous day before {now}: timestamp out of range")]
    WindowOutOfRange { now: DateTime<Utc> },
}

/// Bounds of the calendar day (UTC) before `now`: midnight to 23:59:59.
///
/// `None` when `now` is within a day of the earliest representable time.
pub fn previous_day_window(now: DateTime<Utc>) -> Option<TimeWindow> {
    let previous = now.checked_sub_signed(Duration::hours(24))?;
    let start = previous
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_utc()
        .timestamp();
    Some(TimeWindow::new(start, start + SECONDS_PER_DAY - 1))
}

/// `Summary Email for May 5, 2023` for the day the window covers.
pub fn digest_subject(window: &TimeWindow) -> String {
    let day = Utc
        .timestamp_opt(window.start, 0)
        .single()
        .map(|t| t.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|| window.start.to_string());
    format!("Summary Email for {}", day)
}

fn format_timestamp(timestamp: i64) -> String {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %-I:%M:%S %p").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

const HEADER_STYLE: &str =
    "background-color:#54585d;color:#ffffff;font-weight:bold;font-size:13px;border:1px solid #54585d;padding:8px;";
const CELL_STYLE: &str = "color:#636363;border:1px solid #dddfe1;padding:12px;";

/// Render the digest body. Rows are ordered by time, then name.
pub fn render_report(records: &[ObjectRecord], window: &TimeWindow) -> String {
    let mut rows: Vec<&ObjectRecord> = records.iter().collect();
    rows.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut html = String::from("<html><body>");
    html.push_str(&format!(
        "<p>Objects uploaded between {} and {} (GMT): {}</p>",
        format_timestamp(window.start),
        format_timestamp(window.end),
        rows.len()
    ));
    html.push_str(r#"<table style="border-collapse:collapse;font-family:Tahoma,Geneva,sans-serif;"><tr>"#);
    for title in [
        "Name",
        "URI",
        "Type",
        "Size (Byte)",
        "Last Modified Time (GMT)",
        "Thumbnail",
    ] {
        html.push_str(&format!(r#"<th style="{}">{}</th>"#, HEADER_STYLE, title));
    }
    html.push_str("</tr>");

    for record in rows {
        html.push_str(r#"<tr style="background-color:#f9fafb;">"#);
        for cell in [
            record.name.clone(),
            record.source_uri.clone(),
            record.kind.to_string(),
            record.size.to_string(),
            format_timestamp(record.last_modified),
            record.thumbnail_uri.clone(),
        ] {
            html.push_str(&format!(
                r#"<td style="{}">{}</td>"#,
                CELL_STYLE,
                html_escape(&cell)
            ));
        }
        html.push_str("</tr>");
    }

    html.push_str("</table></body></html>");
    html
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Outcome of one digest invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DigestReport {
    pub window: TimeWindow,
    pub subject: String,
    pub recipient: String,
    pub objects: usize,
}

#[derive(Clone)]
pub struct DigestComposer {
    metadata: MetadataStore,
    mailer: Arc<dyn Mailer>,
    recipient: String,
}

impl DigestComposer {
    pub fn new(metadata: MetadataStore, mailer: Arc<dyn Mailer>, recipient: impl Into<String>) -> Self {
        Self {
            metadata,
            mailer,
            recipient: recipient.into(),
        }
    }

    /// Build and send the digest for the day before `now`.
    ///
    /// Read and send failures are returned as-is; nothing is retried.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<DigestReport, DigestError> {
        let window = match previous_day_window(now) {
            Some(window) => window,
            None => {
                error!(%now, "digest time has no previous day");
                return Err(DigestError::WindowOutOfRange { now });
            }
        };

        let records = match self.metadata.read_filtered(TimeFilter::Window(window)).await {
            Ok(records) => records,
            Err(err) => {
                error!(
                    window_start = window.start,
                    window_end = window.end,
                    error = %err,
                    "error while fetching metadata for digest"
                );
                return Err(err.into());
            }
        };

        let subject = digest_subject(&window);
        let body = render_report(&records, &window);

        if let Err(err) = self.mailer.send(&subject, &body, &self.recipient).await {
            error!(recipient = %self.recipient, error = %err, "error while sending digest email");
            return Err(err.into());
        }

        info!(
            recipient = %self.recipient,
            objects = records.len(),
            window_start = window.start,
            window_end = window.end,
            "digest email sent"
        );
        Ok(DigestReport {
            window,
            subject,
            recipient: self.recipient.clone(),
            objects: records.len(),
        })
    }
}
