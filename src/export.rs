use crate::metrics::MetricField;
use crate::session::Session;
use chrono::DateTime;

pub const REPORT_WIDTH: usize = 80;
pub const DEFAULT_LINES_PER_PAGE: usize = 50;

pub fn export_file_name(session: &Session, ext: &str) -> String {
    format!("session_{}.{}", session.id, ext)
}

/// One row per timeline entry, two decimals
pub fn to_csv(session: &Session) -> String {
    let mut out = String::from("Timestamp");
    for field in MetricField::ALL {
        out.push(',');
        out.push_str(field.label());
    }
    out.push('\n');

    for sample in &session.timeline {
        out.push_str(&format!("{:.2}", sample.timestamp));
        for field in MetricField::ALL {
            out.push_str(&format!(",{:.2}", sample.get(field)));
        }
        out.push('\n');
    }
    out
}

fn format_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Greedy word wrap; words longer than `width` are split
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                lines.push(word.drain(..width).collect());
            }
            let word: String = word.into_iter().collect();
            if word.is_empty() {
                continue;
            }
            let needed = if line.is_empty() { word.chars().count() } else { line.chars().count() + 1 + word.chars().count() };
            if needed > width {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&word);
        }
        lines.push(line);
    }
    lines
}

/// Paginated plain-text report. Each page ends with a `Page i of n` footer.
pub fn render_report(session: &Session, user_name: &str, lines_per_page: usize) -> Vec<String> {
    let a = &session.averages;
    let mut body = vec![
        session.title.clone().unwrap_or_else(|| "NeuroSignal Session".to_string()),
        String::new(),
        format!("Date: {}", format_date(&session.date)),
        format!("Duration: {} seconds", session.duration),
        format!("User: {}", user_name),
        String::new(),
        "Summary Metrics".to_string(),
        format!("Anxiety Avg: {}%", a.anxiety),
        format!("Stress Avg: {}%", a.stress),
        format!("Confidence Avg: {}%", a.confidence),
        format!("Deception Indicators: {}%", a.deception),
        format!("Excitement Avg: {}%", a.excitement),
        format!("Aggression Avg: {}%", a.aggression),
        format!("Boredom Avg: {}%", a.boredom),
        format!("Empathy Avg: {}%", a.empathy),
    ];

    if !session.snapshots.is_empty() {
        body.push(String::new());
        body.push("Snapshots".to_string());
        for snap in &session.snapshots {
            body.push(format!("{:.0}s  {}", snap.timestamp, snap.trigger_type));
        }
    }

    if let Some(notes) = &session.user_notes {
        body.push(String::new());
        body.push("Notes:".to_string());
        body.extend(wrap_text(notes, REPORT_WIDTH));
    }

    let per_page = lines_per_page.max(1);
    let chunks: Vec<&[String]> = body.chunks(per_page).collect();
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, lines)| {
            let mut page = lines.join("\n");
            page.push_str(&format!("\n\nPage {} of {}", i + 1, total));
            page
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Averages, MetricVector};
    use crate::session::FrameSnapshot;

    fn session() -> Session {
        Session {
            id: "abc".to_string(),
            user_id: "u".to_string(),
            date: "2025-03-04T10:15:00+00:00".to_string(),
            duration: 2,
            timeline: vec![
                MetricVector { timestamp: 0.0, anxiety: 12.346, ..Default::default() },
                MetricVector { timestamp: 1.0, blink_rate: 20.0, ..Default::default() },
            ],
            snapshots: vec![FrameSnapshot {
                id: "s".into(),
                timestamp: 1.0,
                image_url: None,
                trigger_type: "High Anxiety".into(),
            }],
            user_notes: Some("Felt fine.".to_string()),
            title: None,
            averages: Averages { anxiety: 6, ..Default::default() },
        }
    }

    #[test]
    fn test_csv_rows() {
        let csv = to_csv(&session());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Timestamp,Anxiety,"));
        assert_eq!(lines[0].split(',').count(), 12);
        assert!(lines[1].starts_with("0.00,12.35,"));
        assert!(lines[2].ends_with(",20.00"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(export_file_name(&session(), "csv"), "session_abc.csv");
    }

    #[test]
    fn test_wrap_text() {
        let wrapped = wrap_text("aaa bbb ccc", 7);
        assert_eq!(wrapped, vec!["aaa bbb", "ccc"]);
        assert_eq!(wrap_text("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap_text(&"word ".repeat(100), 80).iter().all(|l| l.len() <= 80));
    }

    #[test]
    fn test_report_single_page() {
        let pages = render_report(&session(), "Ada", 100);
        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert!(page.starts_with("NeuroSignal Session"));
        assert!(page.contains("Date: 2025-03-04 10:15"));
        assert!(page.contains("User: Ada"));
        assert!(page.contains("Anxiety Avg: 6%"));
        assert!(page.contains("1s  High Anxiety"));
        assert!(page.contains("Felt fine."));
        assert!(page.ends_with("Page 1 of 1"));
    }

    #[test]
    fn test_report_paginates() {
        let mut long = session();
        long.user_notes = Some("note ".repeat(400));
        let pages = render_report(&long, "Ada", 10);
        assert!(pages.len() > 2);
        let n = pages.len();
        assert!(pages[0].ends_with(&format!("Page 1 of {}", n)));
        assert!(pages[n - 1].ends_with(&format!("Page {} of {}", n, n)));
    }
}
