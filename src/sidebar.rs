// src/sidebar.rs

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Local, Utc};

use crate::types::Session;

pub const PINNED_GROUP: &str = "PINNED";
pub const SYSTEM_GROUP: &str = "SYSTEM";
pub const UNTITLED: &str = "New Session";

/// Pinned first, then newest first.
pub fn sort_sessions(sessions: &[Session]) -> Vec<Session> {
    let mut sorted = sessions.to_vec();
    sorted.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });
    sorted
}

fn local_time(ts: i64) -> Option<DateTime<Local>> {
    DateTime::<Utc>::from_timestamp_millis(ts).map(|t| t.with_timezone(&Local))
}

fn month_key(ts: i64) -> String {
    if ts == 0 {
        return SYSTEM_GROUP.to_string();
    }
    match local_time(ts) {
        Some(t) if t.format("%Y-%m").to_string() != "1970-01" => t.format("%Y-%m").to_string(),
        _ => SYSTEM_GROUP.to_string(),
    }
}

fn format_date(ts: i64) -> String {
    local_time(ts)
        .map(|t| t.format("%Y/%m/%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Sidebar groups in display order: (label, sessions).
pub fn group_sessions(sessions: &[Session]) -> Vec<(String, Vec<Session>)> {
    let sorted = sort_sessions(sessions);
    let (pinned, rest): (Vec<Session>, Vec<Session>) = sorted.into_iter().partition(|s| s.pinned);

    let mut months: BTreeMap<String, Vec<Session>> = BTreeMap::new();
    let mut system = Vec::new();
    for session in rest {
        match month_key(session.timestamp) {
            key if key == SYSTEM_GROUP => system.push(session),
            key => months.entry(key).or_default().push(session),
        }
    }

    let mut groups = Vec::new();
    if !pinned.is_empty() {
        groups.push((PINNED_GROUP.to_string(), pinned));
    }
    groups.extend(months.into_iter().rev());
    if !system.is_empty() {
        groups.push((SYSTEM_GROUP.to_string(), system));
    }
    groups
}

fn write_item(out: &mut String, session: &Session, active_id: Option<&str>) {
    let title = if session.title.is_empty() {
        UNTITLED.to_string()
    } else {
        html_escape::encode_text(&session.title).into_owned()
    };
    let active = if active_id == Some(session.id.as_str()) {
        " active"
    } else {
        ""
    };
    let pinned = if session.pinned { " pinned" } else { "" };

    let _ = write!(
        out,
        "<div class=\"history-item{active}\" data-session-id=\"{id}\" data-session-pinned=\"{is_pinned}\">\
<div class=\"history-info\"><div class=\"history-title\" title=\"Double click to rename\">{title}</div>\
<div class=\"history-date\">{date}</div></div>\
<button class=\"history-btn history-pin-btn{pinned}\" title=\"Pin/Unpin this session\"></button>\
<button class=\"history-btn history-del-btn\"></button></div>",
        id = html_escape::encode_double_quoted_attribute(&session.id),
        is_pinned = session.pinned,
        date = format_date(session.timestamp),
    );
}

pub fn render_sidebar_html(sessions: &[Session], active_id: Option<&str>) -> String {
    let mut out = String::new();
    for (label, group) in group_sessions(sessions) {
        let class = if label == PINNED_GROUP {
            "history-group pinned-group"
        } else {
            "history-group"
        };
        let _ = write!(
            out,
            "<details class=\"{class}\" open=\"\"><summary class=\"history-group-title\">{label}</summary>"
        );
        for session in &group {
            write_item(&mut out, session, active_id);
        }
        out.push_str("</details>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::html::parse_fragment;

    const MAR_2024: i64 = 1_710_000_000_000;
    const JUN_2024: i64 = 1_718_000_000_000;

    fn session(id: &str, ts: i64, pinned: bool) -> Session {
        Session {
            id: id.into(),
            title: format!("title {id}"),
            timestamp: ts,
            pinned,
        }
    }

    #[test]
    fn pinned_first_then_newest() {
        let sorted = sort_sessions(&[
            session("a", 1, false),
            session("b", 3, false),
            session("c", 2, true),
            session("d", 0, true),
        ]);
        let ids: Vec<&str> = sorted.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "b", "a"]);
    }

    #[test]
    fn groups_by_month_with_system_last() {
        let groups = group_sessions(&[
            session("welcome", 0, false),
            session("old", MAR_2024, false),
            session("new", JUN_2024, false),
            session("pin", MAR_2024, true),
        ]);
        let labels: Vec<&str> = groups.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels[0], PINNED_GROUP);
        assert_eq!(*labels.last().unwrap(), SYSTEM_GROUP);
        assert_eq!(labels.len(), 4);
        assert!(labels[1] > labels[2]);
    }

    #[test]
    fn html_escapes_titles_and_marks_active() {
        let mut s = session("s1", JUN_2024, false);
        s.title = "<b>x</b>".into();
        let blank = Session::new("s2".into(), String::new(), JUN_2024 - 1);

        let html = render_sidebar_html(&[s, blank], Some("s1"));
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
        assert!(html.contains(UNTITLED));

        let nodes = parse_fragment(&html);
        let group = nodes[0].as_element().unwrap();
        let active = group.find_class("active").unwrap();
        assert_eq!(active.attr("data-session-id"), Some("s1"));
    }
}
