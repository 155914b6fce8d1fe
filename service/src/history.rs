use std::{collections::VecDeque, sync::Mutex};

use chrono::{DateTime, Utc};

struct HistoryEvent {
    timestamp: DateTime<Utc>,
    description: String,
}

/// A bounded log of membership events kept for operators. The oldest event is dropped once
/// the log is full; a maximum length of zero disables recording.
pub struct MembershipHistory {
    max_length: usize,
    events: Mutex<VecDeque<HistoryEvent>>,
}

impl MembershipHistory {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            events: Mutex::new(VecDeque::with_capacity(max_length.min(128))),
        }
    }

    pub fn record(self: &Self, description: impl Into<String>) {
        if self.max_length == 0 {
            return;
        }

        let mut events = self.events.lock().unwrap();
        events.push_back(HistoryEvent {
            timestamp: Utc::now(),
            description: description.into(),
        });
        while events.len() > self.max_length {
            events.pop_front();
        }
    }

    pub fn len(self: &Self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(self: &Self) -> bool {
        self.len() == 0
    }

    pub fn max_length(self: &Self) -> usize {
        self.max_length
    }

    /// One line per event, oldest first
    pub fn show(self: &Self) -> String {
        let events = self.events.lock().unwrap();
        let mut text = String::new();
        for event in events.iter() {
            text.push_str(&format_event(event));
            text.push('\n');
        }
        text
    }

    pub fn show_as_xml(self: &Self) -> String {
        let events = self.events.lock().unwrap();
        let mut xml = String::from("<events>\n");
        for event in events.iter() {
            xml.push_str("   <event>\n      ");
            xml.push_str(&escape_xml(&format_event(event)));
            xml.push_str("\n   </event>\n");
        }
        xml.push_str("</events>\n");
        xml
    }
}

fn format_event(event: &HistoryEvent) -> String {
    format!("{} : {}", event.timestamp.to_rfc3339(), event.description)
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
