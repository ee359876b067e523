use chrono::{DateTime, Local};
use fgsim_core::ActionError;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// One modal message; errors from the server keep their `code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
    pub code: Option<u16>,
    pub at: DateTime<Local>,
}

impl Notice {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            title: title.into(),
            message: message.into(),
            code: None,
            at: Local::now(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            message: message.into(),
            code: None,
            at: Local::now(),
        }
    }

    pub fn from_action_error(title: impl Into<String>, err: &ActionError) -> Self {
        Self {
            code: Some(err.code),
            ..Self::error(title, err.reason.clone())
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

pub trait Notifier {
    fn notify(&mut self, notice: Notice);
}

/// Notices waiting for the operator to dismiss them, oldest first.
#[derive(Debug, Default)]
pub struct NoticeQueue {
    pending: VecDeque<Notice>,
}

impl NoticeQueue {
    pub fn current(&self) -> Option<&Notice> {
        self.pending.front()
    }

    pub fn dismiss(&mut self) -> Option<Notice> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.pending.iter()
    }
}

impl Notifier for NoticeQueue {
    fn notify(&mut self, notice: Notice) {
        self.pending.push_back(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_dismissed_in_arrival_order() {
        let mut queue = NoticeQueue::default();
        queue.notify(Notice::info("Saved", "manifest saved"));
        queue.notify(Notice::from_action_error(
            "Save failed",
            &ActionError::new(409, "file already exists"),
        ));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dismiss().map(|n| n.title), Some("Saved".to_string()));
        let current = queue.current().expect("second notice");
        assert!(current.is_error());
        assert_eq!(current.code, Some(409));
        queue.dismiss();
        assert!(queue.is_empty());
    }
}
