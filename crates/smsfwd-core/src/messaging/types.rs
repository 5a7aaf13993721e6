use crate::domain::{ChatId, UserId};

/// Incoming free-text (or command) message from an operator.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
}

/// Persistent reply keyboard, rows of button labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
}

impl ReplyKeyboard {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// Lay `labels` out `per_row` to a row, then append `footer` as its own row.
    pub fn grid(labels: &[String], per_row: usize, footer: Option<&str>) -> Self {
        let mut rows: Vec<Vec<String>> = labels
            .chunks(per_row.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();
        if let Some(f) = footer {
            rows.push(vec![f.to_string()]);
        }
        Self { rows }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|s| s.as_str())
    }
}

/// Transport-neutral reply to an operator turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub html: String,
    pub keyboard: ReplyKeyboard,
}

impl Reply {
    pub fn new(html: impl Into<String>, keyboard: ReplyKeyboard) -> Self {
        Self {
            html: html.into(),
            keyboard,
        }
    }
}
