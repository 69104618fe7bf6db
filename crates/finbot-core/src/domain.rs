use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Opaque identity of a chat participant, as the transport spells it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a money movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    /// Label used by the classifier and written to the sheet.
    pub fn label(self) -> &'static str {
        match self {
            TransactionKind::Income => "receita",
            TransactionKind::Expense => "despesa",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "receita" => Some(TransactionKind::Income),
            "despesa" => Some(TransactionKind::Expense),
            _ => None,
        }
    }
}

/// Closed set of spending categories the classifier may choose from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Food,
    Transport,
    Housing,
    Leisure,
    Health,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Food,
        Category::Transport,
        Category::Housing,
        Category::Leisure,
        Category::Health,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Food => "alimentação",
            Category::Transport => "transporte",
            Category::Housing => "moradia",
            Category::Leisure => "lazer",
            Category::Health => "saúde",
            Category::Other => "outros",
        }
    }

    /// Case-insensitive; also accepts the unaccented spellings models
    /// sometimes emit.
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "alimentação" | "alimentacao" => Some(Category::Food),
            "transporte" => Some(Category::Transport),
            "moradia" => Some(Category::Housing),
            "lazer" => Some(Category::Leisure),
            "saúde" | "saude" => Some(Category::Health),
            "outros" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Structured result of classifying one message.
///
/// Constructed only through `classifier::parse_record`, which enforces
/// `amount >= 0` and the closed kind/category sets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedRecord {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub category: Category,
    pub occurred_on: NaiveDate,
    pub user_facing_summary: String,
}

/// One reply to send back through the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub recipient: SenderId,
    pub text: String,
}
