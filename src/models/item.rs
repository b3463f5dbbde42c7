use serde::{Deserialize, Serialize};

/// One entry of the board's unclaimed list as rendered at read time.
///
/// Identity is the label text. `position` is only meaningful within the
/// listing that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub label: String,
    pub position: usize,
}

impl Item {
    pub fn new(label: impl Into<String>, position: usize) -> Self {
        Self {
            label: label.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Unresolved,
    Claimed,
    Missed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Unresolved => "Unresolved",
            Outcome::Claimed => "Claimed",
            Outcome::Missed => "Missed",
        }
    }
}
