use serde::{Deserialize, Serialize};

use crate::id::{CategoryId, GroupId, UserId};

/// Who owns a set of categories.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "owner_type", content = "owner_id", rename_all = "snake_case")]
pub enum CategoryOwner {
    User(UserId),
    Group(GroupId),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryType {
    Income,
    Expense,
}

/// An existing category the classifier may assign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub owner: CategoryOwner,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CategoryType,
    pub icon: String,
    pub color: String,
}
