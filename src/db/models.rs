use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Closed role set. Unknown strings from the database fall back to Regular
/// rather than failing the whole row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Regular,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Regular => "regular",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "owner" => Role::Owner,
            "admin" => Role::Admin,
            _ => Role::Regular,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Role::Owner)
    }

    /// Owner counts as admin for every admin-gated check.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub bio: Option<String>,
    pub avatar_path: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Column order: id, username, email, role, bio, avatar_path,
    /// password_hash, created_at, updated_at.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            role: Role::parse(&row.get::<_, String>(3)?),
            bio: row.get(4)?,
            avatar_path: row.get(5)?,
            password_hash: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub const COLUMNS: &'static str =
        "id, username, email, role, bio, avatar_path, password_hash, created_at, updated_at";
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_path: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Post {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Post {
            id: row.get(0)?,
            user_id: row.get(1)?,
            content: row.get(2)?,
            image_path: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    pub const COLUMNS: &'static str = "id, user_id, content, image_path, created_at, updated_at";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    PostCreated,
    PostLiked,
    UserFollowed,
    UserDeleted,
    PostDeleted,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::PostCreated => "post_created",
            ActivityType::PostLiked => "post_liked",
            ActivityType::UserFollowed => "user_followed",
            ActivityType::UserDeleted => "user_deleted",
            ActivityType::PostDeleted => "post_deleted",
        }
    }
}
