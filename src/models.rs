//! Entity definitions: users, blogs, comments.
//!
//! `id` and `created_at` are generated at insert time by the declared schema
//! defaults, which is why they are `Option` on the structs — `None` before
//! the first save, `Some` ever after. Blogs and comments carry a denormalized
//! author snapshot (id, name, avatar) so list pages render without joins.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{next_id, now, Entity, FieldDef, FieldType, Schema};

fn generated_id() -> Value {
    Value::String(next_id())
}

fn generated_now() -> Value {
    Value::from(now())
}

fn id_field() -> FieldDef {
    FieldDef::new("id", FieldType::Text).primary().generated(generated_id)
}

fn created_at_field() -> FieldDef {
    FieldDef::new("created_at", FieldType::Real).generated(generated_now)
}

// ── User ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Option<String>,
    pub email: String,
    /// Stored password digest. Masked to `"******"` before any user record
    /// leaves the server.
    pub passwd: String,
    pub admin: bool,
    pub name: String,
    /// Avatar URL.
    pub image: String,
    pub created_at: Option<f64>,
}

static USER_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "users",
        vec![
            id_field(),
            FieldDef::new("email", FieldType::Text),
            FieldDef::new("passwd", FieldType::Text),
            FieldDef::new("admin", FieldType::Boolean).default_value(Value::Bool(false)),
            FieldDef::new("name", FieldType::Text),
            FieldDef::new("image", FieldType::Text),
            created_at_field(),
        ],
    )
});

impl Entity for User {
    fn schema() -> &'static Schema {
        &USER_SCHEMA
    }
}

impl User {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// Replaces the password digest with the wire mask.
    pub fn masked(mut self) -> Self {
        self.passwd = "******".into();
        self
    }
}

// ── Blog ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Blog {
    pub id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub user_image: String,
    /// Title.
    pub name: String,
    pub summary: String,
    pub content: String,
    pub created_at: Option<f64>,
}

static BLOG_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "blogs",
        vec![
            id_field(),
            FieldDef::new("user_id", FieldType::Text),
            FieldDef::new("user_name", FieldType::Text),
            FieldDef::new("user_image", FieldType::Text),
            FieldDef::new("name", FieldType::Text),
            FieldDef::new("summary", FieldType::Text),
            FieldDef::new("content", FieldType::Text),
            created_at_field(),
        ],
    )
});

impl Entity for Blog {
    fn schema() -> &'static Schema {
        &BLOG_SCHEMA
    }
}

impl Blog {
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }
}

// ── Comment ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Option<String>,
    /// Owning blog. Not enforced as a foreign key at this layer.
    pub blog_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_image: String,
    pub content: String,
    pub created_at: Option<f64>,
}

static COMMENT_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::new(
        "comments",
        vec![
            id_field(),
            FieldDef::new("blog_id", FieldType::Text),
            FieldDef::new("user_id", FieldType::Text),
            FieldDef::new("user_name", FieldType::Text),
            FieldDef::new("user_image", FieldType::Text),
            FieldDef::new("content", FieldType::Text),
            created_at_field(),
        ],
    )
});

impl Entity for Comment {
    fn schema() -> &'static Schema {
        &COMMENT_SCHEMA
    }
}

/// Schemas for every entity, in creation order. Used by test bootstrap.
pub fn all_schemas() -> Vec<&'static Schema> {
    vec![User::schema(), Blog::schema(), Comment::schema()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_schema_table_and_pk() {
        assert_eq!(User::schema().table, "users");
        assert_eq!(User::schema().primary_key(), "id");
    }

    #[test]
    fn masked_user_hides_digest() {
        let u = User {
            id: Some("u1".into()),
            email: "a@b.com".into(),
            passwd: "deadbeef".into(),
            admin: false,
            name: "Ann".into(),
            image: String::new(),
            created_at: Some(0.0),
        };
        assert_eq!(u.masked().passwd, "******");
    }
}
