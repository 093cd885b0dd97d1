//! The blog application: page and API endpoints.
//!
//! Pages return template replies; APIs return mapping replies that the
//! normalizer serializes to JSON. Validation failures raise [`ApiError`]
//! and never reach the row mapper.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::bind::ParamSpec;
use crate::db::Limit;
use crate::error::{ApiError, Error};
use crate::handler::Args;
use crate::models::{Blog, Comment, User};
use crate::reply::Reply;
use crate::response::Response;
use crate::router::Router;
use crate::templates::text_to_html;
use crate::session::{COOKIE_NAME, MAX_AGE_SECS};

/// Registers every route of the blog with its parameter spec.
pub fn routes() -> Router {
    Router::new()
        // pages
        .get("/", index, ParamSpec::new().optional("page", "1"))
        .get("/blog/{id}", get_blog, ParamSpec::new())
        .get("/register", register, ParamSpec::new())
        .get("/signin", signin, ParamSpec::new())
        .get("/signout", signout, ParamSpec::new())
        // admin pages (gated by the auth middleware)
        .get("/manage/", manage, ParamSpec::new())
        .get("/manage/comments", manage_comments, ParamSpec::new().optional("page", "1"))
        .get("/manage/blogs", manage_blogs, ParamSpec::new().optional("page", "1"))
        .get("/manage/blogs/create", manage_create_blog, ParamSpec::new())
        .get("/manage/blogs/edit", manage_edit_blog, ParamSpec::new().required("id"))
        .get("/manage/users", manage_users, ParamSpec::new().optional("page", "1"))
        // JSON API
        .get("/api/blogs", api_blogs, ParamSpec::new().optional("page", "1"))
        .get("/api/blog/{id}", api_get_blog, ParamSpec::new())
        .get("/api/users", api_get_users, ParamSpec::new().optional("page", "1"))
        .get("/api/comments", api_comments, ParamSpec::new().optional("page", "1"))
        .post(
            "/api/users",
            api_register_user,
            ParamSpec::new().required("email").required("name").required("passwd"),
        )
        .post(
            "/api/authenticate",
            api_authenticate,
            ParamSpec::new().required("email").required("passwd"),
        )
        .post(
            "/api/blogs",
            api_create_blog,
            ParamSpec::new().required("name").required("summary").required("content"),
        )
        .post(
            "/api/blogs/{id}",
            api_update_blog,
            ParamSpec::new().required("name").required("summary").required("content"),
        )
        .post("/api/blogs/{id}/delete", api_delete_blog, ParamSpec::new())
        .post(
            "/api/blogs/{id}/comments",
            api_create_comment,
            ParamSpec::new().required("content"),
        )
        .post("/api/comments/{id}/delete", api_delete_comment, ParamSpec::new())
}

// ── Pagination ───────────────────────────────────────────────────────────────

/// Fixed page size for every listing.
const PAGE_SIZE: u32 = 10;

/// Pagination over `item_count` items, ten per page. Out-of-range indices
/// clamp to the first page.
#[derive(Debug, Clone, serde::Serialize, PartialEq)]
pub struct Page {
    pub item_count: i64,
    pub page_index: u32,
    pub page_size: u32,
    pub page_count: u32,
    pub offset: u32,
    pub limit: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl Page {
    pub fn new(item_count: i64, page_index: u32) -> Self {
        let page_index = page_index.max(1);
        let page_count = (item_count as u32).div_ceil(PAGE_SIZE);
        let (page_index, offset) = if item_count == 0 || page_index > page_count {
            (1, 0)
        } else {
            (page_index, PAGE_SIZE * (page_index - 1))
        };
        Self {
            item_count,
            page_index,
            page_size: PAGE_SIZE,
            page_count,
            offset,
            limit: PAGE_SIZE,
            has_next: page_index < page_count,
            has_previous: page_index > 1,
        }
    }

    fn window(&self) -> Limit {
        Limit::OffsetCount(self.offset, self.limit)
    }
}

/// Parses a page-index argument; anything unparseable or below one is
/// page one.
fn page_index(arg: Option<&str>) -> u32 {
    arg.and_then(|s| s.parse::<u32>().ok()).filter(|&p| p >= 1).unwrap_or(1)
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest stored in the `passwd` column: the user id salted into the
/// client-side digest.
fn stored_passwd(uid: &str, client_digest: &str) -> String {
    sha256_hex(&format!("{uid}:{client_digest}"))
}

fn gravatar(email: &str) -> String {
    format!("https://www.gravatar.com/avatar/{}?d=mm&s=120", sha256_hex(email))
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let part_ok = |p: &str| {
        !p.is_empty()
            && p.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    };
    part_ok(local) && part_ok(domain) && domain.contains('.')
}

/// The client-side password digest: exactly 40 lowercase hex chars.
fn is_hex_digest(s: &str) -> bool {
    s.len() == 40 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn require_admin(args: &Args) -> Result<&User, ApiError> {
    match args.user() {
        Some(user) if user.admin => Ok(user),
        _ => Err(ApiError::permission("admin rights required")),
    }
}

/// A non-blank trimmed argument, or a validation error naming the field.
fn non_blank<'a>(args: &'a Args, field: &str) -> Result<&'a str, ApiError> {
    match args.str(field).map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::value(field, format!("{field} can not be empty."))),
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, ApiError> {
    Ok(serde_json::to_value(v).map_err(Error::from)?)
}

fn page_context(args: &Args, page: &Page) -> Result<Map<String, Value>, ApiError> {
    let mut ctx = Map::new();
    ctx.insert("page".into(), to_value(page)?);
    if let Some(user) = args.user() {
        ctx.insert("__user__".into(), to_value(user)?);
    }
    Ok(ctx)
}

/// JSON response carrying the (masked) user plus a fresh session cookie.
fn signed_in(args: &Args, user: &User) -> Result<Reply, ApiError> {
    let cookie = args.sessions().issue(user, MAX_AGE_SECS);
    let masked = user.clone().masked();
    let body = serde_json::to_vec(&masked).map_err(Error::from)?;
    Ok(Reply::Response(
        Response::builder().cookie(COOKIE_NAME, &cookie, MAX_AGE_SECS).json(body),
    ))
}

// ── Pages ────────────────────────────────────────────────────────────────────

async fn index(args: Args) -> Result<Reply, ApiError> {
    let num = args.db().count::<Blog>("count(id)").await?;
    let page = Page::new(num, page_index(args.str("page")));
    let blogs: Vec<Blog> = if num == 0 {
        Vec::new()
    } else {
        args.db()
            .find_all(None, vec![], Some("created_at desc"), Some(page.window()))
            .await?
    };
    let mut ctx = page_context(&args, &page)?;
    ctx.insert("blogs".into(), to_value(&blogs)?);
    Ok(Reply::template("blogs.html", ctx))
}

async fn get_blog(args: Args) -> Result<Reply, ApiError> {
    let id = args.str("id").unwrap_or_default();
    let blog: Blog = args
        .db()
        .find(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog"))?;
    let comments: Vec<Comment> = args
        .db()
        .find_all(Some("blog_id=?"), vec![id.into()], Some("created_at desc"), None)
        .await?;

    let mut rendered = Vec::with_capacity(comments.len());
    for c in &comments {
        let mut m = to_value(c)?;
        m["html_content"] = Value::String(text_to_html(&c.content));
        rendered.push(m);
    }
    let mut blog_value = to_value(&blog)?;
    blog_value["html_content"] = Value::String(text_to_html(&blog.content));

    let mut ctx = Map::new();
    ctx.insert("blog".into(), blog_value);
    ctx.insert("comments".into(), Value::Array(rendered));
    if let Some(user) = args.user() {
        ctx.insert("__user__".into(), to_value(user)?);
    }
    Ok(Reply::template("blog.html", ctx))
}

async fn register(_args: Args) -> Result<Reply, ApiError> {
    Ok(Reply::template("register.html", Map::new()))
}

async fn signin(_args: Args) -> Result<Reply, ApiError> {
    Ok(Reply::template("signin.html", Map::new()))
}

async fn signout(args: Args) -> Result<Reply, ApiError> {
    let back = args.request().header("referer").unwrap_or("/").to_owned();
    info!("user signed out");
    Ok(Reply::Response(
        Response::builder()
            .status(crate::status::Status::Found)
            .header("location", &back)
            .cookie(COOKIE_NAME, "-deleted-", 0)
            .no_body(),
    ))
}

async fn manage(_args: Args) -> Result<Reply, ApiError> {
    Ok(Reply::text("redirect:/manage/comments"))
}

async fn manage_comments(args: Args) -> Result<Reply, ApiError> {
    manage_listing(&args, "manage_comments.html")
}

async fn manage_blogs(args: Args) -> Result<Reply, ApiError> {
    manage_listing(&args, "manage_blogs.html")
}

async fn manage_users(args: Args) -> Result<Reply, ApiError> {
    manage_listing(&args, "manage_users.html")
}

fn manage_listing(args: &Args, template: &str) -> Result<Reply, ApiError> {
    let mut ctx = Map::new();
    ctx.insert("page_index".into(), Value::from(page_index(args.str("page"))));
    if let Some(user) = args.user() {
        ctx.insert("__user__".into(), to_value(user)?);
    }
    Ok(Reply::template(template, ctx))
}

async fn manage_create_blog(args: Args) -> Result<Reply, ApiError> {
    blog_editor(&args, "", "/api/blogs")
}

async fn manage_edit_blog(args: Args) -> Result<Reply, ApiError> {
    let id = args.str("id").unwrap_or_default().to_owned();
    let action = format!("/api/blogs/{id}");
    blog_editor(&args, &id, &action)
}

fn blog_editor(args: &Args, id: &str, action: &str) -> Result<Reply, ApiError> {
    let mut ctx = Map::new();
    ctx.insert("id".into(), Value::String(id.to_owned()));
    ctx.insert("action".into(), Value::String(action.to_owned()));
    if let Some(user) = args.user() {
        ctx.insert("__user__".into(), to_value(user)?);
    }
    Ok(Reply::template("manage_blog_edit.html", ctx))
}

// ── Users API ────────────────────────────────────────────────────────────────

async fn api_register_user(args: Args) -> Result<Reply, ApiError> {
    let name = non_blank(&args, "name")?.to_owned();
    let email = args.str("email").unwrap_or_default().to_owned();
    if !is_email(&email) {
        return Err(ApiError::value("email", "Invalid email."));
    }
    let passwd = args.str("passwd").unwrap_or_default().to_owned();
    if !is_hex_digest(&passwd) {
        return Err(ApiError::value("passwd", "Invalid password."));
    }
    let existing: Vec<User> = args
        .db()
        .find_all(Some("email=?"), vec![email.as_str().into()], None, None)
        .await?;
    if !existing.is_empty() {
        return Err(ApiError::api("register:failed", "Email is already in use."));
    }

    let uid = crate::db::next_id();
    let user = User {
        id: Some(uid.clone()),
        email: email.clone(),
        passwd: stored_passwd(&uid, &passwd),
        admin: false,
        name,
        image: gravatar(&email),
        created_at: None,
    };
    let user = args.db().insert(user).await?;
    signed_in(&args, &user)
}

async fn api_authenticate(args: Args) -> Result<Reply, ApiError> {
    let email = args.str("email").unwrap_or_default();
    if email.is_empty() {
        return Err(ApiError::value("email", "Invalid email."));
    }
    let passwd = args.str("passwd").unwrap_or_default().to_owned();
    if passwd.is_empty() {
        return Err(ApiError::value("passwd", "Invalid password."));
    }
    let users: Vec<User> = args
        .db()
        .find_all(Some("email=?"), vec![email.into()], None, None)
        .await?;
    let Some(user) = users.into_iter().next() else {
        return Err(ApiError::api("auth:failed", "Email not exists."));
    };
    if user.passwd != stored_passwd(user.id(), &passwd) {
        return Err(ApiError::value("passwd", "Invalid password."));
    }
    signed_in(&args, &user)
}

async fn api_get_users(args: Args) -> Result<Reply, ApiError> {
    let num = args.db().count::<User>("count(id)").await?;
    let page = Page::new(num, page_index(args.str("page")));
    let users: Vec<User> = if num == 0 {
        Vec::new()
    } else {
        args.db()
            .find_all(None, vec![], Some("created_at desc"), Some(page.window()))
            .await?
    };
    let users: Vec<User> = users.into_iter().map(User::masked).collect();
    let mut out = Map::new();
    out.insert("page".into(), to_value(&page)?);
    out.insert("users".into(), to_value(&users)?);
    Ok(Reply::Map(out))
}

// ── Blogs API ────────────────────────────────────────────────────────────────

async fn api_blogs(args: Args) -> Result<Reply, ApiError> {
    let num = args.db().count::<Blog>("count(id)").await?;
    let page = Page::new(num, page_index(args.str("page")));
    let blogs: Vec<Blog> = if num == 0 {
        Vec::new()
    } else {
        args.db()
            .find_all(None, vec![], Some("created_at desc"), Some(page.window()))
            .await?
    };
    let mut out = Map::new();
    out.insert("page".into(), to_value(&page)?);
    out.insert("blogs".into(), to_value(&blogs)?);
    Ok(Reply::Map(out))
}

async fn api_get_blog(args: Args) -> Result<Reply, ApiError> {
    let id = args.str("id").unwrap_or_default();
    let blog: Blog = args
        .db()
        .find(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog"))?;
    Reply::json_of(&blog)
}

async fn api_create_blog(args: Args) -> Result<Reply, ApiError> {
    let author = require_admin(&args)?.clone();
    let blog = Blog {
        id: None,
        user_id: author.id().to_owned(),
        user_name: author.name.clone(),
        user_image: author.image.clone(),
        name: non_blank(&args, "name")?.to_owned(),
        summary: non_blank(&args, "summary")?.to_owned(),
        content: non_blank(&args, "content")?.to_owned(),
        created_at: None,
    };
    let blog = args.db().insert(blog).await?;
    Reply::json_of(&blog)
}

async fn api_update_blog(args: Args) -> Result<Reply, ApiError> {
    require_admin(&args)?;
    let id = args.str("id").unwrap_or_default();
    let mut blog: Blog = args
        .db()
        .find(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog"))?;
    blog.name = non_blank(&args, "name")?.to_owned();
    blog.summary = non_blank(&args, "summary")?.to_owned();
    blog.content = non_blank(&args, "content")?.to_owned();
    args.db().update(&blog).await?;
    Reply::json_of(&blog)
}

async fn api_delete_blog(args: Args) -> Result<Reply, ApiError> {
    require_admin(&args)?;
    let id = args.str("id").unwrap_or_default().to_owned();
    let blog: Blog = args
        .db()
        .find(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog"))?;
    args.db().delete(&blog).await?;
    let mut out = Map::new();
    out.insert("id".into(), Value::String(id));
    Ok(Reply::Map(out))
}

// ── Comments API ─────────────────────────────────────────────────────────────

async fn api_comments(args: Args) -> Result<Reply, ApiError> {
    let num = args.db().count::<Comment>("count(id)").await?;
    let page = Page::new(num, page_index(args.str("page")));
    let comments: Vec<Comment> = if num == 0 {
        Vec::new()
    } else {
        args.db()
            .find_all(None, vec![], Some("created_at desc"), Some(page.window()))
            .await?
    };
    let mut out = Map::new();
    out.insert("page".into(), to_value(&page)?);
    out.insert("comments".into(), to_value(&comments)?);
    Ok(Reply::Map(out))
}

async fn api_create_comment(args: Args) -> Result<Reply, ApiError> {
    let Some(user) = args.user().cloned() else {
        return Err(ApiError::permission("please signin first."));
    };
    let content = non_blank(&args, "content")?.to_owned();
    let blog_id = args.str("id").unwrap_or_default();
    let _: Blog = args
        .db()
        .find(blog_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Blog"))?;
    let comment = Comment {
        id: None,
        blog_id: blog_id.to_owned(),
        user_id: user.id().to_owned(),
        user_name: user.name.clone(),
        user_image: user.image.clone(),
        content,
        created_at: None,
    };
    let comment = args.db().insert(comment).await?;
    Reply::json_of(&comment)
}

async fn api_delete_comment(args: Args) -> Result<Reply, ApiError> {
    require_admin(&args)?;
    let id = args.str("id").unwrap_or_default().to_owned();
    let comment: Comment = args
        .db()
        .find(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Comment"))?;
    args.db().delete(&comment).await?;
    let mut out = Map::new();
    out.insert("id".into(), Value::String(id));
    Ok(Reply::Map(out))
}
