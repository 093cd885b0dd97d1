//! Full-chain tests: router, binder, middleware, handlers, and the row
//! mapper against an in-memory database, with no socket involved.

use std::sync::Arc;

use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;

use aweb::db::Db;
use aweb::models::{all_schemas, User};
use aweb::templates::DevTemplates;
use aweb::{App, Config, Method, Request, Response, Sessions, State};

async fn test_app() -> App {
    // One connection so the in-memory database outlives individual checkouts.
    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let db = Db::from_pool(pool);
    db.ensure_tables(&all_schemas()).await.unwrap();
    let state = State {
        db,
        sessions: Sessions::new("test-secret"),
        templates: Arc::new(DevTemplates),
        config: Config::default(),
    };
    App::new(aweb::handlers::routes(), state)
}

fn json_body(resp: &Response) -> Value {
    serde_json::from_slice(resp.body()).expect("json body")
}

fn session_cookie(resp: &Response) -> String {
    let header = resp.header("set-cookie").expect("set-cookie header");
    let value = header
        .strip_prefix("awesession=")
        .and_then(|rest| rest.split(';').next())
        .expect("awesession cookie");
    value.to_owned()
}

const PASSWD_DIGEST: &str = "0123456789abcdef0123456789abcdef01234567";

/// Registers a user through the API, returning the session cookie value.
async fn register(app: &App, email: &str, name: &str) -> String {
    let req = Request::new(Method::Post, "/api/users")
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "email": email, "name": name, "passwd": PASSWD_DIGEST }).to_string(),
        );
    let resp = app.handle(req).await;
    assert_eq!(resp.status_u16(), 200, "register failed: {:?}", resp.body());
    session_cookie(&resp)
}

/// Registers a user and flips the admin bit directly in storage. The cookie
/// stays valid: its signature covers the password hash, not the admin flag.
async fn register_admin(app: &App, email: &str) -> String {
    let cookie = register(app, email, "Admin").await;
    let mut users: Vec<User> = app
        .state()
        .db
        .find_all(Some("email=?"), vec![email.into()], None, None)
        .await
        .unwrap();
    let mut user = users.pop().unwrap();
    user.admin = true;
    app.state().db.update(&user).await.unwrap();
    cookie
}

fn with_session(req: Request, cookie: &str) -> Request {
    req.with_header("cookie", &format!("awesession={cookie}"))
}

// ── Registration and authentication ──────────────────────────────────────────

#[tokio::test]
async fn register_sets_cookie_and_masks_passwd() {
    let app = test_app().await;
    let req = Request::new(Method::Post, "/api/users")
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "email": "a@b.com", "name": "Ann", "passwd": PASSWD_DIGEST }).to_string(),
        );
    let resp = app.handle(req).await;

    assert_eq!(resp.status_u16(), 200);
    let body = json_body(&resp);
    assert_eq!(body["email"], "a@b.com");
    assert_eq!(body["passwd"], "******");
    assert!(body["id"].as_str().unwrap().len() >= 15);

    let cookie = resp.header("set-cookie").unwrap();
    assert!(cookie.starts_with("awesession="));
    assert!(cookie.contains("HttpOnly"));
}

#[tokio::test]
async fn register_rejects_duplicate_email() {
    let app = test_app().await;
    register(&app, "a@b.com", "Ann").await;
    let req = Request::new(Method::Post, "/api/users")
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "email": "a@b.com", "name": "Twin", "passwd": PASSWD_DIGEST }).to_string(),
        );
    let resp = app.handle(req).await;
    assert_eq!(resp.status_u16(), 400);
    assert_eq!(json_body(&resp)["error"], "register:failed");
}

#[tokio::test]
async fn missing_required_parameter_names_it_and_skips_the_handler() {
    let app = test_app().await;
    let req = Request::new(Method::Post, "/api/users")
        .with_header("content-type", "application/json")
        .with_body(json!({ "email": "a@b.com", "name": "Ann" }).to_string());
    let resp = app.handle(req).await;
    assert_eq!(resp.status_u16(), 400);
    assert!(String::from_utf8_lossy(resp.body()).contains("passwd"));

    // the handler never ran: nothing was persisted
    let count = app.state().db.count::<User>("count(id)").await.unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn authenticate_round_trip_and_wrong_password() {
    let app = test_app().await;
    register(&app, "a@b.com", "Ann").await;

    let ok = app
        .handle(
            Request::new(Method::Post, "/api/authenticate")
                .with_header("content-type", "application/json")
                .with_body(
                    json!({ "email": "a@b.com", "passwd": PASSWD_DIGEST }).to_string(),
                ),
        )
        .await;
    assert_eq!(ok.status_u16(), 200);
    assert_eq!(json_body(&ok)["passwd"], "******");
    assert!(ok.header("set-cookie").is_some());

    let bad = app
        .handle(
            Request::new(Method::Post, "/api/authenticate")
                .with_header("content-type", "application/json")
                .with_body(
                    json!({ "email": "a@b.com", "passwd": &"f".repeat(40) }).to_string(),
                ),
        )
        .await;
    assert_eq!(bad.status_u16(), 400);
    assert_eq!(json_body(&bad)["data"], "passwd");
}

// ── Admin gate ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn manage_pages_redirect_anonymous_to_signin() {
    let app = test_app().await;
    let resp = app.handle(Request::new(Method::Get, "/manage/blogs")).await;
    assert_eq!(resp.status_u16(), 302);
    assert_eq!(resp.header("location"), Some("/signin"));
}

#[tokio::test]
async fn manage_pages_redirect_non_admin_users_too() {
    let app = test_app().await;
    let cookie = register(&app, "user@b.com", "Plain").await;
    let resp = app
        .handle(with_session(Request::new(Method::Get, "/manage/blogs"), &cookie))
        .await;
    assert_eq!(resp.status_u16(), 302);
    assert_eq!(resp.header("location"), Some("/signin"));
}

#[tokio::test]
async fn manage_pages_open_for_admins() {
    let app = test_app().await;
    let cookie = register_admin(&app, "root@b.com").await;
    let resp = app
        .handle(with_session(Request::new(Method::Get, "/manage/blogs"), &cookie))
        .await;
    assert_eq!(resp.status_u16(), 200);
    assert_eq!(resp.header("content-type"), Some("text/html;charset=utf-8"));
}

#[tokio::test]
async fn admin_gate_does_not_cover_lookalike_paths() {
    let app = test_app().await;
    // not under /manage/: these fall through to routing and 404
    assert_eq!(app.handle(Request::new(Method::Get, "/managers")).await.status_u16(), 404);
    assert_eq!(app.handle(Request::new(Method::Get, "/manage-x")).await.status_u16(), 404);
    // the bare segment itself is still gated
    let bare = app.handle(Request::new(Method::Get, "/manage")).await;
    assert_eq!(bare.status_u16(), 302);
}

#[tokio::test]
async fn tampered_cookie_resolves_to_anonymous() {
    let app = test_app().await;
    let cookie = register_admin(&app, "root@b.com").await;
    let flipped = if cookie.ends_with('0') { "1" } else { "0" };
    let tampered = format!("{}{flipped}", &cookie[..cookie.len() - 1]);
    let resp = app
        .handle(with_session(Request::new(Method::Get, "/manage/blogs"), &tampered))
        .await;
    assert_eq!(resp.status_u16(), 302);
}

// ── Blog CRUD ────────────────────────────────────────────────────────────────

async fn create_blog(app: &App, cookie: &str, name: &str) -> Value {
    let resp = app
        .handle(with_session(
            Request::new(Method::Post, "/api/blogs")
                .with_header("content-type", "application/json")
                .with_body(
                    json!({ "name": name, "summary": "s", "content": "c" }).to_string(),
                ),
            cookie,
        ))
        .await;
    assert_eq!(resp.status_u16(), 200, "create blog failed: {:?}", resp.body());
    json_body(&resp)
}

#[tokio::test]
async fn blog_create_fetch_update_delete() {
    let app = test_app().await;
    let cookie = register_admin(&app, "root@b.com").await;

    let blog = create_blog(&app, &cookie, "First").await;
    let id = blog["id"].as_str().unwrap().to_owned();
    assert_eq!(blog["user_name"], "Admin");

    let fetched = app.handle(Request::new(Method::Get, &format!("/api/blog/{id}"))).await;
    assert_eq!(fetched.status_u16(), 200);
    assert_eq!(json_body(&fetched)["name"], "First");

    let updated = app
        .handle(with_session(
            Request::new(Method::Post, &format!("/api/blogs/{id}"))
                .with_header("content-type", "application/x-www-form-urlencoded")
                .with_body("name=Renamed&summary=s2&content=c2"),
            &cookie,
        ))
        .await;
    assert_eq!(updated.status_u16(), 200);
    assert_eq!(json_body(&updated)["name"], "Renamed");

    let deleted = app
        .handle(with_session(
            Request::new(Method::Post, &format!("/api/blogs/{id}/delete")),
            &cookie,
        ))
        .await;
    assert_eq!(deleted.status_u16(), 200);
    assert_eq!(json_body(&deleted)["id"], id.as_str());

    let gone = app.handle(Request::new(Method::Get, &format!("/api/blog/{id}"))).await;
    assert_eq!(gone.status_u16(), 404);
}

#[tokio::test]
async fn blog_creation_requires_admin() {
    let app = test_app().await;
    let cookie = register(&app, "user@b.com", "Plain").await;
    let resp = app
        .handle(with_session(
            Request::new(Method::Post, "/api/blogs")
                .with_header("content-type", "application/json")
                .with_body(json!({ "name": "n", "summary": "s", "content": "c" }).to_string()),
            &cookie,
        ))
        .await;
    assert_eq!(resp.status_u16(), 403);
}

#[tokio::test]
async fn api_blogs_pages_ten_at_a_time() {
    let app = test_app().await;
    let cookie = register_admin(&app, "root@b.com").await;
    for i in 0..12 {
        create_blog(&app, &cookie, &format!("post {i}")).await;
    }
    let first = json_body(&app.handle(Request::new(Method::Get, "/api/blogs")).await);
    assert_eq!(first["blogs"].as_array().unwrap().len(), 10);
    assert_eq!(first["page"]["item_count"], 12);

    let second = json_body(
        &app.handle(Request::new(Method::Get, "/api/blogs").with_query("page=2")).await,
    );
    assert_eq!(second["blogs"].as_array().unwrap().len(), 2);

    let empty = json_body(&app.handle(Request::new(Method::Get, "/api/comments")).await);
    assert_eq!(empty["comments"].as_array().unwrap().len(), 0);
}

// ── Comments ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_comment_content_is_a_validation_error() {
    let app = test_app().await;
    let admin = register_admin(&app, "root@b.com").await;
    let blog = create_blog(&app, &admin, "First").await;
    let id = blog["id"].as_str().unwrap();

    let resp = app
        .handle(with_session(
            Request::new(Method::Post, &format!("/api/blogs/{id}/comments"))
                .with_header("content-type", "application/json")
                .with_body(json!({ "content": "   " }).to_string()),
            &admin,
        ))
        .await;
    assert_eq!(resp.status_u16(), 400);
    assert_eq!(json_body(&resp)["data"], "content");
}

#[tokio::test]
async fn comments_need_a_signed_in_user_and_an_existing_blog() {
    let app = test_app().await;
    let admin = register_admin(&app, "root@b.com").await;
    let blog = create_blog(&app, &admin, "First").await;
    let id = blog["id"].as_str().unwrap();

    let anon = app
        .handle(
            Request::new(Method::Post, &format!("/api/blogs/{id}/comments"))
                .with_header("content-type", "application/json")
                .with_body(json!({ "content": "hi" }).to_string()),
        )
        .await;
    assert_eq!(anon.status_u16(), 403);

    let missing = app
        .handle(with_session(
            Request::new(Method::Post, "/api/blogs/nope/comments")
                .with_header("content-type", "application/json")
                .with_body(json!({ "content": "hi" }).to_string()),
            &admin,
        ))
        .await;
    assert_eq!(missing.status_u16(), 404);

    let ok = app
        .handle(with_session(
            Request::new(Method::Post, &format!("/api/blogs/{id}/comments"))
                .with_header("content-type", "application/json")
                .with_body(json!({ "content": "  hi there  " }).to_string()),
            &admin,
        ))
        .await;
    assert_eq!(ok.status_u16(), 200);
    let body = json_body(&ok);
    assert_eq!(body["content"], "hi there");
    assert_eq!(body["blog_id"], id);
}

// ── Pages and plumbing ───────────────────────────────────────────────────────

#[tokio::test]
async fn index_renders_the_blogs_template() {
    let app = test_app().await;
    let resp = app.handle(Request::new(Method::Get, "/")).await;
    assert_eq!(resp.status_u16(), 200);
    let html = String::from_utf8_lossy(resp.body()).into_owned();
    assert!(html.contains("blogs.html"));
}

#[tokio::test]
async fn signout_clears_the_cookie_and_redirects_back() {
    let app = test_app().await;
    let resp = app
        .handle(Request::new(Method::Get, "/signout").with_header("referer", "/blog/b1"))
        .await;
    assert_eq!(resp.status_u16(), 302);
    assert_eq!(resp.header("location"), Some("/blog/b1"));
    let cookie = resp.header("set-cookie").unwrap();
    assert!(cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn manage_root_replies_with_a_redirect_marker() {
    let app = test_app().await;
    let cookie = register_admin(&app, "root@b.com").await;
    let resp = app
        .handle(with_session(Request::new(Method::Get, "/manage/"), &cookie))
        .await;
    assert_eq!(resp.status_u16(), 302);
    assert_eq!(resp.header("location"), Some("/manage/comments"));
}

#[tokio::test]
async fn unknown_path_is_404_wrong_method_is_405() {
    let app = test_app().await;
    assert_eq!(app.handle(Request::new(Method::Get, "/nope")).await.status_u16(), 404);
    assert_eq!(app.handle(Request::new(Method::Post, "/signin")).await.status_u16(), 405);
}

#[tokio::test]
async fn post_body_without_content_type_is_400() {
    let app = test_app().await;
    let resp = app
        .handle(Request::new(Method::Post, "/api/authenticate").with_body("email=a@b.com"))
        .await;
    assert_eq!(resp.status_u16(), 400);
    assert!(String::from_utf8_lossy(resp.body()).contains("content-type"));
}

#[tokio::test]
async fn users_listing_masks_every_password() {
    let app = test_app().await;
    register(&app, "a@b.com", "Ann").await;
    register(&app, "c@d.com", "Cal").await;
    let body = json_body(&app.handle(Request::new(Method::Get, "/api/users")).await);
    let users = body["users"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u["passwd"] == "******"));
}
