#[macro_use]
extern crate rocket;

mod db;
mod error;
mod models;

use std::fs;
use std::path::PathBuf;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{Local, NaiveDate};
use password_hash::SaltString;
use rand_core::OsRng;
use rocket::fs::FileServer;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::time::Duration;
use rocket::{Build, Rocket, State};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use db::DbPool;
use error::ApiError;
use models::{CategoryTotal, MonthTotals, RecordRow, User};

const SESSION_COOKIE: &str = "session";
const SESSION_DAYS: i64 = 7;
const MAX_SESSIONS: i64 = 5;
const MIN_PASSWORD_LEN: usize = 6;
const TREND_MONTHS: i64 = 6;

#[derive(Deserialize)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Deserialize)]
struct CategoryPayload {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    icon: Option<String>,
}

#[derive(Deserialize)]
struct RecordPayload {
    category_id: Option<i64>,
    amount: Option<Amount>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
    record_date: Option<String>,
}

// Clients send the amount either as a JSON number or as a numeric string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Amount {
    Number(f64),
    Text(String),
}

impl Amount {
    fn to_cents(&self) -> Option<i64> {
        match self {
            Amount::Number(value) => {
                if !value.is_finite() || *value < 0.0 {
                    return None;
                }
                let scaled = value * 100.0;
                let rounded = scaled.round();
                if (scaled - rounded).abs() > 1e-6 {
                    return None;
                }
                // i64::MAX rounds up to 2^63 as an f64, so anything at
                // or above it does not fit in cents.
                if rounded >= i64::MAX as f64 {
                    return None;
                }
                Some(rounded as i64)
            }
            Amount::Text(raw) => parse_amount_to_cents(raw),
        }
    }
}

#[derive(FromForm)]
struct RecordFilters {
    date: Option<String>,
    month: Option<String>,
    #[field(name = "type")]
    kind: Option<String>,
}

#[derive(Serialize)]
struct RecordView {
    id: i64,
    user_id: i64,
    category_id: i64,
    amount: f64,
    #[serde(rename = "type")]
    kind: String,
    description: String,
    record_date: String,
    created_at: String,
    category_name: String,
    icon: String,
}

#[derive(Serialize)]
struct CategoryTotalView {
    name: String,
    icon: String,
    #[serde(rename = "type")]
    kind: String,
    total: f64,
    count: i64,
}

#[derive(Serialize)]
struct MonthView {
    month: String,
    income: f64,
    expense: f64,
}

fn record_view(row: RecordRow) -> RecordView {
    RecordView {
        id: row.id,
        user_id: row.user_id,
        category_id: row.category_id,
        amount: cents_to_amount(row.amount_cents),
        kind: row.kind,
        description: row.description,
        record_date: row.record_date,
        created_at: row.created_at,
        category_name: row.category_name,
        icon: row.icon,
    }
}

fn category_total_view(total: CategoryTotal) -> CategoryTotalView {
    CategoryTotalView {
        name: total.name,
        icon: total.icon,
        kind: total.kind,
        total: cents_to_amount(total.total_cents),
        count: total.count,
    }
}

fn month_view(totals: MonthTotals) -> MonthView {
    MonthView {
        month: totals.month,
        income: cents_to_amount(totals.income_cents),
        expense: cents_to_amount(totals.expense_cents),
    }
}

fn cents_to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

fn parse_amount_to_cents(input: &str) -> Option<i64> {
    let mut s = input.trim().to_string();
    if s.is_empty() {
        return None;
    }
    if s.starts_with('-') {
        return None;
    }
    s = s.replace(',', ".");
    let mut parts = s.split('.');
    let whole_str = parts.next()?;
    let frac_str = parts.next();
    if parts.next().is_some() {
        return None;
    }
    let whole: i64 = whole_str.parse().ok()?;
    let frac = match frac_str {
        None => 0,
        Some(frac) => {
            if frac.len() > 2 {
                return None;
            }
            let mut padded = frac.to_string();
            while padded.len() < 2 {
                padded.push('0');
            }
            padded.parse::<i64>().ok()?
        }
    };
    whole.checked_mul(100)?.checked_add(frac)
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| ApiError::internal(format!("password hashing failed: {err}")))?;
    Ok(hash.to_string())
}

fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn valid_kind(kind: &str) -> bool {
    matches!(kind, "income" | "expense")
}

// Chrono accepts unpadded fields like 2024-1-5, so the parsed date is
// rendered back out; filters and the monthly grouping work on the text.
fn canonical_date(raw: &str) -> Option<String> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.format("%Y-%m-%d").to_string())
}

// Empty query parameters are treated the same as absent ones.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn session_cookie(token: String) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::days(SESSION_DAYS));
    cookie
}

fn session_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Option<User> {
    let conn = pool.get().ok()?;
    let token = cookies.get(SESSION_COOKIE)?.value().to_string();
    db::user_by_session(&conn, &token).ok().flatten()
}

struct AuthUser(User);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Outcome::Success(pool) = req.guard::<&State<DbPool>>().await else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let Some(token) = req.cookies().get(SESSION_COOKIE).map(|c| c.value().to_string())
        else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let Ok(conn) = pool.get() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        match db::user_by_session(&conn, &token) {
            Ok(Some(user)) => Outcome::Success(AuthUser(user)),
            Ok(None) => Outcome::Error((Status::Unauthorized, ())),
            Err(_) => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

#[post("/register", data = "<payload>")]
fn register(pool: &State<DbPool>, payload: Json<Credentials>) -> Result<Json<Value>, ApiError> {
    let payload = payload.into_inner();
    let username = payload.username.unwrap_or_default().trim().to_string();
    let password = payload.password.unwrap_or_default();
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("password must be at least 6 characters"));
    }

    let conn = pool.get()?;
    if db::username_taken(&conn, &username)? {
        return Err(ApiError::conflict("username already taken"));
    }

    let digest = hash_password(&password)?;
    let created_at = Local::now().to_rfc3339();
    let user_id = db::insert_user(&conn, &username, &digest, &created_at)?;
    db::seed_default_categories(&conn, user_id, &created_at)?;

    Ok(Json(json!({ "success": true })))
}

#[post("/login", data = "<payload>")]
fn login(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    payload: Json<Credentials>,
) -> Result<Json<Value>, ApiError> {
    let payload = payload.into_inner();
    let username = payload.username.unwrap_or_default().trim().to_string();
    let password = payload.password.unwrap_or_default();

    let conn = pool.get()?;
    let Some((user_id, hash)) = db::user_credentials(&conn, &username)? else {
        return Err(ApiError::auth("invalid credentials"));
    };
    if !verify_password(&hash, &password) {
        return Err(ApiError::auth("invalid credentials"));
    }

    let token = Uuid::new_v4().to_string();
    let created_at = Local::now().to_rfc3339();
    db::create_session(&conn, user_id, &token, &created_at)?;
    db::prune_sessions(&conn, user_id, MAX_SESSIONS)?;
    cookies.add(session_cookie(token));

    Ok(Json(json!({
        "success": true,
        "user": { "id": user_id, "username": username },
    })))
}

#[post("/logout")]
fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Json<Value> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            let _ = db::delete_session(&conn, cookie.value());
        }
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Json(json!({ "success": true }))
}

#[get("/user")]
fn current_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Json<Value> {
    match session_user(pool, cookies) {
        Some(user) => Json(json!({ "logged": true, "user": user })),
        None => Json(json!({ "logged": false })),
    }
}

#[get("/categories")]
fn list_categories(pool: &State<DbPool>, user: AuthUser) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    let categories = db::list_categories(&conn, user.0.id)?;
    Ok(Json(json!({ "success": true, "data": categories })))
}

#[post("/categories", data = "<payload>")]
fn create_category(
    pool: &State<DbPool>,
    user: AuthUser,
    payload: Json<CategoryPayload>,
) -> Result<Json<Value>, ApiError> {
    let payload = payload.into_inner();
    let name = payload.name.unwrap_or_default().trim().to_string();
    let kind = payload.kind.unwrap_or_default();
    if name.is_empty() || kind.is_empty() {
        return Err(ApiError::validation("name and type are required"));
    }
    if !valid_kind(&kind) {
        return Err(ApiError::validation("type must be income or expense"));
    }

    let conn = pool.get()?;
    let icon = payload.icon.unwrap_or_default();
    let created_at = Local::now().to_rfc3339();
    let id = db::insert_category(&conn, user.0.id, &name, &kind, &icon, &created_at)?;

    Ok(Json(json!({ "success": true, "id": id })))
}

#[delete("/categories/<id>")]
fn delete_category(
    pool: &State<DbPool>,
    user: AuthUser,
    id: i64,
) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    if db::count_category_records(&conn, id)? > 0 {
        return Err(ApiError::conflict("category has records"));
    }
    // Deleting somebody else's category matches zero rows and still succeeds.
    db::delete_category(&conn, id, user.0.id)?;
    Ok(Json(json!({ "success": true })))
}

#[get("/records?<filters..>")]
fn list_records(
    pool: &State<DbPool>,
    user: AuthUser,
    filters: RecordFilters,
) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    // An unparseable date filter is passed through and matches nothing.
    let date = non_empty(filters.date).map(|d| canonical_date(&d).unwrap_or(d));
    let month = non_empty(filters.month);
    let kind = non_empty(filters.kind);
    let rows = db::list_records(
        &conn,
        user.0.id,
        date.as_deref(),
        month.as_deref(),
        kind.as_deref(),
    )?;
    let data: Vec<RecordView> = rows.into_iter().map(record_view).collect();
    Ok(Json(json!({ "success": true, "data": data })))
}

#[post("/records", data = "<payload>")]
fn create_record(
    pool: &State<DbPool>,
    user: AuthUser,
    payload: Json<RecordPayload>,
) -> Result<Json<Value>, ApiError> {
    let payload = payload.into_inner();
    let (Some(category_id), Some(amount), Some(kind), Some(record_date)) = (
        payload.category_id,
        payload.amount,
        payload.kind,
        payload.record_date,
    ) else {
        return Err(ApiError::validation(
            "category_id, amount, type and record_date are required",
        ));
    };
    if !valid_kind(&kind) {
        return Err(ApiError::validation("type must be income or expense"));
    }
    let Some(amount_cents) = amount.to_cents() else {
        return Err(ApiError::validation("invalid amount"));
    };
    let Some(record_date) = canonical_date(&record_date) else {
        return Err(ApiError::validation("invalid record_date"));
    };

    let conn = pool.get()?;
    if !db::category_belongs_to_user(&conn, category_id, user.0.id)? {
        return Err(ApiError::validation("invalid category"));
    }

    let description = payload.description.unwrap_or_default();
    let created_at = Local::now().to_rfc3339();
    let id = db::insert_record(
        &conn,
        user.0.id,
        category_id,
        amount_cents,
        &kind,
        &description,
        &record_date,
        &created_at,
    )?;

    Ok(Json(json!({ "success": true, "id": id })))
}

#[delete("/records/<id>")]
fn delete_record(pool: &State<DbPool>, user: AuthUser, id: i64) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    db::delete_record(&conn, id, user.0.id)?;
    Ok(Json(json!({ "success": true })))
}

#[get("/statistics?<month>")]
fn statistics(
    pool: &State<DbPool>,
    user: AuthUser,
    month: Option<String>,
) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    let month = non_empty(month);
    let (income_cents, expense_cents) = db::totals(&conn, user.0.id, month.as_deref())?;
    let by_category: Vec<CategoryTotalView> = db::category_totals(&conn, user.0.id, month.as_deref())?
        .into_iter()
        .map(category_total_view)
        .collect();

    Ok(Json(json!({
        "success": true,
        "data": {
            "totalIncome": cents_to_amount(income_cents),
            "totalExpense": cents_to_amount(expense_cents),
            "balance": cents_to_amount(income_cents - expense_cents),
            "byCategory": by_category,
        },
    })))
}

#[get("/monthly-stats")]
fn monthly_stats(pool: &State<DbPool>, user: AuthUser) -> Result<Json<Value>, ApiError> {
    let conn = pool.get()?;
    let mut months = db::monthly_totals(&conn, user.0.id, TREND_MONTHS)?;
    // The store hands back the most recent months first; the chart wants
    // them oldest first.
    months.reverse();
    let data: Vec<MonthView> = months.into_iter().map(month_view).collect();
    Ok(Json(json!({ "success": true, "data": data })))
}

#[catch(400)]
fn bad_request() -> Json<Value> {
    Json(json!({ "error": "bad request" }))
}

#[catch(401)]
fn unauthorized() -> Json<Value> {
    Json(json!({ "error": "not logged in" }))
}

#[catch(404)]
fn not_found() -> Json<Value> {
    Json(json!({ "error": "resource not found" }))
}

#[catch(422)]
fn unprocessable() -> Json<Value> {
    Json(json!({ "error": "malformed request body" }))
}

#[catch(500)]
fn internal_error() -> Json<Value> {
    Json(json!({ "error": "internal server error" }))
}

fn server(pool: DbPool) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                register,
                login,
                logout,
                current_user,
                list_categories,
                create_category,
                delete_category,
                list_records,
                create_record,
                delete_record,
                statistics,
                monthly_stats,
            ],
        )
        .register(
            "/",
            catchers![
                bad_request,
                unauthorized,
                not_found,
                unprocessable,
                internal_error
            ],
        )
}

#[launch]
fn rocket() -> _ {
    let figment = rocket::Config::figment();
    let db_path: PathBuf = figment
        .extract_inner("db_path")
        .unwrap_or_else(|_| PathBuf::from("data/tally.sqlite"));
    let static_dir: PathBuf = figment
        .extract_inner("static_dir")
        .unwrap_or_else(|_| PathBuf::from("public"));

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).expect("db directory");
    }
    fs::create_dir_all(&static_dir).expect("static directory");

    let pool = db::init_pool(&db_path);
    server(pool).mount("/", FileServer::from(static_dir))
}
