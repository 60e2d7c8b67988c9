use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Result, ToSql};

use crate::models::{Category, CategoryTotal, MonthTotals, RecordRow, User};

pub type DbPool = Pool<SqliteConnectionManager>;

const DEFAULT_EXPENSE_CATEGORIES: [(&str, &str); 8] = [
    ("Dining", "🍜"),
    ("Transport", "🚗"),
    ("Shopping", "🛒"),
    ("Entertainment", "🎮"),
    ("Medical", "💊"),
    ("Housing", "🏠"),
    ("Utilities", "💡"),
    ("Other", "📦"),
];

const DEFAULT_INCOME_CATEGORIES: [(&str, &str); 5] = [
    ("Salary", "💰"),
    ("Bonus", "🎁"),
    ("Side job", "💼"),
    ("Investment", "📈"),
    ("Other", "📦"),
];

pub fn init_pool(path: &Path) -> DbPool {
    // PRAGMA foreign_keys is per-connection, so it runs in the manager's
    // init hook rather than once at schema time.
    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::new(manager).expect("db pool");
    {
        let conn = pool.get().expect("db connection");
        ensure_schema(&conn).expect("db schema");
    }
    pool
}

pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let tables: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    if tables > 0 {
        return Ok(());
    }

    log::info!("empty database, provisioning schema");
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('income', 'expense')),
            icon TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            amount_cents INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('income', 'expense')),
            description TEXT NOT NULL DEFAULT '',
            record_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES categories(id) ON DELETE RESTRICT
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_categories_user ON categories(user_id);
        CREATE INDEX IF NOT EXISTS idx_records_user ON records(user_id);
        CREATE INDEX IF NOT EXISTS idx_records_date ON records(record_date);
        CREATE INDEX IF NOT EXISTS idx_records_category ON records(category_id);
        ",
    )?;
    Ok(())
}

pub fn username_taken(conn: &Connection, username: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        params![username],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![username, password_hash, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_credentials(conn: &Connection, username: &str) -> Result<Option<(i64, String)>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, password_hash
        FROM users
        WHERE username = ?1
        ",
    )?;
    let mut rows = stmt.query(params![username])?;
    if let Some(row) = rows.next()? {
        Ok(Some((row.get(0)?, row.get(1)?)))
    } else {
        Ok(None)
    }
}

pub fn create_session(conn: &Connection, user_id: i64, token: &str, created_at: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, token, created_at],
    )?;
    Ok(())
}

pub fn user_by_session(conn: &Connection, token: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "
        SELECT u.id, u.username
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
        ",
    )?;
    let mut rows = stmt.query(params![token])?;
    if let Some(row) = rows.next()? {
        Ok(Some(User {
            id: row.get(0)?,
            username: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn prune_sessions(conn: &Connection, user_id: i64, keep: i64) -> Result<()> {
    conn.execute(
        "
        DELETE FROM sessions
        WHERE user_id = ?1
          AND id NOT IN (
            SELECT id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
          )
        ",
        params![user_id, keep],
    )?;
    Ok(())
}

pub fn seed_default_categories(conn: &Connection, user_id: i64, created_at: &str) -> Result<()> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM categories WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    if existing > 0 {
        return Ok(());
    }
    for (name, icon) in DEFAULT_EXPENSE_CATEGORIES {
        insert_category(conn, user_id, name, "expense", icon, created_at)?;
    }
    for (name, icon) in DEFAULT_INCOME_CATEGORIES {
        insert_category(conn, user_id, name, "income", icon, created_at)?;
    }
    Ok(())
}

pub fn list_categories(conn: &Connection, user_id: i64) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, user_id, name, kind, icon, created_at
        FROM categories
        WHERE user_id = ?1
        ORDER BY kind, id
        ",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok(Category {
            id: row.get(0)?,
            user_id: row.get(1)?,
            name: row.get(2)?,
            kind: row.get(3)?,
            icon: row.get(4)?,
            created_at: row.get(5)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn insert_category(
    conn: &Connection,
    user_id: i64,
    name: &str,
    kind: &str,
    icon: &str,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO categories (user_id, name, kind, icon, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![user_id, name, kind, icon, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn category_belongs_to_user(conn: &Connection, category_id: i64, user_id: i64) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM categories WHERE id = ?1 AND user_id = ?2)",
        params![category_id, user_id],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

// Counts references from every user, not just the owner.
pub fn count_category_records(conn: &Connection, category_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM records WHERE category_id = ?1",
        params![category_id],
        |row| row.get(0),
    )
}

pub fn delete_category(conn: &Connection, category_id: i64, user_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM categories WHERE id = ?1 AND user_id = ?2",
        params![category_id, user_id],
    )
}

// Month filters reach the SQL as LIKE patterns, so only a plain zero
// padded YYYY-MM value becomes one; anything else matches nothing.
fn month_pattern(month: &str) -> Option<String> {
    let bytes = month.as_bytes();
    let shaped = bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit);
    if !shaped {
        return None;
    }
    Some(format!("{month}-%"))
}

pub fn list_records(
    conn: &Connection,
    user_id: i64,
    date: Option<&str>,
    month: Option<&str>,
    kind: Option<&str>,
) -> Result<Vec<RecordRow>> {
    let mut sql = String::from(
        "
        SELECT r.id, r.user_id, r.category_id, r.amount_cents, r.kind,
               r.description, r.record_date, r.created_at, c.name, c.icon
        FROM records r
        JOIN categories c ON r.category_id = c.id
        WHERE r.user_id = :user_id
        ",
    );
    let month_like = month.and_then(month_pattern);
    let mut binds: Vec<(&str, &dyn ToSql)> = vec![(":user_id", &user_id)];
    // An exact date wins over a month filter when both are present.
    if date.is_some() {
        sql.push_str(" AND r.record_date = :day");
        binds.push((":day", &date));
    } else if month.is_some() {
        if month_like.is_none() {
            return Ok(Vec::new());
        }
        sql.push_str(" AND r.record_date LIKE :month");
        binds.push((":month", &month_like));
    }
    if kind.is_some() {
        sql.push_str(" AND r.kind = :kind");
        binds.push((":kind", &kind));
    }
    sql.push_str(" ORDER BY r.record_date DESC, r.id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(binds.as_slice(), |row| {
        Ok(RecordRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            category_id: row.get(2)?,
            amount_cents: row.get(3)?,
            kind: row.get(4)?,
            description: row.get(5)?,
            record_date: row.get(6)?,
            created_at: row.get(7)?,
            category_name: row.get(8)?,
            icon: row.get(9)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
pub fn insert_record(
    conn: &Connection,
    user_id: i64,
    category_id: i64,
    amount_cents: i64,
    kind: &str,
    description: &str,
    record_date: &str,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO records (user_id, category_id, amount_cents, kind, description, record_date, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            user_id,
            category_id,
            amount_cents,
            kind,
            description,
            record_date,
            created_at
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn delete_record(conn: &Connection, record_id: i64, user_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM records WHERE id = ?1 AND user_id = ?2",
        params![record_id, user_id],
    )
}

pub fn totals(conn: &Connection, user_id: i64, month: Option<&str>) -> Result<(i64, i64)> {
    let mut sql = String::from(
        "
        SELECT COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents END), 0),
               COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents END), 0)
        FROM records
        WHERE user_id = :user_id
        ",
    );
    let month_like = month.and_then(month_pattern);
    if month.is_some() && month_like.is_none() {
        return Ok((0, 0));
    }
    let mut binds: Vec<(&str, &dyn ToSql)> = vec![(":user_id", &user_id)];
    if month_like.is_some() {
        sql.push_str(" AND record_date LIKE :month");
        binds.push((":month", &month_like));
    }
    conn.query_row(&sql, binds.as_slice(), |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
}

pub fn category_totals(
    conn: &Connection,
    user_id: i64,
    month: Option<&str>,
) -> Result<Vec<CategoryTotal>> {
    let mut sql = String::from(
        "
        SELECT c.name, c.icon, c.kind, SUM(r.amount_cents) AS total, COUNT(r.id) AS count
        FROM records r
        JOIN categories c ON r.category_id = c.id
        WHERE r.user_id = :user_id
        ",
    );
    let month_like = month.and_then(month_pattern);
    if month.is_some() && month_like.is_none() {
        return Ok(Vec::new());
    }
    let mut binds: Vec<(&str, &dyn ToSql)> = vec![(":user_id", &user_id)];
    if month_like.is_some() {
        sql.push_str(" AND r.record_date LIKE :month");
        binds.push((":month", &month_like));
    }
    sql.push_str(" GROUP BY r.category_id, c.name, c.icon, c.kind ORDER BY total DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(binds.as_slice(), |row| {
        Ok(CategoryTotal {
            name: row.get(0)?,
            icon: row.get(1)?,
            kind: row.get(2)?,
            total_cents: row.get(3)?,
            count: row.get(4)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn monthly_totals(conn: &Connection, user_id: i64, limit: i64) -> Result<Vec<MonthTotals>> {
    let mut stmt = conn.prepare(
        "
        SELECT substr(record_date, 1, 7) AS month,
               COALESCE(SUM(CASE WHEN kind = 'income' THEN amount_cents END), 0) AS income_cents,
               COALESCE(SUM(CASE WHEN kind = 'expense' THEN amount_cents END), 0) AS expense_cents
        FROM records
        WHERE user_id = ?1
        GROUP BY month
        ORDER BY month DESC
        LIMIT ?2
        ",
    )?;
    let rows = stmt.query_map(params![user_id, limit], |row| {
        Ok(MonthTotals {
            month: row.get(0)?,
            income_cents: row.get(1)?,
            expense_cents: row.get(2)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: &str = "2024-01-01T00:00:00+00:00";

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        conn.execute_batch("PRAGMA foreign_keys = ON;").expect("pragma");
        ensure_schema(&conn).expect("schema");
        conn
    }

    fn add_user(conn: &Connection, username: &str) -> i64 {
        insert_user(conn, username, "$argon2id$test-digest", T0).unwrap()
    }

    fn add_category(conn: &Connection, user_id: i64, name: &str, kind: &str) -> i64 {
        insert_category(conn, user_id, name, kind, "", T0).unwrap()
    }

    fn add_record(
        conn: &Connection,
        user_id: i64,
        category_id: i64,
        cents: i64,
        kind: &str,
        date: &str,
    ) -> i64 {
        insert_record(conn, user_id, category_id, cents, kind, "", date, T0).unwrap()
    }

    #[test]
    fn schema_provisioning_is_idempotent() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert!(username_taken(&conn, "ada").unwrap());
        assert_eq!(list_categories(&conn, ada).unwrap().len(), 0);
    }

    #[test]
    fn duplicate_usernames_violate_schema() {
        let conn = test_conn();
        add_user(&conn, "ada");
        assert!(insert_user(&conn, "ada", "other-digest", T0).is_err());
    }

    #[test]
    fn seeding_inserts_thirteen_categories_once() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        seed_default_categories(&conn, ada, T0).unwrap();
        seed_default_categories(&conn, ada, T0).unwrap();

        let categories = list_categories(&conn, ada).unwrap();
        assert_eq!(categories.len(), 13);
        assert_eq!(categories.iter().filter(|c| c.kind == "expense").count(), 8);
        assert_eq!(categories.iter().filter(|c| c.kind == "income").count(), 5);
        assert_eq!(categories[0].name, "Dining");
    }

    #[test]
    fn seeding_skips_users_who_already_have_categories() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        add_category(&conn, ada, "Groceries", "expense");
        seed_default_categories(&conn, ada, T0).unwrap();
        assert_eq!(list_categories(&conn, ada).unwrap().len(), 1);
    }

    #[test]
    fn seeding_is_scoped_per_user() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let ben = add_user(&conn, "ben");
        seed_default_categories(&conn, ada, T0).unwrap();
        assert_eq!(list_categories(&conn, ada).unwrap().len(), 13);
        assert_eq!(list_categories(&conn, ben).unwrap().len(), 0);
    }

    #[test]
    fn categories_ordered_by_kind_then_insertion() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let wages = add_category(&conn, ada, "Wages", "income");
        let rent = add_category(&conn, ada, "Rent", "expense");
        let food = add_category(&conn, ada, "Food", "expense");

        let ids: Vec<i64> = list_categories(&conn, ada).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![rent, food, wages]);
    }

    #[test]
    fn reference_count_ignores_record_owner() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let ben = add_user(&conn, "ben");
        let category = add_category(&conn, ada, "Food", "expense");
        // A record held by another user still blocks deletion.
        add_record(&conn, ben, category, 500, "expense", "2024-01-10");

        assert_eq!(count_category_records(&conn, category).unwrap(), 1);
    }

    #[test]
    fn category_delete_only_touches_own_rows() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let ben = add_user(&conn, "ben");
        let category = add_category(&conn, ada, "Food", "expense");

        assert_eq!(delete_category(&conn, category, ben).unwrap(), 0);
        assert!(category_belongs_to_user(&conn, category, ada).unwrap());
        assert_eq!(delete_category(&conn, category, ada).unwrap(), 1);
        assert!(!category_belongs_to_user(&conn, category, ada).unwrap());
    }

    #[test]
    fn referenced_category_resists_raw_delete() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let category = add_category(&conn, ada, "Food", "expense");
        add_record(&conn, ada, category, 500, "expense", "2024-01-10");

        // Foreign key RESTRICT backs up the application-level guard.
        assert!(delete_category(&conn, category, ada).is_err());
    }

    #[test]
    fn user_delete_cascades_to_ledger() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let category = add_category(&conn, ada, "Food", "expense");
        let record = add_record(&conn, ada, category, 500, "expense", "2024-01-10");
        create_session(&conn, ada, "token-1", T0).unwrap();

        assert_eq!(delete_record(&conn, record, ada).unwrap(), 1);
        conn.execute("DELETE FROM users WHERE id = ?1", params![ada]).unwrap();

        let records: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        let categories: i64 = conn
            .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .unwrap();
        let sessions: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!((records, categories, sessions), (0, 0, 0));
    }

    #[test]
    fn record_listing_is_newest_first() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let category = add_category(&conn, ada, "Food", "expense");
        let first = add_record(&conn, ada, category, 100, "expense", "2024-01-15");
        let second = add_record(&conn, ada, category, 200, "expense", "2024-01-20");
        let third = add_record(&conn, ada, category, 300, "expense", "2024-01-20");

        let ids: Vec<i64> = list_records(&conn, ada, None, None, None)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![third, second, first]);
    }

    #[test]
    fn date_filter_wins_over_month() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let category = add_category(&conn, ada, "Food", "expense");
        add_record(&conn, ada, category, 100, "expense", "2024-01-15");
        add_record(&conn, ada, category, 200, "expense", "2024-01-20");
        add_record(&conn, ada, category, 300, "expense", "2024-02-20");

        let rows = list_records(&conn, ada, Some("2024-01-15"), Some("2024-02"), None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_date, "2024-01-15");

        let rows = list_records(&conn, ada, None, Some("2024-01"), None).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn kind_filter_composes_with_month() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let food = add_category(&conn, ada, "Food", "expense");
        let wages = add_category(&conn, ada, "Wages", "income");
        add_record(&conn, ada, food, 100, "expense", "2024-01-15");
        add_record(&conn, ada, wages, 900, "income", "2024-01-20");
        add_record(&conn, ada, wages, 900, "income", "2024-02-20");

        let rows = list_records(&conn, ada, None, Some("2024-01"), Some("income")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount_cents, 900);
        assert_eq!(rows[0].category_name, "Wages");
    }

    #[test]
    fn malformed_month_filters_match_nothing() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let food = add_category(&conn, ada, "Food", "expense");
        add_record(&conn, ada, food, 100, "expense", "2024-01-15");

        for month in ["%", "2024", "2024-1", "2024-0%", "2024_01", "2024-01-15"] {
            let rows = list_records(&conn, ada, None, Some(month), None).unwrap();
            assert_eq!(rows.len(), 0, "{month}");
            assert_eq!(totals(&conn, ada, Some(month)).unwrap(), (0, 0), "{month}");
            let by_category = category_totals(&conn, ada, Some(month)).unwrap();
            assert_eq!(by_category.len(), 0, "{month}");
        }

        let rows = list_records(&conn, ada, None, Some("2024-01"), None).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn listing_is_scoped_to_the_user() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let ben = add_user(&conn, "ben");
        let category = add_category(&conn, ada, "Food", "expense");
        add_record(&conn, ada, category, 100, "expense", "2024-01-15");

        assert_eq!(list_records(&conn, ben, None, None, None).unwrap().len(), 0);
    }

    #[test]
    fn record_delete_is_scoped_to_the_user() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let ben = add_user(&conn, "ben");
        let category = add_category(&conn, ada, "Food", "expense");
        let record = add_record(&conn, ada, category, 100, "expense", "2024-01-15");

        assert_eq!(delete_record(&conn, record, ben).unwrap(), 0);
        assert_eq!(list_records(&conn, ada, None, None, None).unwrap().len(), 1);
        assert_eq!(delete_record(&conn, record, ada).unwrap(), 1);
        assert_eq!(list_records(&conn, ada, None, None, None).unwrap().len(), 0);
    }

    #[test]
    fn totals_default_to_zero() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        assert_eq!(totals(&conn, ada, None).unwrap(), (0, 0));
        assert_eq!(totals(&conn, ada, Some("2024-01")).unwrap(), (0, 0));
    }

    #[test]
    fn totals_respect_month_scope() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let food = add_category(&conn, ada, "Food", "expense");
        let wages = add_category(&conn, ada, "Wages", "income");
        add_record(&conn, ada, wages, 10000, "income", "2024-01-15");
        add_record(&conn, ada, food, 3000, "expense", "2024-01-20");
        add_record(&conn, ada, food, 512, "expense", "2024-02-02");

        assert_eq!(totals(&conn, ada, Some("2024-01")).unwrap(), (10000, 3000));
        assert_eq!(totals(&conn, ada, None).unwrap(), (10000, 3512));
    }

    #[test]
    fn category_totals_order_by_sum_descending() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let food = add_category(&conn, ada, "Food", "expense");
        let rent = add_category(&conn, ada, "Rent", "expense");
        add_record(&conn, ada, food, 1000, "expense", "2024-01-10");
        add_record(&conn, ada, food, 2000, "expense", "2024-01-11");
        add_record(&conn, ada, rent, 90000, "expense", "2024-01-01");

        let rows = category_totals(&conn, ada, Some("2024-01")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "Rent");
        assert_eq!(rows[0].total_cents, 90000);
        assert_eq!(rows[0].count, 1);
        assert_eq!(rows[1].name, "Food");
        assert_eq!(rows[1].total_cents, 3000);
        assert_eq!(rows[1].count, 2);
    }

    #[test]
    fn monthly_totals_cap_and_order() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        let food = add_category(&conn, ada, "Food", "expense");
        for month in 1..=8 {
            let date = format!("2024-{month:02}-10");
            add_record(&conn, ada, food, 100 * month, "expense", &date);
        }

        let rows = monthly_totals(&conn, ada, 6).unwrap();
        assert_eq!(rows.len(), 6);
        // Newest first out of the store; callers flip to chronological order.
        assert_eq!(rows[0].month, "2024-08");
        assert_eq!(rows[5].month, "2024-03");
        assert_eq!(rows[0].expense_cents, 800);
        assert_eq!(rows[0].income_cents, 0);
    }

    #[test]
    fn sessions_roundtrip_and_prune() {
        let conn = test_conn();
        let ada = add_user(&conn, "ada");
        create_session(&conn, ada, "token-1", T0).unwrap();

        let user = user_by_session(&conn, "token-1").unwrap().unwrap();
        assert_eq!(user.id, ada);
        assert_eq!(user.username, "ada");
        assert!(user_by_session(&conn, "missing").unwrap().is_none());

        for n in 2..=7 {
            create_session(&conn, ada, &format!("token-{n}"), T0).unwrap();
        }
        prune_sessions(&conn, ada, 5).unwrap();
        assert!(user_by_session(&conn, "token-1").unwrap().is_none());
        assert!(user_by_session(&conn, "token-7").unwrap().is_some());

        delete_session(&conn, "token-7").unwrap();
        assert!(user_by_session(&conn, "token-7").unwrap().is_none());
        // Deleting an unknown token is not an error.
        delete_session(&conn, "token-7").unwrap();
    }
}
