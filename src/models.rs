use serde::Serialize;

#[derive(Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

#[derive(Serialize)]
pub struct Category {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub icon: String,
    pub created_at: String,
}

pub struct RecordRow {
    pub id: i64,
    pub user_id: i64,
    pub category_id: i64,
    pub amount_cents: i64,
    pub kind: String,
    pub description: String,
    pub record_date: String,
    pub created_at: String,
    pub category_name: String,
    pub icon: String,
}

pub struct CategoryTotal {
    pub name: String,
    pub icon: String,
    pub kind: String,
    pub total_cents: i64,
    pub count: i64,
}

pub struct MonthTotals {
    pub month: String,
    pub income_cents: i64,
    pub expense_cents: i64,
}
