use diesel::prelude::*;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = crate::schema::counters)]
pub struct Counter {
    pub key: String,
    pub value: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::counters)]
pub struct NewCounter {
    pub key: String,
    pub value: i64,
    pub updated_at: Option<DateTime<Utc>>,
}
