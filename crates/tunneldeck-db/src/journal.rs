//! Append-only event journal with filtered, paginated search

use crate::entities::endpoint_event;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use sea_orm::sea_query::{Expr, Func, LikeExpr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tunneldeck_proto::LogLevel;

/// Default page size for journal search
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Upper bound on the page size a caller may request
pub const MAX_PAGE_SIZE: u64 = 1000;

/// One event to record
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub endpoint_id: i64,
    pub instance_id: Option<String>,
    pub event_type: String,
    pub logs: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
}

/// Journal search criteria
#[derive(Debug, Clone)]
pub struct JournalFilter {
    pub endpoint_id: i64,
    pub instance_id: Option<String>,
    pub event_type: Option<String>,
    pub level: Option<LogLevel>,
    /// Case-insensitive substring of the log text
    pub keyword: Option<String>,
    /// `YYYY-MM-DD` (start of day) or RFC 3339
    pub start: Option<String>,
    /// `YYYY-MM-DD` (whole day included) or RFC 3339
    pub end: Option<String>,
    /// 1-based
    pub page: u64,
    pub size: u64,
}

impl JournalFilter {
    pub fn new(endpoint_id: i64) -> Self {
        Self {
            endpoint_id,
            instance_id: None,
            event_type: None,
            level: None,
            keyword: None,
            start: None,
            end: None,
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A journal record as returned by search
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub id: i64,
    pub endpoint_id: i64,
    pub instance_id: Option<String>,
    pub event_type: String,
    pub logs: Option<String>,
    pub level: LogLevel,
    pub event_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<endpoint_event::Model> for JournalEntry {
    fn from(model: endpoint_event::Model) -> Self {
        let level = LogLevel::classify(model.logs.as_deref().unwrap_or_default());
        Self {
            id: model.id,
            endpoint_id: model.endpoint_id,
            instance_id: model.instance_id,
            event_type: model.event_type,
            logs: model.logs,
            level,
            event_time: model.event_time,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JournalPage {
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub total_pages: u64,
    pub records: Vec<JournalEntry>,
}

pub struct EventJournal<'a, C> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> EventJournal<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn append(&self, event: NewEvent) -> Result<endpoint_event::Model> {
        let record = endpoint_event::ActiveModel {
            endpoint_id: Set(event.endpoint_id),
            instance_id: Set(event.instance_id),
            event_type: Set(event.event_type),
            logs: Set(event.logs),
            event_time: Set(event.event_time),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        Ok(record.insert(self.conn).await?)
    }

    /// Search the journal, newest records first
    pub async fn search(&self, filter: &JournalFilter) -> Result<JournalPage> {
        let page = filter.page.max(1);
        let size = match filter.size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        };

        let mut query = endpoint_event::Entity::find()
            .filter(endpoint_event::Column::EndpointId.eq(filter.endpoint_id));

        if let Some(instance_id) = filter.instance_id.as_deref().filter(|s| !s.is_empty()) {
            query = query.filter(endpoint_event::Column::InstanceId.eq(instance_id));
        }
        if let Some(event_type) = filter.event_type.as_deref().filter(|s| !s.is_empty()) {
            query = query.filter(endpoint_event::Column::EventType.eq(event_type));
        }
        if let Some(keyword) = filter.keyword.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(logs_contain(&keyword.to_lowercase()));
        }
        if let Some(level) = filter.level {
            query = query.filter(level_condition(level));
        }
        if let Some(start) = filter.start.as_deref().filter(|s| !s.is_empty()) {
            query = query.filter(endpoint_event::Column::CreatedAt.gte(parse_bound(start, false)?));
        }
        if let Some(end) = filter.end.as_deref().filter(|s| !s.is_empty()) {
            query = match parse_bound(end, true)? {
                Bound::Before(limit) => query.filter(endpoint_event::Column::CreatedAt.lt(limit)),
                Bound::At(limit) => query.filter(endpoint_event::Column::CreatedAt.lte(limit)),
            };
        }

        let paginator = query
            .order_by_desc(endpoint_event::Column::CreatedAt)
            .order_by_desc(endpoint_event::Column::Id)
            .paginate(self.conn, size);

        let total = paginator.num_items().await?;
        let records = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(JournalEntry::from)
            .collect();

        Ok(JournalPage {
            total,
            page,
            size,
            total_pages: total.div_ceil(size),
            records,
        })
    }

    pub async fn count_for_endpoint(&self, endpoint_id: i64) -> Result<u64> {
        Ok(endpoint_event::Entity::find()
            .filter(endpoint_event::Column::EndpointId.eq(endpoint_id))
            .count(self.conn)
            .await?)
    }

    pub async fn delete_for_instance(&self, endpoint_id: i64, instance_id: &str) -> Result<u64> {
        let result = endpoint_event::Entity::delete_many()
            .filter(endpoint_event::Column::EndpointId.eq(endpoint_id))
            .filter(endpoint_event::Column::InstanceId.eq(instance_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn delete_for_endpoint(&self, endpoint_id: i64) -> Result<u64> {
        let result = endpoint_event::Entity::delete_many()
            .filter(endpoint_event::Column::EndpointId.eq(endpoint_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}

fn lower_logs() -> Expr {
    Expr::expr(Func::lower(Expr::col(endpoint_event::Column::Logs)))
}

const LIKE_ESCAPE: char = '\\';

/// `LIKE` pattern matching `needle` literally anywhere in the text
fn substring_pattern(needle: &str) -> LikeExpr {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_') || c == LIKE_ESCAPE {
            pattern.push(LIKE_ESCAPE);
        }
        pattern.push(c);
    }
    pattern.push('%');
    LikeExpr::new(pattern).escape(LIKE_ESCAPE)
}

fn logs_contain(needle: &str) -> SimpleExpr {
    lower_logs().like(substring_pattern(needle))
}

fn logs_lack(needle: &str) -> SimpleExpr {
    lower_logs().not_like(substring_pattern(needle))
}

/// SQL form of [`LogLevel::classify`]: a level matches when its marker is
/// present and no marker of higher precedence is.
fn level_condition(level: LogLevel) -> Condition {
    const MARKERS: [(LogLevel, &str); 4] = [
        (LogLevel::Error, "error"),
        (LogLevel::Warn, "warn"),
        (LogLevel::Debug, "debug"),
        (LogLevel::Events, "events"),
    ];

    let mut cond = Condition::all();
    for (marker_level, marker) in MARKERS {
        if marker_level == level {
            return cond.add(logs_contain(marker));
        }
        cond = cond.add(logs_lack(marker));
    }

    // INFO: no marker at all, which includes events without text
    Condition::any()
        .add(endpoint_event::Column::Logs.is_null())
        .add(cond)
}

enum Bound {
    Before(DateTime<Utc>),
    At(DateTime<Utc>),
}

impl From<Bound> for sea_orm::Value {
    fn from(bound: Bound) -> Self {
        match bound {
            Bound::Before(t) | Bound::At(t) => t.into(),
        }
    }
}

/// Parse a search bound. A bare date covers the whole local calendar day.
fn parse_bound(raw: &str, end: bool) -> Result<Bound> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let day = if end {
            date.checked_add_days(Days::new(1))
                .ok_or_else(|| StoreError::InvalidFilter(raw.to_string()))?
        } else {
            date
        };
        let local = Local
            .from_local_datetime(&day.and_time(NaiveTime::MIN))
            .earliest()
            .ok_or_else(|| StoreError::InvalidFilter(raw.to_string()))?;
        let instant = local.with_timezone(&Utc);
        return Ok(if end {
            Bound::Before(instant)
        } else {
            Bound::At(instant)
        });
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|t| Bound::At(t.with_timezone(&Utc)))
        .map_err(|_| StoreError::InvalidFilter(raw.to_string()))
}
