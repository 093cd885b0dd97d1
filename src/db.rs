//! Row Mapper: a thin active-record layer over a pooled SQLite connection.
//!
//! Each entity type carries an explicit [`Schema`] value — an ordered field
//! list with exactly one primary key — from which the four CRUD statements
//! are generated once, at schema construction. All SQL is parameterized;
//! nothing from a request is ever spliced into statement text.
//!
//! The pool is owned by [`Db`] and passed in at construction. Every call
//! borrows the pool for exactly one statement, so a connection is checked
//! out, used, and returned before the call resolves — errors included.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::config::DbConfig;
use crate::error::Error;

/// Unique id: zero-padded epoch milliseconds + a v4 uuid, 50 chars.
/// Sorts roughly by creation time, which the schema relies on nowhere but
/// humans reading the tables appreciate.
pub fn next_id() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{:015}{}000", millis, uuid::Uuid::new_v4().simple())
}

/// Current time as fractional epoch seconds, the `created_at` representation.
pub fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ── Schema description ───────────────────────────────────────────────────────

/// Storage type of a field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl FieldType {
    fn column_sql(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "integer",
        }
    }
}

/// Default applied when a field is absent (or null) on a record at write time.
pub enum FieldDefault {
    /// A fixed value.
    Value(Value),
    /// Evaluated once per missing value, e.g. an id or timestamp generator.
    Generated(fn() -> Value),
}

impl FieldDefault {
    fn produce(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Generated(f) => f(),
        }
    }
}

/// One column of an entity's table.
pub struct FieldDef {
    pub name: &'static str,
    pub ty: FieldType,
    pub primary_key: bool,
    pub default: Option<FieldDefault>,
}

impl FieldDef {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty, primary_key: false, default: None }
    }

    pub fn primary(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn default_value(mut self, v: Value) -> Self {
        self.default = Some(FieldDefault::Value(v));
        self
    }

    pub fn generated(mut self, f: fn() -> Value) -> Self {
        self.default = Some(FieldDefault::Generated(f));
        self
    }
}

/// Explicit schema for one entity type: table name, ordered fields, one
/// primary key. The CRUD statement text is derived here, once.
pub struct Schema {
    pub table: &'static str,
    fields: Vec<FieldDef>,
    pk: &'static str,
    non_pk: Vec<&'static str>,
    select_sql: String,
    insert_sql: String,
    update_sql: String,
    delete_sql: String,
}

impl Schema {
    /// Builds a schema.
    ///
    /// # Panics
    ///
    /// Panics when the definition is invalid — zero or multiple primary keys,
    /// or a duplicate field name. Schemas are constructed once at startup, so
    /// a bad definition fails the process before it serves anything.
    pub fn new(table: &'static str, fields: Vec<FieldDef>) -> Self {
        let mut pk = None;
        let mut seen = std::collections::HashSet::new();
        for f in &fields {
            if !seen.insert(f.name) {
                panic!("schema `{table}`: duplicate field `{}`", f.name);
            }
            if f.primary_key {
                if pk.is_some() {
                    panic!("schema `{table}`: more than one primary key (`{}`)", f.name);
                }
                pk = Some(f.name);
            }
        }
        let pk = pk.unwrap_or_else(|| panic!("schema `{table}`: no primary key"));
        let non_pk: Vec<&'static str> =
            fields.iter().filter(|f| !f.primary_key).map(|f| f.name).collect();

        let cols = non_pk.join(", ");
        let placeholders = vec!["?"; non_pk.len() + 1].join(", ");
        let assignments =
            non_pk.iter().map(|c| format!("{c}=?")).collect::<Vec<_>>().join(", ");

        let select_sql = format!("select {pk}, {cols} from {table}");
        let insert_sql =
            format!("insert into {table} ({cols}, {pk}) values ({placeholders})");
        let update_sql = format!("update {table} set {assignments} where {pk}=?");
        let delete_sql = format!("delete from {table} where {pk}=?");

        Self { table, fields, pk, non_pk, select_sql, insert_sql, update_sql, delete_sql }
    }

    pub fn primary_key(&self) -> &'static str {
        self.pk
    }

    /// DDL used by tests and first-run bootstrap. Production schemas are
    /// assumed pre-created; there is no migrations tooling here.
    pub fn create_table_sql(&self) -> String {
        let cols = self
            .fields
            .iter()
            .map(|f| {
                if f.primary_key {
                    format!("{} {} primary key", f.name, f.ty.column_sql())
                } else {
                    format!("{} {}", f.name, f.ty.column_sql())
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("create table if not exists {} ({})", self.table, cols)
    }

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Value for `name` from `record`, falling back to the declared default.
    /// Generated defaults are evaluated here, once per missing value.
    fn value_or_default(&self, record: &mut Map<String, Value>, name: &str) -> Value {
        match record.get(name) {
            Some(v) if !v.is_null() => v.clone(),
            _ => {
                let v = self
                    .field(name)
                    .and_then(|f| f.default.as_ref())
                    .map(|d| d.produce())
                    .unwrap_or(Value::Null);
                if !v.is_null() {
                    debug!(table = self.table, field = name, "applied default");
                    record.insert(name.to_owned(), v.clone());
                }
                v
            }
        }
    }
}

// ── Bind values ──────────────────────────────────────────────────────────────

/// A value bound into a `?` placeholder.
#[derive(Clone, Debug)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    Null,
}

impl SqlValue {
    fn from_json(v: &Value) -> Self {
        match v {
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) if n.is_i64() => Self::Int(n.as_i64().unwrap_or(0)),
            Value::Number(n) => Self::Real(n.as_f64().unwrap_or(0.0)),
            Value::Null => Self::Null,
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for SqlValue {
    fn from(n: f64) -> Self {
        Self::Real(n)
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    args: &[SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlValue::Text(s) => query.bind(s.clone()),
            SqlValue::Int(n) => query.bind(*n),
            SqlValue::Real(n) => query.bind(*n),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Null => query.bind(Option::<String>::None),
        };
    }
    query
}

// ── Limit ────────────────────────────────────────────────────────────────────

/// Row cap for `find_all`: either a plain count or an (offset, count) pair.
/// Any other shape is rejected when parsing from a dynamic value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Limit {
    Rows(u32),
    OffsetCount(u32, u32),
}

impl Limit {
    /// Parses a dynamic limit value: an integer, or a two-element array of
    /// integers. Everything else is an invalid argument.
    pub fn from_value(v: &Value) -> Result<Self, Error> {
        match v {
            Value::Number(n) if n.is_u64() => Ok(Self::Rows(n.as_u64().unwrap_or(0) as u32)),
            Value::Array(parts) if parts.len() == 2 => {
                let off = parts[0].as_u64();
                let cnt = parts[1].as_u64();
                match (off, cnt) {
                    (Some(o), Some(c)) => Ok(Self::OffsetCount(o as u32, c as u32)),
                    _ => Err(Error::Config(format!("invalid limit value: {v}"))),
                }
            }
            other => Err(Error::Config(format!("invalid limit value: {other}"))),
        }
    }
}

// ── Entity trait ─────────────────────────────────────────────────────────────

/// A typed record mapped to a table row. Implementations pair a serde shape
/// with the [`Schema`] describing its storage.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    fn schema() -> &'static Schema;
}

// ── Write policy ─────────────────────────────────────────────────────────────

/// What to do when an `update`/`delete` affects a row count other than one.
///
/// Logging and carrying on masks lost updates and concurrent deletes, so
/// the strict alternative is available per deployment.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WritePolicy {
    #[default]
    Log,
    Fail,
}

// ── Db ───────────────────────────────────────────────────────────────────────

/// The mapper itself: an explicitly constructed pool plus the write policy.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
    policy: WritePolicy,
}

impl Db {
    /// Opens a pool with the configured bounds.
    pub async fn connect(cfg: &DbConfig) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .min_connections(cfg.min_connections)
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await?;
        Ok(Self { pool, policy: WritePolicy::default() })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool, policy: WritePolicy::default() }
    }

    pub fn with_policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Creates any missing tables. Test and first-run convenience only.
    pub async fn ensure_tables(&self, schemas: &[&Schema]) -> Result<(), Error> {
        for schema in schemas {
            sqlx::query(&schema.create_table_sql()).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Loads one entity by primary key.
    pub async fn find<E: Entity>(&self, pk: &str) -> Result<Option<E>, Error> {
        let schema = E::schema();
        let sql = format!("{} where {}=?", schema.select_sql, schema.pk);
        debug!(sql = %sql, "select");
        let row = sqlx::query(&sql).bind(pk).fetch_optional(&self.pool).await?;
        row.map(|r| decode::<E>(schema, &r)).transpose()
    }

    /// Loads entities matching an optional where clause, in an optional
    /// order, capped by an optional [`Limit`]. The clause and order strings
    /// are server-authored; only `args` carry request data, through `?`
    /// placeholders.
    pub async fn find_all<E: Entity>(
        &self,
        where_clause: Option<&str>,
        args: Vec<SqlValue>,
        order_by: Option<&str>,
        limit: Option<Limit>,
    ) -> Result<Vec<E>, Error> {
        let schema = E::schema();
        let mut sql = schema.select_sql.clone();
        let mut bound = args;
        if let Some(clause) = where_clause {
            sql.push_str(" where ");
            sql.push_str(clause);
        }
        if let Some(order) = order_by {
            sql.push_str(" order by ");
            sql.push_str(order);
        }
        match limit {
            Some(Limit::Rows(n)) => {
                sql.push_str(" limit ?");
                bound.push(SqlValue::Int(n as i64));
            }
            Some(Limit::OffsetCount(offset, count)) => {
                sql.push_str(" limit ?, ?");
                bound.push(SqlValue::Int(offset as i64));
                bound.push(SqlValue::Int(count as i64));
            }
            None => {}
        }
        debug!(sql = %sql, "select");
        let rows = bind_all(sqlx::query(&sql), &bound).fetch_all(&self.pool).await?;
        rows.iter().map(|r| decode::<E>(schema, r)).collect()
    }

    /// Evaluates an aggregate expression, e.g. `count(id)`.
    pub async fn count<E: Entity>(&self, expr: &str) -> Result<i64, Error> {
        let schema = E::schema();
        let sql = format!("select {expr} as agg from {}", schema.table);
        debug!(sql = %sql, "select");
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("agg")?)
    }

    /// Inserts an entity, filling declared defaults for absent fields, and
    /// returns it with those defaults applied.
    pub async fn insert<E: Entity>(&self, entity: E) -> Result<E, Error> {
        let schema = E::schema();
        let mut record = to_record(&entity)?;
        let mut args = Vec::with_capacity(schema.non_pk.len() + 1);
        for name in &schema.non_pk {
            args.push(SqlValue::from_json(&schema.value_or_default(&mut record, name)));
        }
        args.push(SqlValue::from_json(&schema.value_or_default(&mut record, schema.pk)));

        let affected = bind_all(sqlx::query(&schema.insert_sql), &args)
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.check_affected("insert", schema.table, affected)?;
        Ok(serde_json::from_value(Value::Object(record))?)
    }

    /// Writes every non-key field of `entity` to its row.
    pub async fn update<E: Entity>(&self, entity: &E) -> Result<u64, Error> {
        let schema = E::schema();
        let mut record = to_record(entity)?;
        let mut args = Vec::with_capacity(schema.non_pk.len() + 1);
        for name in &schema.non_pk {
            args.push(SqlValue::from_json(&schema.value_or_default(&mut record, name)));
        }
        args.push(SqlValue::from_json(&schema.value_or_default(&mut record, schema.pk)));

        let affected = bind_all(sqlx::query(&schema.update_sql), &args)
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.check_affected("update", schema.table, affected)?;
        Ok(affected)
    }

    /// Deletes `entity`'s row by primary key.
    pub async fn delete<E: Entity>(&self, entity: &E) -> Result<u64, Error> {
        let schema = E::schema();
        let mut record = to_record(entity)?;
        let pk = SqlValue::from_json(&schema.value_or_default(&mut record, schema.pk));
        let affected = bind_all(sqlx::query(&schema.delete_sql), &[pk])
            .execute(&self.pool)
            .await?
            .rows_affected();
        self.check_affected("delete", schema.table, affected)?;
        Ok(affected)
    }

    fn check_affected(
        &self,
        op: &'static str,
        table: &'static str,
        affected: u64,
    ) -> Result<(), Error> {
        if affected != 1 {
            match self.policy {
                WritePolicy::Log => {
                    warn!(op, table, affected, "write affected row count != 1");
                }
                WritePolicy::Fail => {
                    return Err(Error::RowCount { op, table, affected });
                }
            }
        }
        Ok(())
    }
}

fn to_record<E: Serialize>(entity: &E) -> Result<Map<String, Value>, Error> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Config(format!("entity did not serialize to a record: {other}"))),
    }
}

fn decode<E: Entity>(schema: &Schema, row: &SqliteRow) -> Result<E, Error> {
    let mut record = Map::new();
    for f in &schema.fields {
        let value = match f.ty {
            FieldType::Text => row
                .try_get::<Option<String>, _>(f.name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            FieldType::Integer => row
                .try_get::<Option<i64>, _>(f.name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            FieldType::Real => row
                .try_get::<Option<f64>, _>(f.name)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            FieldType::Boolean => row
                .try_get::<Option<bool>, _>(f.name)?
                .map(Value::Bool)
                .unwrap_or(Value::Null),
        };
        record.insert(f.name.to_owned(), value);
    }
    Ok(serde_json::from_value(Value::Object(record))?)
}
