use std::sync::Mutex;

use async_trait::async_trait;
use log::trace;
use serde_json::Value as JsonValue;
use sqlx::{sqlite::SqliteRow, FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::{
    db_types::Entity,
    specification::{Specification, SpecificationEvaluator},
    sqlite::StorageError,
};

enum Change<T> {
    Insert(T),
    Update(T),
    Delete(T),
}

/// Generic CRUD and specification-based reads over one entity type.
///
/// `add`, `update` and `delete` only stage changes; nothing is persisted until the owning [`super::UnitOfWork`]
/// commits. Reads execute immediately against the pool and never see staged changes.
///
/// A repository is not safe for concurrent use from multiple tasks; use one unit of work per in-flight request.
pub struct Repository<T: Entity> {
    pool: SqlitePool,
    staged: Mutex<Vec<Change<T>>>,
}

impl<T: Entity> Repository<T> {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool, staged: Mutex::new(Vec::new()) }
    }

    /// Stage an insertion. The store assigns the identity when the unit of work commits.
    pub fn add(&self, entity: T) {
        self.stage(Change::Insert(entity));
    }

    /// Stage a full replace of the persisted record, keyed by identity. Staging an entity whose identity is still
    /// the default is a caller contract violation and fails the commit.
    pub fn update(&self, entity: T) {
        self.stage(Change::Update(entity));
    }

    /// Stage a removal, keyed by identity.
    pub fn delete(&self, entity: T) {
        self.stage(Change::Delete(entity));
    }

    fn stage(&self, change: Change<T>) {
        self.staged.lock().expect("repository staging lock poisoned").push(change);
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<T>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT * FROM {} WHERE id = $1", T::TABLE);
        let entity = sqlx::query_as(&sql).bind(id).fetch_optional(&mut *conn).await?;
        Ok(entity)
    }

    pub async fn exists(&self, id: i64) -> Result<bool, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = $1", T::TABLE);
        let count: i64 = sqlx::query_scalar(&sql).bind(id).fetch_one(&mut *conn).await?;
        Ok(count > 0)
    }

    /// All entities matching the specification, with eager-load paths applied in declaration order.
    pub async fn list(&self, spec: &Specification<T>) -> Result<Vec<T>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let mut query = SpecificationEvaluator::query(spec);
        trace!("🗃️ Executing query: {}", query.sql());
        let mut rows: Vec<T> = query.build_query_as().fetch_all(&mut *conn).await?;
        for path in spec.includes() {
            T::load_related(&mut rows, path, &mut *conn).await?;
        }
        Ok(rows)
    }

    /// The number of rows the specification's criteria match, ignoring its paging.
    pub async fn count(&self, spec: &Specification<T>) -> Result<i64, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let mut query = SpecificationEvaluator::count_query(spec);
        let count = query.build_query_scalar().fetch_one(&mut *conn).await?;
        Ok(count)
    }

    /// The first entity matching the specification, or absence. No uniqueness is enforced; callers wanting "the"
    /// single match must narrow the criteria themselves.
    pub async fn get_one_matching(&self, spec: &Specification<T>) -> Result<Option<T>, StorageError> {
        let mut conn = self.pool.acquire().await?;
        let mut query = SpecificationEvaluator::query(spec);
        trace!("🗃️ Executing query: {}", query.sql());
        let row: Option<T> = query.build_query_as().fetch_optional(&mut *conn).await?;
        let mut rows: Vec<T> = row.into_iter().collect();
        for path in spec.includes() {
            T::load_related(&mut rows, path, &mut *conn).await?;
        }
        Ok(rows.pop())
    }

    /// Rows of the specification's projection. `R` must match the projected column list.
    pub async fn list_projected<R>(&self, spec: &Specification<T>) -> Result<Vec<R>, StorageError>
    where R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
        let mut conn = self.pool.acquire().await?;
        let mut query = SpecificationEvaluator::query(spec);
        trace!("🗃️ Executing query: {}", query.sql());
        let rows = query.build_query_as().fetch_all(&mut *conn).await?;
        Ok(rows)
    }

    /// The first projected row matching the specification, or absence.
    pub async fn get_one_matching_projected<R>(&self, spec: &Specification<T>) -> Result<Option<R>, StorageError>
    where R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin {
        let mut conn = self.pool.acquire().await?;
        let mut query = SpecificationEvaluator::query(spec);
        trace!("🗃️ Executing query: {}", query.sql());
        let row = query.build_query_as().fetch_optional(&mut *conn).await?;
        Ok(row)
    }
}

/// Type-erased handle the unit of work uses to flush staged changes inside its transaction.
#[async_trait]
pub(crate) trait StagedWrites: Send + Sync {
    async fn flush(&self, conn: &mut SqliteConnection) -> Result<u64, StorageError>;
}

#[async_trait]
impl<T: Entity> StagedWrites for Repository<T> {
    async fn flush(&self, conn: &mut SqliteConnection) -> Result<u64, StorageError> {
        let staged = std::mem::take(&mut *self.staged.lock().expect("repository staging lock poisoned"));
        let mut affected = 0;
        for change in staged {
            affected += match change {
                Change::Insert(entity) => insert_entity(&entity, conn).await?,
                Change::Update(entity) => update_entity(&entity, conn).await?,
                Change::Delete(entity) => delete_entity(&entity, conn).await?,
            };
        }
        Ok(affected)
    }
}

/// The entity's columns, taken from its serde representation, with relation fields stripped.
fn to_column_map<T: Entity>(entity: &T) -> Result<serde_json::Map<String, JsonValue>, StorageError> {
    match serde_json::to_value(entity) {
        Ok(JsonValue::Object(mut map)) => {
            for relation in T::RELATIONS {
                map.remove(*relation);
            }
            Ok(map)
        },
        Ok(other) => Err(StorageError::SerializationError(format!(
            "entity for table {} serialized to {other} rather than an object",
            T::TABLE
        ))),
        Err(e) => Err(StorageError::SerializationError(e.to_string())),
    }
}

async fn insert_entity<T: Entity>(entity: &T, conn: &mut SqliteConnection) -> Result<u64, StorageError> {
    let mut map = to_column_map(entity)?;
    if entity.id() == 0 {
        map.remove("id");
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("INSERT INTO {} (", T::TABLE));
    for (i, column) in map.keys().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(column);
    }
    qb.push(") VALUES (");
    for (i, value) in map.values().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_bind_json(&mut qb, value);
    }
    qb.push(")");
    trace!("🗃️ Executing query: {}", qb.sql());
    let result = qb.build().execute(conn).await?;
    Ok(result.rows_affected())
}

async fn update_entity<T: Entity>(entity: &T, conn: &mut SqliteConnection) -> Result<u64, StorageError> {
    if entity.id() == 0 {
        return Err(StorageError::MissingIdentity { table: T::TABLE });
    }
    let map = to_column_map(entity)?;
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!("UPDATE {} SET ", T::TABLE));
    let mut first = true;
    for (column, value) in map.iter().filter(|(column, _)| column.as_str() != "id") {
        if !first {
            qb.push(", ");
        }
        first = false;
        qb.push(column);
        qb.push(" = ");
        push_bind_json(&mut qb, value);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(entity.id());
    trace!("🗃️ Executing query: {}", qb.sql());
    let result = qb.build().execute(conn).await?;
    Ok(result.rows_affected())
}

async fn delete_entity<T: Entity>(entity: &T, conn: &mut SqliteConnection) -> Result<u64, StorageError> {
    if entity.id() == 0 {
        return Err(StorageError::MissingIdentity { table: T::TABLE });
    }
    let sql = format!("DELETE FROM {} WHERE id = $1", T::TABLE);
    let result = sqlx::query(&sql).bind(entity.id()).execute(conn).await?;
    Ok(result.rows_affected())
}

fn push_bind_json(qb: &mut QueryBuilder<Sqlite>, value: &JsonValue) {
    match value {
        JsonValue::Null => {
            qb.push("NULL");
        },
        JsonValue::Bool(v) => {
            qb.push_bind(*v);
        },
        JsonValue::Number(n) => {
            if let Some(v) = n.as_i64() {
                qb.push_bind(v);
            } else {
                qb.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        JsonValue::String(v) => {
            qb.push_bind(v.clone());
        },
        // Nested values persist as JSON text.
        other => {
            qb.push_bind(other.to_string());
        },
    }
}
