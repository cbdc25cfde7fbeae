//! Statement execution.
//!
//! The engine owns the set of open databases (one file per database under
//! the data directory) and dispatches parsed statements against the
//! current one. Query planning is deliberately thin: a `where` clause
//! whose equality conjuncts cover an index's key columns is answered
//! through the B+ tree; everything else is a sequential heap scan.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use substrate::disk::DiskManager;
use substrate::record::{Column, Field, Row, Schema, TypeId};
use substrate::{
    BufferPoolManager, RowId, CATALOG_META_PAGE_ID, DEFAULT_BUFFER_POOL_SIZE, INDEX_ROOTS_PAGE_ID,
};

use crate::catalog::CatalogManager;
use crate::errors::DbError;
use crate::granite_debug_log;
use crate::parser::{
    self, CompareOp, CreateIndexStatement, CreateTableStatement, DataType, DeleteStatement,
    Expression, InsertStatement, Literal, Projection, SelectStatement, Statement, UpdateStatement,
};
use crate::types::{ExecuteResult, ResultSet};

/// One open database file: its buffer pool and catalog.
pub struct Database {
    name: String,
    bpm: Arc<BufferPoolManager>,
    pub catalog: CatalogManager,
}

impl Database {
    pub fn open(path: &Path, name: &str) -> Result<Self, DbError> {
        let disk = DiskManager::open(path).map_err(DbError::Storage)?;
        let fresh = disk.is_fresh();
        let bpm = Arc::new(BufferPoolManager::new(DEFAULT_BUFFER_POOL_SIZE, disk));
        if fresh {
            // Reserve the two well-known pages; zeroed buffers are valid
            // empty registries for both.
            let catalog_page = bpm.new_page().map_err(DbError::Storage)?;
            let roots_page = bpm.new_page().map_err(DbError::Storage)?;
            if catalog_page.page_id() != CATALOG_META_PAGE_ID
                || roots_page.page_id() != INDEX_ROOTS_PAGE_ID
            {
                return Err(DbError::Failed(
                    "reserved pages landed on unexpected ids".to_string(),
                ));
            }
        }
        let catalog = CatalogManager::new(Arc::clone(&bpm), fresh)?;
        granite_debug_log!("[Database::open] opened '{name}' (fresh: {fresh})");
        Ok(Self {
            name: name.to_string(),
            bpm,
            catalog,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Flushes the catalog and every dirty page, then syncs the file.
    pub fn close(&self) -> Result<(), DbError> {
        self.catalog.flush_catalog_meta_page()?;
        self.bpm.close().map_err(DbError::Storage)?;
        Ok(())
    }
}

pub struct ExecuteEngine {
    data_dir: PathBuf,
    databases: BTreeMap<String, Database>,
    current: Option<String>,
}

impl ExecuteEngine {
    /// Opens every database file found under `data_dir`, creating the
    /// directory if missing.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, DbError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let mut databases = BTreeMap::new();
        for entry in fs::read_dir(&data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let database = Database::open(&entry.path(), &name)?;
            databases.insert(name, database);
        }
        Ok(Self {
            data_dir,
            databases,
            current: None,
        })
    }

    pub fn current_database(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Parses and runs every statement in `input`, in order.
    pub fn execute_sql(&mut self, input: &str) -> Result<Vec<ExecuteResult>, DbError> {
        let statements = parser::sql_parser(input).map_err(|errors| {
            let first = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unreadable statement".to_string());
            DbError::Parse(first)
        })?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in &statements {
            results.push(self.execute(statement)?);
        }
        Ok(results)
    }

    pub fn execute(&mut self, statement: &Statement) -> Result<ExecuteResult, DbError> {
        match statement {
            Statement::CreateDatabase(name) => self.execute_create_database(name),
            Statement::DropDatabase(name) => self.execute_drop_database(name),
            Statement::ShowDatabases => self.execute_show_databases(),
            Statement::UseDatabase(name) => self.execute_use_database(name),
            Statement::ShowTables => self.execute_show_tables(),
            Statement::ShowIndexes => self.execute_show_indexes(),
            Statement::CreateTable(stmt) => self.execute_create_table(stmt),
            Statement::DropTable(name) => self.execute_drop_table(name),
            Statement::CreateIndex(stmt) => self.execute_create_index(stmt),
            Statement::DropIndex(name) => self.execute_drop_index(name),
            Statement::Select(stmt) => self.execute_select(stmt),
            Statement::Insert(stmt) => self.execute_insert(stmt),
            Statement::Update(stmt) => self.execute_update(stmt),
            Statement::Delete(stmt) => self.execute_delete(stmt),
            Statement::ExecFile(path) => self.execute_execfile(path),
            Statement::Quit => Err(DbError::Quit),
        }
    }

    /// Closes every open database. Called once on shutdown.
    pub fn close_all(&mut self) -> Result<(), DbError> {
        for database in self.databases.values() {
            database.close()?;
        }
        self.databases.clear();
        self.current = None;
        Ok(())
    }

    fn current_db(&self) -> Result<&Database, DbError> {
        let name = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::Failed("no database selected".to_string()))?;
        self.databases.get(name).ok_or(DbError::NotExist)
    }

    fn current_db_mut(&mut self) -> Result<&mut Database, DbError> {
        let name = self
            .current
            .clone()
            .ok_or_else(|| DbError::Failed("no database selected".to_string()))?;
        self.databases.get_mut(&name).ok_or(DbError::NotExist)
    }

    fn execute_create_database(&mut self, name: &str) -> Result<ExecuteResult, DbError> {
        if self.databases.contains_key(name) {
            return Err(DbError::AlreadyExist);
        }
        let database = Database::open(&self.data_dir.join(name), name)?;
        self.databases.insert(name.to_string(), database);
        Ok(ExecuteResult::Message("Database created.".to_string()))
    }

    fn execute_drop_database(&mut self, name: &str) -> Result<ExecuteResult, DbError> {
        let database = self.databases.remove(name).ok_or(DbError::NotExist)?;
        database.close()?;
        drop(database);
        fs::remove_file(self.data_dir.join(name))?;
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        Ok(ExecuteResult::Message("Database dropped.".to_string()))
    }

    fn execute_show_databases(&self) -> Result<ExecuteResult, DbError> {
        Ok(ExecuteResult::ResultSet(ResultSet {
            columns: vec!["database".to_string()],
            rows: self.databases.keys().map(|n| vec![n.clone()]).collect(),
        }))
    }

    fn execute_use_database(&mut self, name: &str) -> Result<ExecuteResult, DbError> {
        if !self.databases.contains_key(name) {
            return Err(DbError::NotExist);
        }
        self.current = Some(name.to_string());
        Ok(ExecuteResult::Message("Database changed.".to_string()))
    }

    fn execute_show_tables(&self) -> Result<ExecuteResult, DbError> {
        let db = self.current_db()?;
        Ok(ExecuteResult::ResultSet(ResultSet {
            columns: vec!["table".to_string()],
            rows: db
                .catalog
                .tables()
                .iter()
                .map(|t| vec![t.table_name().to_string()])
                .collect(),
        }))
    }

    fn execute_show_indexes(&self) -> Result<ExecuteResult, DbError> {
        let db = self.current_db()?;
        let mut rows = Vec::new();
        for (table_name, info) in db.catalog.all_indexes() {
            let table = db.catalog.table(table_name)?;
            let columns: Vec<String> = info
                .key_map()
                .iter()
                .map(|&i| table.schema().column(i as usize).name().to_string())
                .collect();
            rows.push(vec![
                table_name.to_string(),
                info.index_name().to_string(),
                columns.join(", "),
            ]);
        }
        Ok(ExecuteResult::ResultSet(ResultSet {
            columns: vec![
                "table".to_string(),
                "index".to_string(),
                "columns".to_string(),
            ],
            rows,
        }))
    }

    fn execute_create_table(&mut self, stmt: &CreateTableStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let mut columns = Vec::with_capacity(stmt.columns.len());
        for (position, def) in stmt.columns.iter().enumerate() {
            if stmt.columns[..position].iter().any(|c| c.name == def.name) {
                return Err(DbError::Failed(format!(
                    "duplicate column name '{}'",
                    def.name
                )));
            }
            let in_primary_key = stmt.primary_key.contains(&def.name);
            let sole_primary_key = stmt.primary_key.len() == 1 && in_primary_key;
            let unique =
                def.unique || stmt.unique_columns.contains(&def.name) || sole_primary_key;
            let nullable = !(def.not_null || in_primary_key);
            let column = match def.data_type {
                DataType::Int => {
                    Column::new_scalar(&def.name, TypeId::Int, position as u32, nullable, unique)
                }
                DataType::Float => {
                    Column::new_scalar(&def.name, TypeId::Float, position as u32, nullable, unique)
                }
                DataType::Char(len) => {
                    if len == 0 {
                        return Err(DbError::Failed(format!(
                            "CHAR column '{}' needs a positive length",
                            def.name
                        )));
                    }
                    Column::new_char(&def.name, len, position as u32, nullable, unique)
                }
            };
            columns.push(column);
        }
        let known = |name: &str| stmt.columns.iter().any(|c| c.name == name);
        if let Some(missing) = stmt
            .primary_key
            .iter()
            .chain(stmt.unique_columns.iter())
            .find(|name| !known(name.as_str()))
        {
            granite_debug_log!("[create_table] unknown constraint column '{missing}'");
            return Err(DbError::ColumnNameNotExist);
        }

        let schema = Schema::new(columns);
        db.catalog.create_table(&stmt.table_name, schema)?;

        // Constraints become indexes so lookups and uniqueness probes can
        // go through the B+ tree.
        if !stmt.primary_key.is_empty() {
            let index_name = format!("pk_{}", stmt.table_name);
            db.catalog
                .create_index(&stmt.table_name, &index_name, &stmt.primary_key)?;
        }
        let sole_pk = (stmt.primary_key.len() == 1).then(|| stmt.primary_key[0].clone());
        let mut unique_cols: Vec<String> = stmt
            .columns
            .iter()
            .filter(|c| c.unique)
            .map(|c| c.name.clone())
            .collect();
        for name in &stmt.unique_columns {
            if !unique_cols.contains(name) {
                unique_cols.push(name.clone());
            }
        }
        for column in unique_cols {
            if Some(&column) == sole_pk.as_ref() {
                continue;
            }
            let index_name = format!("unique_{}_{}", stmt.table_name, column);
            db.catalog
                .create_index(&stmt.table_name, &index_name, &[column])?;
        }
        Ok(ExecuteResult::Message("Table created.".to_string()))
    }

    fn execute_drop_table(&mut self, name: &str) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        db.catalog.drop_table(name)?;
        Ok(ExecuteResult::Message("Table dropped.".to_string()))
    }

    fn execute_create_index(&mut self, stmt: &CreateIndexStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let index_id = db
            .catalog
            .create_index(&stmt.table_name, &stmt.index_name, &stmt.columns)?;

        // Existing rows enter the new index immediately.
        let entries: Vec<(Vec<u8>, RowId)> = {
            let table = db.catalog.table(&stmt.table_name)?;
            let info = db
                .catalog
                .index_by_id(index_id)
                .ok_or(DbError::IndexNotFound)?;
            let km = info.btree().key_manager();
            let mut entries = Vec::new();
            for row in table.heap().iter() {
                let key = km
                    .encode(&row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                entries.push((key, row.rid()));
            }
            entries
        };
        for (key, rid) in entries {
            let info = db
                .catalog
                .index_by_id_mut(index_id)
                .ok_or(DbError::IndexNotFound)?;
            if !info.btree_mut().insert(&key, rid).map_err(DbError::Storage)? {
                let table_name = stmt.table_name.clone();
                let index_name = stmt.index_name.clone();
                db.catalog.drop_index(&table_name, &index_name)?;
                return Err(DbError::Failed(format!(
                    "duplicate key prevents building unique index '{index_name}'"
                )));
            }
        }
        Ok(ExecuteResult::Message("Index created.".to_string()))
    }

    fn execute_drop_index(&mut self, index_name: &str) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let table_name = db
            .catalog
            .find_index_table(index_name)
            .ok_or(DbError::IndexNotFound)?;
        db.catalog.drop_index(&table_name, index_name)?;
        Ok(ExecuteResult::Message("Index dropped.".to_string()))
    }

    fn execute_select(&self, stmt: &SelectStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db()?;
        let table = db.catalog.table(&stmt.table_name)?;
        let schema = Arc::clone(table.schema());
        let projection: Vec<usize> = match &stmt.projection {
            Projection::All => (0..schema.column_count()).collect(),
            Projection::Columns(names) => names
                .iter()
                .map(|name| schema.column_index(name).ok_or(DbError::ColumnNameNotExist))
                .collect::<Result<_, _>>()?,
        };
        let rows = collect_matching_rows(db, &stmt.table_name, stmt.selection.as_ref())?;
        Ok(ExecuteResult::ResultSet(ResultSet {
            columns: projection
                .iter()
                .map(|&i| schema.column(i).name().to_string())
                .collect(),
            rows: rows
                .iter()
                .map(|row| {
                    projection
                        .iter()
                        .map(|&i| row.field(i).to_string())
                        .collect()
                })
                .collect(),
        }))
    }

    fn execute_insert(&mut self, stmt: &InsertStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let (schema, index_ids) = {
            let table = db.catalog.table(&stmt.table_name)?;
            (
                Arc::clone(table.schema()),
                db.catalog.table_index_ids(&stmt.table_name),
            )
        };
        let row = build_row(&schema, &stmt.values)?;

        // Uniqueness probes before the heap is touched.
        for &index_id in &index_ids {
            let info = db
                .catalog
                .index_by_id(index_id)
                .ok_or(DbError::IndexNotFound)?;
            let key = info
                .btree()
                .key_manager()
                .encode(&row.project(info.key_map()))
                .map_err(DbError::Storage)?;
            if info.btree().get_value(&key).map_err(DbError::Storage)?.is_some() {
                return Err(DbError::Failed(format!(
                    "duplicate entry for index '{}'",
                    info.index_name()
                )));
            }
        }

        let mut row = row;
        {
            let table = db.catalog.table(&stmt.table_name)?;
            table.heap().insert_tuple(&mut row).map_err(DbError::Storage)?;
        }
        for &index_id in &index_ids {
            let info = db
                .catalog
                .index_by_id_mut(index_id)
                .ok_or(DbError::IndexNotFound)?;
            let key = info
                .btree()
                .key_manager()
                .encode(&row.project(info.key_map()))
                .map_err(DbError::Storage)?;
            info.btree_mut()
                .insert(&key, row.rid())
                .map_err(DbError::Storage)?;
        }
        Ok(ExecuteResult::Insert(1))
    }

    fn execute_update(&mut self, stmt: &UpdateStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let (schema, index_ids) = {
            let table = db.catalog.table(&stmt.table_name)?;
            (
                Arc::clone(table.schema()),
                db.catalog.table_index_ids(&stmt.table_name),
            )
        };
        let assignments: Vec<(usize, Field)> = stmt
            .assignments
            .iter()
            .map(|(name, literal)| {
                let position = schema
                    .column_index(name)
                    .ok_or(DbError::ColumnNameNotExist)?;
                let field = storage_field(schema.column(position), literal)?;
                Ok((position, field))
            })
            .collect::<Result<_, DbError>>()?;

        let matches = collect_matching_rows(db, &stmt.table_name, stmt.selection.as_ref())?;
        let mut updated = 0;
        for old_row in matches {
            let mut fields = old_row.fields().to_vec();
            for (position, field) in &assignments {
                fields[*position] = field.clone();
            }
            let new_row = Row::new(fields);

            // Reject key collisions with other rows before mutating.
            for &index_id in &index_ids {
                let info = db
                    .catalog
                    .index_by_id(index_id)
                    .ok_or(DbError::IndexNotFound)?;
                let km = info.btree().key_manager();
                let old_key = km
                    .encode(&old_row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                let new_key = km
                    .encode(&new_row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                if new_key != old_key
                    && info
                        .btree()
                        .get_value(&new_key)
                        .map_err(DbError::Storage)?
                        .is_some()
                {
                    return Err(DbError::Failed(format!(
                        "duplicate entry for index '{}'",
                        info.index_name()
                    )));
                }
            }

            for &index_id in &index_ids {
                let info = db
                    .catalog
                    .index_by_id_mut(index_id)
                    .ok_or(DbError::IndexNotFound)?;
                let old_key = info
                    .btree()
                    .key_manager()
                    .encode(&old_row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                info.btree_mut().remove(&old_key).map_err(DbError::Storage)?;
            }
            let new_rid = {
                let table = db.catalog.table(&stmt.table_name)?;
                table
                    .heap()
                    .update_tuple(&new_row, old_row.rid())
                    .map_err(DbError::Storage)?
            };
            for &index_id in &index_ids {
                let info = db
                    .catalog
                    .index_by_id_mut(index_id)
                    .ok_or(DbError::IndexNotFound)?;
                let new_key = info
                    .btree()
                    .key_manager()
                    .encode(&new_row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                info.btree_mut()
                    .insert(&new_key, new_rid)
                    .map_err(DbError::Storage)?;
            }
            updated += 1;
        }
        Ok(ExecuteResult::Update(updated))
    }

    fn execute_delete(&mut self, stmt: &DeleteStatement) -> Result<ExecuteResult, DbError> {
        let db = self.current_db_mut()?;
        let index_ids = {
            db.catalog.table(&stmt.table_name)?;
            db.catalog.table_index_ids(&stmt.table_name)
        };
        let matches = collect_matching_rows(db, &stmt.table_name, stmt.selection.as_ref())?;
        let mut deleted = 0;
        for row in matches {
            for &index_id in &index_ids {
                let info = db
                    .catalog
                    .index_by_id_mut(index_id)
                    .ok_or(DbError::IndexNotFound)?;
                let key = info
                    .btree()
                    .key_manager()
                    .encode(&row.project(info.key_map()))
                    .map_err(DbError::Storage)?;
                info.btree_mut().remove(&key).map_err(DbError::Storage)?;
            }
            {
                let table = db.catalog.table(&stmt.table_name)?;
                table.heap().mark_delete(row.rid()).map_err(DbError::Storage)?;
                table.heap().apply_delete(row.rid()).map_err(DbError::Storage)?;
            }
            deleted += 1;
        }
        Ok(ExecuteResult::Delete(deleted))
    }

    fn execute_execfile(&mut self, path: &str) -> Result<ExecuteResult, DbError> {
        let script = fs::read_to_string(path)
            .map_err(|e| DbError::Failed(format!("cannot read '{path}': {e}")))?;
        let statements = parser::sql_parser(&script).map_err(|errors| {
            let first = errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unreadable statement".to_string());
            DbError::Parse(first)
        })?;
        let count = statements.len();
        for statement in &statements {
            let result = self.execute(statement)?;
            println!("{}", result.render());
        }
        Ok(ExecuteResult::Message(format!(
            "{count} statement(s) executed."
        )))
    }
}

/// Rows of the table satisfying the predicate, through an index probe
/// when the equality conjuncts cover one, otherwise by scanning.
fn collect_matching_rows(
    db: &Database,
    table_name: &str,
    selection: Option<&Expression>,
) -> Result<Vec<Row>, DbError> {
    let table = db.catalog.table(table_name)?;
    let schema = table.schema();
    if let Some(expr) = selection {
        validate_expression(expr, schema)?;
        if let Some(rids) = try_index_probe(db, table_name, expr)? {
            let mut rows = Vec::new();
            for rid in rids {
                if let Some(row) = table.heap().get_tuple(rid).map_err(DbError::Storage)? {
                    if evaluate(expr, &row, schema)? {
                        rows.push(row);
                    }
                }
            }
            return Ok(rows);
        }
    }
    let mut rows = Vec::new();
    for row in table.heap().iter() {
        let keep = match selection {
            None => true,
            Some(expr) => evaluate(expr, &row, schema)?,
        };
        if keep {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Equality conjuncts of an AND-only predicate; None when the tree
/// contains an OR, which disqualifies the index fast path.
fn equality_conjuncts<'a>(
    expr: &'a Expression,
    out: &mut Vec<(&'a str, &'a Literal)>,
) -> bool {
    match expr {
        Expression::Compare {
            column,
            op: CompareOp::Eq,
            value,
        } => {
            out.push((column.as_str(), value));
            true
        }
        Expression::Compare { .. } | Expression::IsNull { .. } => true,
        Expression::And(left, right) => {
            equality_conjuncts(left, out) && equality_conjuncts(right, out)
        }
        Expression::Or(_, _) => false,
    }
}

/// A point probe through the first index whose key columns all carry
/// equality literals.
fn try_index_probe(
    db: &Database,
    table_name: &str,
    expr: &Expression,
) -> Result<Option<Vec<RowId>>, DbError> {
    let mut conjuncts = Vec::new();
    if !equality_conjuncts(expr, &mut conjuncts) || conjuncts.is_empty() {
        return Ok(None);
    }
    let table = db.catalog.table(table_name)?;
    let schema = table.schema();
    for info in db.catalog.table_indexes(table_name)? {
        let mut key_fields = Vec::with_capacity(info.key_map().len());
        for &position in info.key_map() {
            let column = schema.column(position as usize);
            match conjuncts.iter().find(|(name, _)| *name == column.name()) {
                Some((_, literal)) => key_fields.push(compare_field(column, literal)?),
                None => {
                    key_fields.clear();
                    break;
                }
            }
        }
        if key_fields.len() != info.key_map().len() {
            continue;
        }
        let km = info.btree().key_manager();
        let key = km.encode(&Row::new(key_fields)).map_err(DbError::Storage)?;
        granite_debug_log!(
            "[try_index_probe] probing index '{}' for table '{table_name}'",
            info.index_name()
        );
        let rids = match info.btree().get_value(&key).map_err(DbError::Storage)? {
            Some(rid) => vec![rid],
            None => Vec::new(),
        };
        return Ok(Some(rids));
    }
    Ok(None)
}

fn validate_expression(expr: &Expression, schema: &Schema) -> Result<(), DbError> {
    match expr {
        Expression::Compare { column, .. } | Expression::IsNull { column, .. } => {
            schema
                .column_index(column)
                .map(|_| ())
                .ok_or(DbError::ColumnNameNotExist)
        }
        Expression::And(left, right) | Expression::Or(left, right) => {
            validate_expression(left, schema)?;
            validate_expression(right, schema)
        }
    }
}

fn evaluate(expr: &Expression, row: &Row, schema: &Schema) -> Result<bool, DbError> {
    match expr {
        Expression::Compare { column, op, value } => {
            let position = schema
                .column_index(column)
                .ok_or(DbError::ColumnNameNotExist)?;
            let field = row.field(position);
            if field.is_null() || *value == Literal::Null {
                // Comparisons against null never hold.
                return Ok(false);
            }
            let literal_field = compare_field(schema.column(position), value)?;
            let ord = field.compare(&literal_field);
            Ok(match op {
                CompareOp::Eq => ord == Ordering::Equal,
                CompareOp::NotEq => ord != Ordering::Equal,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::LtEq => ord != Ordering::Greater,
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::GtEq => ord != Ordering::Less,
            })
        }
        Expression::IsNull { column, negated } => {
            let position = schema
                .column_index(column)
                .ok_or(DbError::ColumnNameNotExist)?;
            Ok(row.field(position).is_null() != *negated)
        }
        Expression::And(left, right) => {
            Ok(evaluate(left, row, schema)? && evaluate(right, row, schema)?)
        }
        Expression::Or(left, right) => {
            Ok(evaluate(left, row, schema)? || evaluate(right, row, schema)?)
        }
    }
}

/// Coerces a literal to a column's type for comparisons and key probes.
fn compare_field(column: &Column, literal: &Literal) -> Result<Field, DbError> {
    let mismatch = || {
        DbError::Failed(format!(
            "value does not match the type of column '{}'",
            column.name()
        ))
    };
    match (literal, column.type_id()) {
        (Literal::Null, type_id) => Ok(Field::Null(type_id)),
        (Literal::Int(v), TypeId::Int) => {
            let v = i32::try_from(*v)
                .map_err(|_| DbError::Failed(format!("integer out of range: {v}")))?;
            Ok(Field::Int(v))
        }
        (Literal::Int(v), TypeId::Float) => Ok(Field::Float(*v as f32)),
        (Literal::Float(v), TypeId::Float) => Ok(Field::Float(*v as f32)),
        (Literal::Str(s), TypeId::Char) => Ok(Field::Char(s.clone())),
        _ => Err(mismatch()),
    }
}

/// Coerces a literal for storage, enforcing not-null and CHAR length.
fn storage_field(column: &Column, literal: &Literal) -> Result<Field, DbError> {
    let field = compare_field(column, literal)?;
    if field.is_null() && !column.is_nullable() {
        return Err(DbError::Failed(format!(
            "column '{}' is not nullable",
            column.name()
        )));
    }
    if let Field::Char(s) = &field {
        if s.len() > column.length() as usize {
            return Err(DbError::Failed(format!(
                "value too long for column '{}'",
                column.name()
            )));
        }
    }
    Ok(field)
}

fn build_row(schema: &Schema, values: &[Literal]) -> Result<Row, DbError> {
    if values.len() != schema.column_count() {
        return Err(DbError::Failed(format!(
            "expected {} values, got {}",
            schema.column_count(),
            values.len()
        )));
    }
    let fields = schema
        .columns()
        .iter()
        .zip(values)
        .map(|(column, literal)| storage_field(column, literal))
        .collect::<Result<Vec<_>, DbError>>()?;
    Ok(Row::new(fields))
}
