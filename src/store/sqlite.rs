use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{
    Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior, params,
    params_from_iter,
};

use super::schema::SCHEMA;
use super::{IndexFilter, IndexTransaction, Store, StoreStats};
use crate::error::{Error, Result};
use crate::types::*;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MODULE_COLUMNS: &str = "id, name, created_at";
const BRANCH_COLUMNS: &str =
    "b.id, b.module_id, m.name, b.name, b.latest_index_id, b.created_at";
const INDEX_COLUMNS: &str = "i.id, i.branch_id, i.commit_ref, i.value, i.created_at";
const USER_COLUMNS: &str = "id, username, password_hash, created_at, updated_at";
const ACCESS_KEY_COLUMNS: &str =
    "id, user_id, label, key_lookup, secret_hash, scope, created_at, expires_at, last_used_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_busy_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Opens the database, waiting up to `busy_timeout` for locks held by
    /// other connections (including other server processes) before failing.
    pub fn with_busy_timeout<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(busy_timeout)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed-width UTC timestamps, so text comparison in SQL orders chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn row_to_module(row: &Row<'_>) -> rusqlite::Result<Module> {
    Ok(Module {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn row_to_branch(row: &Row<'_>) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        module_id: row.get(1)?,
        module_name: row.get(2)?,
        name: row.get(3)?,
        latest_index_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn row_to_index(row: &Row<'_>) -> rusqlite::Result<Index> {
    Ok(Index {
        id: row.get(0)?,
        branch_id: row.get(1)?,
        commit_ref: row.get(2)?,
        value: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn row_to_access_key(row: &Row<'_>) -> rusqlite::Result<AccessKey> {
    let optional_time = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
        Ok(row.get::<_, Option<String>>(idx)?.as_deref().map(parse_datetime))
    };

    Ok(AccessKey {
        id: row.get(0)?,
        user_id: row.get(1)?,
        label: row.get(2)?,
        lookup: row.get(3)?,
        secret_hash: row.get(4)?,
        scope: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        expires_at: optional_time(7)?,
        last_used_at: optional_time(8)?,
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<PermissionGrant> {
    Ok(PermissionGrant {
        user_id: row.get(0)?,
        scope: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn query_branch(conn: &Connection, module_name: &str, branch_name: &str) -> Result<Option<Branch>> {
    conn.query_row(
        &format!(
            "SELECT {BRANCH_COLUMNS} FROM branches b JOIN modules m ON m.id = b.module_id
             WHERE m.name = ?1 AND b.name = ?2"
        ),
        params![module_name, branch_name],
        row_to_branch,
    )
    .optional()
    .map_err(Error::from)
}

/// Allocation handle over an open `BEGIN IMMEDIATE` transaction.
struct SqliteIndexTransaction<'a> {
    tx: &'a Transaction<'a>,
}

impl IndexTransaction for SqliteIndexTransaction<'_> {
    fn find_branch(&self, module_name: &str, branch_name: &str) -> Result<Option<Branch>> {
        query_branch(self.tx, module_name, branch_name)
    }

    fn index_value(&self, branch_id: &str, index_id: &str) -> Result<Option<u32>> {
        self.tx
            .query_row(
                "SELECT value FROM build_indexes WHERE id = ?1 AND branch_id = ?2",
                params![index_id, branch_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Error::from)
    }

    fn insert_index(&self, index: &Index) -> Result<()> {
        let result = self.tx.execute(
            "INSERT INTO build_indexes (id, branch_id, commit_ref, value, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                index.id,
                index.branch_id,
                index.commit_ref,
                index.value,
                format_datetime(&index.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::AllocationConflict),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn set_latest_index(&self, module_id: &str, branch_id: &str, index_id: &str) -> Result<bool> {
        let rows = self.tx.execute(
            "UPDATE branches SET latest_index_id = ?1 WHERE id = ?2 AND module_id = ?3",
            params![index_id, branch_id, module_id],
        )?;
        Ok(rows == 1)
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Module operations

    fn create_module(&self, module: &Module) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO modules (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![module.id, module.name, format_datetime(&module.created_at)],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_module_by_name(&self, name: &str) -> Result<Option<Module>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MODULE_COLUMNS} FROM modules WHERE name = ?1"),
            params![name],
            row_to_module,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_modules(&self) -> Result<Vec<Module>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {MODULE_COLUMNS} FROM modules ORDER BY name"))?;
        let rows = stmt.query_map([], row_to_module)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Branch operations

    fn create_branch(&self, branch: &Branch) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO branches (id, module_id, name, latest_index_id, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                branch.id,
                branch.module_id,
                branch.name,
                format_datetime(&branch.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_branch(&self, module_name: &str, branch_name: &str) -> Result<Option<Branch>> {
        query_branch(&self.conn(), module_name, branch_name)
    }

    fn list_branches(&self, module_name: &str) -> Result<Vec<Branch>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches b JOIN modules m ON m.id = b.module_id
             WHERE m.name = ?1 ORDER BY b.name"
        ))?;
        let rows = stmt.query_map(params![module_name], row_to_branch)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // Index operations

    fn with_index_transaction(
        &self,
        f: &mut dyn FnMut(&dyn IndexTransaction) -> Result<Allocation>,
    ) -> Result<Allocation> {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front, so the read of the latest
        // value and the insert of its successor cannot interleave with another
        // writer, in this process or any other sharing the database file.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let allocation = f(&SqliteIndexTransaction { tx: &tx })?;

        tx.commit()?;
        Ok(allocation)
    }

    fn get_latest_index(&self, module_name: &str, branch_name: &str) -> Result<Option<Index>> {
        let conn = self.conn();
        let branch = query_branch(&conn, module_name, branch_name)?.ok_or(Error::NoMatchingBranch)?;

        let Some(latest_id) = branch.latest_index_id else {
            return Ok(None);
        };

        conn.query_row(
            &format!(
                "SELECT {INDEX_COLUMNS} FROM build_indexes i WHERE i.id = ?1 AND i.branch_id = ?2"
            ),
            params![latest_id, branch.id],
            row_to_index,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_index(&self, module_name: &str, branch_name: &str, value: u32) -> Result<Option<Index>> {
        let conn = self.conn();
        let branch = query_branch(&conn, module_name, branch_name)?.ok_or(Error::NoMatchingBranch)?;

        conn.query_row(
            &format!(
                "SELECT {INDEX_COLUMNS} FROM build_indexes i
                 WHERE i.branch_id = ?1 AND i.value = ?2"
            ),
            params![branch.id, value],
            row_to_index,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_indexes(
        &self,
        module_name: &str,
        branch_name: &str,
        filter: &IndexFilter,
    ) -> Result<Vec<Index>> {
        let conn = self.conn();
        let branch = query_branch(&conn, module_name, branch_name)?.ok_or(Error::NoMatchingBranch)?;

        let mut sql = format!("SELECT {INDEX_COLUMNS} FROM build_indexes i WHERE i.branch_id = ?");
        let mut args: Vec<Box<dyn ToSql>> = vec![Box::new(branch.id)];

        if let Some(id) = &filter.id {
            sql.push_str(" AND i.id = ?");
            args.push(Box::new(id.clone()));
        }
        if let Some(commit_ref) = &filter.commit_ref {
            sql.push_str(" AND i.commit_ref = ?");
            args.push(Box::new(commit_ref.clone()));
        }
        if let Some(value) = filter.value {
            sql.push_str(" AND i.value = ?");
            args.push(Box::new(value));
        }
        if let Some(date) = filter.date {
            let start = start_of_day(date);
            sql.push_str(" AND i.created_at >= ? AND i.created_at < ?");
            args.push(Box::new(format_datetime(&start)));
            args.push(Box::new(format_datetime(&(start + chrono::Duration::days(1)))));
        }
        if let Some(before) = &filter.before {
            sql.push_str(" AND i.created_at < ?");
            args.push(Box::new(format_datetime(before)));
        }
        if let Some(after) = &filter.after {
            sql.push_str(" AND i.created_at > ?");
            args.push(Box::new(format_datetime(after)));
        }
        sql.push_str(" ORDER BY i.value");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), row_to_index)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (id, username, password_hash, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                user.username,
                user.password_hash,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            row_to_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY username"))?;
        let rows = stmt.query_map([], row_to_user)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn set_user_password(&self, id: &str, password_hash: Option<&str>) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET password_hash = ?1, updated_at = ?2 WHERE id = ?3",
            params![password_hash, format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Access key operations

    fn create_access_key(&self, key: &AccessKey) -> Result<()> {
        let result = self.conn().execute(
            &format!(
                "INSERT INTO access_keys ({ACCESS_KEY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                key.id,
                key.user_id,
                key.label,
                key.lookup,
                key.secret_hash,
                key.scope,
                format_datetime(&key.created_at),
                key.expires_at.as_ref().map(format_datetime),
                key.last_used_at.as_ref().map(format_datetime),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::KeyLookupCollision),
            Err(e) => Err(e.into()),
        }
    }

    fn get_access_key(&self, id: &str) -> Result<Option<AccessKey>> {
        self.conn()
            .query_row(
                &format!("SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE id = ?1"),
                params![id],
                row_to_access_key,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_access_key_by_lookup(&self, lookup: &str) -> Result<Option<AccessKey>> {
        self.conn()
            .query_row(
                &format!("SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE key_lookup = ?1"),
                params![lookup],
                row_to_access_key,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_access_keys(&self, user_id: Option<&str>) -> Result<Vec<AccessKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCESS_KEY_COLUMNS} FROM access_keys
             WHERE ?1 IS NULL OR user_id = ?1
             ORDER BY created_at DESC, id"
        ))?;
        let rows = stmt.query_map(params![user_id], row_to_access_key)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_access_key(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM access_keys WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn record_access_key_use(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE access_keys SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Permission grant operations

    fn grant_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let now = format_datetime(&Utc::now());
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO permission_grants (user_id, scope, created_at)
                 VALUES (?1, ?2, ?3)",
            )?;
            for scope in scopes {
                inserted += stmt.execute(params![user_id, scope, now])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn revoke_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM permission_grants WHERE user_id = ?1 AND scope = ?2")?;
            for scope in scopes {
                removed += stmt.execute(params![user_id, scope])?;
            }
        }

        tx.commit()?;
        Ok(removed)
    }

    fn has_any_scope(&self, user_id: &str, scopes: &[String]) -> Result<bool> {
        if scopes.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; scopes.len()].join(", ");
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM permission_grants WHERE user_id = ? AND scope IN ({placeholders}))"
        );

        let mut args: Vec<&dyn ToSql> = Vec::with_capacity(scopes.len() + 1);
        args.push(&user_id);
        args.extend(scopes.iter().map(|s| s as &dyn ToSql));

        let conn = self.conn();
        let exists: bool = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
        Ok(exists)
    }

    fn list_user_grants(&self, user_id: &str) -> Result<Vec<PermissionGrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, scope, created_at FROM permission_grants
             WHERE user_id = ?1 ORDER BY scope",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_grant)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_grants(&self) -> Result<Vec<PermissionGrant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, scope, created_at FROM permission_grants ORDER BY user_id, scope",
        )?;
        let rows = stmt.query_map([], row_to_grant)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
                .map_err(Error::from)
        };

        Ok(StoreStats {
            users: count("users")?,
            access_keys: count("access_keys")?,
            modules: count("modules")?,
            branches: count("branches")?,
            indexes: count("build_indexes")?,
            grants: count("permission_grants")?,
        })
    }
}
