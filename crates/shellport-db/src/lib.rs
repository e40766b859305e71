use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shellport_core::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                description TEXT,
                host_key_fingerprint TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a host; the id on `host` is ignored and the assigned id returned
    pub async fn create_host(&self, host: &HostRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO hosts (name, address, port, username, password, description,
                               host_key_fingerprint, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&host.name)
        .bind(&host.address)
        .bind(i64::from(host.port))
        .bind(&host.username)
        .bind(&host.password)
        .bind(&host.description)
        .bind(&host.host_key_fingerprint)
        .bind(host.created_at.to_rfc3339())
        .bind(host.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(host_id = id, name = %host.name, "Host created");
        Ok(id)
    }

    pub async fn get_host_by_id(&self, id: i64) -> Result<Option<HostRecord>> {
        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(HostRecord::try_from).transpose().map_err(Into::into)
    }

    pub async fn get_host_by_name(&self, name: &str) -> Result<Option<HostRecord>> {
        let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(HostRecord::try_from).transpose().map_err(Into::into)
    }

    pub async fn list_hosts(&self) -> Result<Vec<HostRecord>> {
        let rows = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().filter_map(|r| r.try_into().ok()).collect())
    }

    /// Pin (or with `None`, unpin) the host key fingerprint of a host
    pub async fn set_host_key_fingerprint(&self, id: i64, fingerprint: Option<&str>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE hosts SET host_key_fingerprint = ?, updated_at = ? WHERE id = ?",
        )
        .bind(fingerprint)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ShellportError::HostNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn delete_host(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM hosts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ShellportError::HostNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HostRegistry for Database {
    async fn get_host(&self, id: i64) -> Result<Option<HostRecord>> {
        self.get_host_by_id(id).await
    }
}

// Row structures for SQLite
#[derive(sqlx::FromRow)]
struct HostRow {
    id: i64,
    name: String,
    address: String,
    port: i64,
    username: String,
    password: String,
    description: Option<String>,
    host_key_fingerprint: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<HostRow> for HostRecord {
    type Error = anyhow::Error;

    fn try_from(row: HostRow) -> std::result::Result<Self, Self::Error> {
        Ok(HostRecord {
            id: row.id,
            name: row.name,
            address: row.address,
            port: u16::try_from(row.port)?,
            username: row.username,
            password: row.password,
            description: row.description,
            host_key_fingerprint: row.host_key_fingerprint,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("state/hosts.db")).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn test_create_and_resolve_host() {
        let (db, _dir) = open().await;
        let mut host = HostRecord::new(0, "web-1", "10.0.0.21", 2222, "deploy", "s3cret");
        host.description = Some("frontend".to_string());

        let id = db.create_host(&host).await.unwrap();
        let stored = db.get_host(id).await.unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.port, 2222);
        assert_eq!(stored.password, "s3cret");
        assert_eq!(stored.description.as_deref(), Some("frontend"));
        assert!(db.get_host(id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (db, _dir) = open().await;
        let host = HostRecord::new(0, "db", "10.0.0.30", 22, "root", "x");
        db.create_host(&host).await.unwrap();
        assert!(matches!(
            db.create_host(&host).await,
            Err(ShellportError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_pin_fingerprint_and_delete() {
        let (db, _dir) = open().await;
        let id = db
            .create_host(&HostRecord::new(0, "bastion", "10.0.0.1", 22, "ops", "pw"))
            .await
            .unwrap();

        db.set_host_key_fingerprint(id, Some("SHA256:abc")).await.unwrap();
        let host = db.get_host_by_name("bastion").await.unwrap().unwrap();
        assert_eq!(host.host_key_fingerprint.as_deref(), Some("SHA256:abc"));

        db.delete_host(id).await.unwrap();
        assert!(db.list_hosts().await.unwrap().is_empty());
        assert!(matches!(
            db.delete_host(id).await,
            Err(ShellportError::HostNotFound(_))
        ));
    }
}
