use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

use crate::error::NotificationResult;
use crate::models::NotificationRecord;
use crate::repository::NotificationRepository;

/// PostgreSQL implementation of NotificationRepository using SeaORM
#[derive(Clone)]
pub struct PostgresNotificationRepository {
    db: sea_orm::DatabaseConnection,
}

impl PostgresNotificationRepository {
    pub fn new(db: sea_orm::DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct NotificationRow {
    id: i64,
    email: String,
    confirmation_code: Uuid,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<NotificationRow> for NotificationRecord {
    fn from(row: NotificationRow) -> Self {
        NotificationRecord {
            id: row.id,
            email: row.email,
            confirmation_code: row.confirmation_code,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl NotificationRepository for PostgresNotificationRepository {
    async fn save(&self, email: &str, code: Uuid) -> NotificationResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO notifications (email, confirmation_code) VALUES ($1, $2)",
            [email.into(), code.into()],
        );
        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn list_for_email(&self, email: &str) -> NotificationResult<Vec<NotificationRecord>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
                SELECT id, email, confirmation_code, created_at
                FROM notifications
                WHERE email = $1
                ORDER BY id
            "#,
            [email.into()],
        );
        let rows = NotificationRow::find_by_statement(stmt).all(&self.db).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
