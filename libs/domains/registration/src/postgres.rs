use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, FromQueryResult, Statement};
use uuid::Uuid;

use crate::error::RegistrationResult;
use crate::repository::RegistrationRepository;

/// PostgreSQL implementation of RegistrationRepository using SeaORM
#[derive(Clone)]
pub struct PostgresRegistrationRepository {
    db: DatabaseConnection,
}

impl PostgresRegistrationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct PendingCodeRow {
    confirmation_code: Uuid,
}

#[derive(Debug, FromQueryResult)]
struct ExistsRow {
    registered: bool,
}

#[async_trait]
impl RegistrationRepository for PostgresRegistrationRepository {
    async fn save_pending_request(&self, email: &str, code: Uuid) -> RegistrationResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
                INSERT INTO registration_requests (email, confirmation_code)
                VALUES ($1, $2)
                ON CONFLICT (email) DO UPDATE
                SET confirmation_code = EXCLUDED.confirmation_code,
                    updated_at = now()
            "#,
            [email.into(), code.into()],
        );
        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn find_pending_code(&self, email: &str) -> RegistrationResult<Option<Uuid>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT confirmation_code FROM registration_requests WHERE email = $1",
            [email.into()],
        );
        let row = PendingCodeRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.map(|r| r.confirmation_code))
    }

    async fn save_registration(&self, email: &str) -> RegistrationResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO registrations (email) VALUES ($1) ON CONFLICT (email) DO NOTHING",
            [email.into()],
        );
        self.db.execute_raw(stmt).await?;
        Ok(())
    }

    async fn registration_exists(&self, email: &str) -> RegistrationResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT EXISTS (SELECT 1 FROM registrations WHERE email = $1) AS registered",
            [email.into()],
        );
        let row = ExistsRow::find_by_statement(stmt).one(&self.db).await?;
        Ok(row.is_some_and(|r| r.registered))
    }
}
