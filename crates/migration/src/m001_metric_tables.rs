use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_metric_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Postgres rejects multi-statement strings on the extended protocol.
        let conn = manager.get_connection();
        conn.execute_unprepared(CREATE_GAUGE).await?;
        conn.execute_unprepared(CREATE_COUNTER).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();
        conn.execute_unprepared("DROP TABLE IF EXISTS counter").await?;
        conn.execute_unprepared("DROP TABLE IF EXISTS gauge").await?;
        Ok(())
    }
}

const CREATE_GAUGE: &str = "
CREATE TABLE IF NOT EXISTS gauge (
    name VARCHAR(255) PRIMARY KEY NOT NULL,
    value DOUBLE PRECISION NOT NULL
)";

const CREATE_COUNTER: &str = "
CREATE TABLE IF NOT EXISTS counter (
    name VARCHAR(255) PRIMARY KEY NOT NULL,
    value BIGINT NOT NULL
)";
