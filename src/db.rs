use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::insights::AiSummary;
use crate::models::ClientRecord;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn import_clients(pool: &PgPool, records: &[ClientRecord]) -> anyhow::Result<usize> {
    let mut inserted = 0usize;

    for record in records {
        let visits = record
            .visits_post_trial
            .and_then(|visits| i32::try_from(visits).ok());

        let result = sqlx::query(
            r#"
            INSERT INTO studio_analytics.clients
            (id, source_key, first_name, last_name, email, first_visit_date,
             first_visit_location, is_new, conversion_status, retention_status,
             ltv, conversion_span, visits_post_trial, membership_used, trainer_name)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.source_key())
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(&record.email)
        .bind(&record.first_visit_date)
        .bind(&record.first_visit_location)
        .bind(&record.is_new)
        .bind(&record.conversion_status)
        .bind(&record.retention_status)
        .bind(record.ltv)
        .bind(record.conversion_span)
        .bind(visits)
        .bind(&record.membership_used)
        .bind(&record.trainer_name)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_clients(
    pool: &PgPool,
    location: Option<&str>,
) -> anyhow::Result<Vec<ClientRecord>> {
    let mut query = String::from(
        "SELECT first_name, last_name, email, first_visit_date, first_visit_location, \
         is_new, conversion_status, retention_status, ltv, conversion_span, \
         visits_post_trial, membership_used, trainer_name \
         FROM studio_analytics.clients",
    );

    if location.is_some() {
        query.push_str(" WHERE lower(trim(first_visit_location)) = lower(trim($1))");
    }
    query.push_str(" ORDER BY imported_at, id");

    let mut rows = sqlx::query(&query);
    if let Some(value) = location {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut clients = Vec::with_capacity(records.len());

    for row in records {
        let visits: Option<i32> = row.get("visits_post_trial");
        clients.push(ClientRecord {
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            email: row.get("email"),
            first_visit_date: row.get("first_visit_date"),
            first_visit_location: row.get("first_visit_location"),
            is_new: row.get("is_new"),
            conversion_status: row.get("conversion_status"),
            retention_status: row.get("retention_status"),
            ltv: row.get("ltv"),
            conversion_span: row.get("conversion_span"),
            visits_post_trial: visits.and_then(|visits| u32::try_from(visits).ok()),
            membership_used: row.get("membership_used"),
            trainer_name: row.get("trainer_name"),
        });
    }

    Ok(clients)
}

pub async fn find_summary(
    pool: &PgPool,
    context: &str,
    location_id: &str,
    data_hash: &str,
) -> anyhow::Result<Option<AiSummary>> {
    let row = sqlx::query(
        "SELECT summary FROM studio_analytics.ai_summaries \
         WHERE context = $1 AND location_id = $2 AND data_hash = $3",
    )
    .bind(context)
    .bind(location_id)
    .bind(data_hash)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| row.get::<Json<AiSummary>, _>("summary").0))
}

pub async fn save_summary(
    pool: &PgPool,
    context: &str,
    location_id: &str,
    data_hash: &str,
    summary: &AiSummary,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO studio_analytics.ai_summaries
        (id, context, location_id, data_hash, summary)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (context, location_id, data_hash) DO UPDATE
        SET summary = EXCLUDED.summary, created_at = now()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(context)
    .bind(location_id)
    .bind(data_hash)
    .bind(Json(summary))
    .execute(pool)
    .await?;

    Ok(())
}
