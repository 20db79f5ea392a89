//! Analytics record persistence.
//!
//! The lifecycle core only reads analytics; inserts exist for importers and
//! seeding, which are external collaborators.
//!
//! # Invariants
//! - Records are returned in insertion order; callers sort by date.
//! - Dates are stored as ISO `YYYY-MM-DD` text.

use crate::model::analytics::{AnalyticsRecord, NewAnalyticsRecord};
use crate::model::site::SiteId;
use crate::repo::{ensure_connection_ready, parse_uuid, EntityRef, RepoError, RepoResult};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Repository interface for analytics records.
pub trait AnalyticsRepository {
    /// Inserts one record under an existing site.
    fn insert_record(
        &self,
        site_id: SiteId,
        record: &NewAnalyticsRecord,
    ) -> RepoResult<AnalyticsRecord>;
    /// Lists all records of one site in insertion order.
    fn list_for_site(&self, site_id: SiteId) -> RepoResult<Vec<AnalyticsRecord>>;
}

/// SQLite-backed analytics repository.
pub struct SqliteAnalyticsRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAnalyticsRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["sites", "site_analytics"])?;
        Ok(Self { conn })
    }
}

impl AnalyticsRepository for SqliteAnalyticsRepository<'_> {
    fn insert_record(
        &self,
        site_id: SiteId,
        record: &NewAnalyticsRecord,
    ) -> RepoResult<AnalyticsRecord> {
        let site_exists = self
            .conn
            .query_row(
                "SELECT 1 FROM sites WHERE uuid = ?1;",
                [site_id.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !site_exists {
            return Err(RepoError::NotFound(EntityRef::Site(site_id)));
        }

        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO site_analytics (
                uuid,
                site_uuid,
                date,
                carbon_sequestration_tonnes,
                biodiversity_score,
                tree_count,
                vegetation_cover_percentage,
                soil_carbon_percentage
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                id.to_string(),
                site_id.to_string(),
                record.date.format(DATE_FORMAT).to_string(),
                record.carbon_sequestration_tonnes,
                record.biodiversity_score,
                record.tree_count,
                record.vegetation_cover_percentage,
                record.soil_carbon_percentage,
            ],
        )?;

        let created_at: i64 = self.conn.query_row(
            "SELECT created_at FROM site_analytics WHERE uuid = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )?;

        Ok(AnalyticsRecord {
            id,
            site_id,
            date: record.date,
            carbon_sequestration_tonnes: record.carbon_sequestration_tonnes,
            biodiversity_score: record.biodiversity_score,
            tree_count: record.tree_count,
            vegetation_cover_percentage: record.vegetation_cover_percentage,
            soil_carbon_percentage: record.soil_carbon_percentage,
            created_at,
        })
    }

    fn list_for_site(&self, site_id: SiteId) -> RepoResult<Vec<AnalyticsRecord>> {
        list_records(self.conn, site_id)
    }
}

/// Shared read path, also used by the site repository for detail views.
pub(crate) fn list_records(conn: &Connection, site_id: SiteId) -> RepoResult<Vec<AnalyticsRecord>> {
    let mut stmt = conn.prepare(
        "SELECT
            uuid,
            site_uuid,
            date,
            carbon_sequestration_tonnes,
            biodiversity_score,
            tree_count,
            vegetation_cover_percentage,
            soil_carbon_percentage,
            created_at
         FROM site_analytics
         WHERE site_uuid = ?1
         ORDER BY rowid ASC;",
    )?;
    let mut rows = stmt.query([site_id.to_string()])?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_record_row(row)?);
    }
    Ok(records)
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<AnalyticsRecord> {
    let id_text: String = row.get("uuid")?;
    let site_text: String = row.get("site_uuid")?;
    let date_text: String = row.get("date")?;
    let date = NaiveDate::parse_from_str(&date_text, DATE_FORMAT).map_err(|_| {
        RepoError::InvalidData(format!("invalid date `{date_text}` in site_analytics.date"))
    })?;

    Ok(AnalyticsRecord {
        id: parse_uuid(&id_text, "site_analytics.uuid")?,
        site_id: parse_uuid(&site_text, "site_analytics.site_uuid")?,
        date,
        carbon_sequestration_tonnes: row.get("carbon_sequestration_tonnes")?,
        biodiversity_score: row.get("biodiversity_score")?,
        tree_count: row.get("tree_count")?,
        vegetation_cover_percentage: row.get("vegetation_cover_percentage")?,
        soil_carbon_percentage: row.get("soil_carbon_percentage")?,
        created_at: row.get("created_at")?,
    })
}
