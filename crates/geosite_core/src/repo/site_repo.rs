//! Site repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist sites with their GeoJSON geometry and snapshot metrics.
//! - Remove one site together with its analytics in a single transaction.
//!
//! # Invariants
//! - Stored geometry is re-validated on read. `get_site` surfaces invalid
//!   rows as `CorruptGeometry`; `list_sites` skips them with a warning.
//! - Site listing is deterministic: `created_at ASC, rowid ASC`.
//! - Every update is a single statement, so no update partially applies.

use crate::geometry::polygon::SitePolygon;
use crate::model::analytics::AnalyticsRecord;
use crate::model::project::ProjectId;
use crate::model::site::{NewSite, Site, SiteId, SiteMetadata, SiteUpdate};
use crate::repo::analytics_repo::list_records;
use crate::repo::{ensure_connection_ready, parse_uuid, EntityRef, RepoError, RepoResult};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

const SITE_SELECT_SQL: &str = "SELECT
    uuid,
    project_uuid,
    name,
    geometry,
    area_hectares,
    carbon_sequestration_tonnes,
    biodiversity_score,
    metadata,
    created_at,
    updated_at
FROM sites";

/// Repository interface for sites and their owned analytics.
pub trait SiteRepository {
    /// Lists sites of one project.
    fn list_sites(&self, project_id: ProjectId) -> RepoResult<Vec<Site>>;
    /// Lists ids of every site of one project, including ones whose stored
    /// geometry no longer validates.
    fn list_site_ids(&self, project_id: ProjectId) -> RepoResult<Vec<SiteId>>;
    /// Counts sites of one project.
    fn count_sites(&self, project_id: ProjectId) -> RepoResult<u32>;
    /// Inserts one site.
    fn create_site(&self, site: &NewSite) -> RepoResult<Site>;
    /// Loads one site by id.
    fn get_site(&self, id: SiteId) -> RepoResult<Option<Site>>;
    /// Applies a partial descriptive update.
    fn update_site(&self, id: SiteId, update: &SiteUpdate) -> RepoResult<Site>;
    /// Applies a partial update of the two snapshot metrics.
    fn update_site_metrics(
        &self,
        id: SiteId,
        carbon_sequestration_tonnes: Option<f64>,
        biodiversity_score: Option<f64>,
    ) -> RepoResult<Site>;
    /// Lists analytics of one site in insertion order.
    fn list_analytics(&self, id: SiteId) -> RepoResult<Vec<AnalyticsRecord>>;
    /// Deletes analytics then the site, atomically. Returns removed record count.
    fn delete_site_cascade(&self, id: SiteId) -> RepoResult<usize>;
}

/// SQLite-backed site repository.
pub struct SqliteSiteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSiteRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["sites", "site_analytics"])?;
        Ok(Self { conn })
    }

    fn load_required(&self, id: SiteId) -> RepoResult<Site> {
        self.get_site(id)?
            .ok_or(RepoError::NotFound(EntityRef::Site(id)))
    }
}

impl SiteRepository for SqliteSiteRepository<'_> {
    fn list_sites(&self, project_id: ProjectId) -> RepoResult<Vec<Site>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SITE_SELECT_SQL}
             WHERE project_uuid = ?1
             ORDER BY created_at ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut sites = Vec::new();
        while let Some(row) = rows.next()? {
            match parse_site_row(row) {
                Ok(site) => sites.push(site),
                Err(RepoError::CorruptGeometry(site_id, err)) => {
                    warn!(
                        "event=site_list module=repo status=skip site_id={site_id} reason=corrupt_geometry error={err}"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Ok(sites)
    }

    fn list_site_ids(&self, project_id: ProjectId) -> RepoResult<Vec<SiteId>> {
        let mut stmt = self.conn.prepare(
            "SELECT uuid
             FROM sites
             WHERE project_uuid = ?1
             ORDER BY created_at ASC, rowid ASC;",
        )?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            ids.push(parse_uuid(&text, "sites.uuid")?);
        }
        Ok(ids)
    }

    fn count_sites(&self, project_id: ProjectId) -> RepoResult<u32> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sites WHERE project_uuid = ?1;",
            [project_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn create_site(&self, site: &NewSite) -> RepoResult<Site> {
        let metadata = site.metadata.as_ref().map(encode_metadata).transpose()?;
        self.conn.execute(
            "INSERT INTO sites (
                uuid,
                project_uuid,
                name,
                geometry,
                area_hectares,
                carbon_sequestration_tonnes,
                biodiversity_score,
                metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                site.id.to_string(),
                site.project_id.to_string(),
                site.name.as_str(),
                site.polygon.to_geojson_string(),
                site.area_hectares,
                site.carbon_sequestration_tonnes,
                site.biodiversity_score,
                metadata,
            ],
        )?;
        self.load_required(site.id)
    }

    fn get_site(&self, id: SiteId) -> RepoResult<Option<Site>> {
        self.conn
            .query_row(
                &format!("{SITE_SELECT_SQL} WHERE uuid = ?1;"),
                [id.to_string()],
                |row| Ok(parse_site_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn update_site(&self, id: SiteId, update: &SiteUpdate) -> RepoResult<Site> {
        let metadata = update.metadata.as_ref().map(encode_metadata).transpose()?;
        let changed = self.conn.execute(
            "UPDATE sites
             SET name = COALESCE(?2, name),
                 area_hectares = COALESCE(?3, area_hectares),
                 metadata = COALESCE(?4, metadata),
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![
                id.to_string(),
                update.name.as_deref(),
                update.area_hectares,
                metadata,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Site(id)));
        }
        self.load_required(id)
    }

    fn update_site_metrics(
        &self,
        id: SiteId,
        carbon_sequestration_tonnes: Option<f64>,
        biodiversity_score: Option<f64>,
    ) -> RepoResult<Site> {
        let changed = self.conn.execute(
            "UPDATE sites
             SET carbon_sequestration_tonnes = COALESCE(?2, carbon_sequestration_tonnes),
                 biodiversity_score = COALESCE(?3, biodiversity_score),
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![id.to_string(), carbon_sequestration_tonnes, biodiversity_score],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Site(id)));
        }
        self.load_required(id)
    }

    fn list_analytics(&self, id: SiteId) -> RepoResult<Vec<AnalyticsRecord>> {
        list_records(self.conn, id)
    }

    fn delete_site_cascade(&self, id: SiteId) -> RepoResult<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let removed_records = tx.execute(
            "DELETE FROM site_analytics WHERE site_uuid = ?1;",
            [id.to_string()],
        )?;
        let removed_sites = tx.execute("DELETE FROM sites WHERE uuid = ?1;", [id.to_string()])?;
        if removed_sites == 0 {
            // Dropping the transaction rolls back the analytics delete.
            return Err(RepoError::NotFound(EntityRef::Site(id)));
        }
        tx.commit()?;
        Ok(removed_records)
    }
}

fn encode_metadata(metadata: &SiteMetadata) -> RepoResult<String> {
    serde_json::to_string(metadata)
        .map_err(|err| RepoError::InvalidData(format!("unencodable site metadata: {err}")))
}

fn parse_site_row(row: &Row<'_>) -> RepoResult<Site> {
    let id_text: String = row.get("uuid")?;
    let id = parse_uuid(&id_text, "sites.uuid")?;
    let project_text: String = row.get("project_uuid")?;

    let geometry_text: String = row.get("geometry")?;
    let polygon = SitePolygon::from_geojson_str(&geometry_text)
        .map_err(|err| RepoError::CorruptGeometry(id, err))?;

    let metadata = match row.get::<_, Option<String>>("metadata")? {
        Some(text) => Some(serde_json::from_str::<SiteMetadata>(&text).map_err(|err| {
            RepoError::InvalidData(format!("invalid json in sites.metadata: {err}"))
        })?),
        None => None,
    };

    Ok(Site {
        id,
        project_id: parse_uuid(&project_text, "sites.project_uuid")?,
        name: row.get("name")?,
        polygon,
        area_hectares: row.get("area_hectares")?,
        carbon_sequestration_tonnes: row.get("carbon_sequestration_tonnes")?,
        biodiversity_score: row.get("biodiversity_score")?,
        metadata,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
