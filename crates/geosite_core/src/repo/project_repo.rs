//! Project repository contracts and SQLite implementation.
//!
//! # Invariants
//! - Listing is deterministic: `created_at ASC, rowid ASC`.
//! - `delete_project` removes the project row only; the `sites` foreign key
//!   rejects the delete while any site still references the project.

use crate::model::project::{OwnerId, Project, ProjectId, ProjectList, ProjectUpdate};
use crate::repo::{ensure_connection_ready, parse_uuid, EntityRef, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const PROJECT_SELECT_SQL: &str = "SELECT
    p.uuid AS uuid,
    p.owner_uuid AS owner_uuid,
    p.name AS name,
    p.description AS description,
    p.created_at AS created_at,
    p.updated_at AS updated_at,
    (SELECT COUNT(*) FROM sites s WHERE s.project_uuid = p.uuid) AS site_count
FROM projects p";

/// Repository interface for project rows.
pub trait ProjectRepository {
    /// Inserts one project owned by `owner_id`.
    fn create_project(
        &self,
        owner_id: OwnerId,
        name: &str,
        description: Option<&str>,
    ) -> RepoResult<Project>;
    /// Loads one project regardless of owner.
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    /// Lists one page of the owner's projects with the owner's total count.
    fn list_projects(&self, owner_id: OwnerId, offset: u32, limit: u32)
        -> RepoResult<ProjectList>;
    /// Applies a partial update in one statement and returns the new row.
    fn update_project(&self, id: ProjectId, update: &ProjectUpdate) -> RepoResult<Project>;
    /// Deletes the project row.
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
}

/// SQLite-backed project repository.
pub struct SqliteProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProjectRepository<'conn> {
    /// Creates repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["projects", "sites"])?;
        Ok(Self { conn })
    }
}

impl ProjectRepository for SqliteProjectRepository<'_> {
    fn create_project(
        &self,
        owner_id: OwnerId,
        name: &str,
        description: Option<&str>,
    ) -> RepoResult<Project> {
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO projects (uuid, owner_uuid, name, description)
             VALUES (?1, ?2, ?3, ?4);",
            params![id.to_string(), owner_id.to_string(), name, description],
        )?;
        self.get_project(id)?
            .ok_or(RepoError::NotFound(EntityRef::Project(id)))
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        self.conn
            .query_row(
                &format!("{PROJECT_SELECT_SQL} WHERE p.uuid = ?1;"),
                [id.to_string()],
                |row| Ok(parse_project_row(row)),
            )
            .optional()?
            .transpose()
    }

    fn list_projects(
        &self,
        owner_id: OwnerId,
        offset: u32,
        limit: u32,
    ) -> RepoResult<ProjectList> {
        let owner = owner_id.to_string();
        let total: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE owner_uuid = ?1;",
            [owner.as_str()],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&format!(
            "{PROJECT_SELECT_SQL}
             WHERE p.owner_uuid = ?1
             ORDER BY p.created_at ASC, p.rowid ASC
             LIMIT ?2 OFFSET ?3;"
        ))?;
        let mut rows = stmt.query(params![owner, i64::from(limit), i64::from(offset)])?;
        let mut projects = Vec::new();
        while let Some(row) = rows.next()? {
            projects.push(parse_project_row(row)?);
        }

        Ok(ProjectList { projects, total })
    }

    fn update_project(&self, id: ProjectId, update: &ProjectUpdate) -> RepoResult<Project> {
        let changed = self.conn.execute(
            "UPDATE projects
             SET name = COALESCE(?2, name),
                 description = COALESCE(?3, description),
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1;",
            params![
                id.to_string(),
                update.name.as_deref(),
                update.description.as_deref(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Project(id)));
        }
        self.get_project(id)?
            .ok_or(RepoError::NotFound(EntityRef::Project(id)))
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE uuid = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(EntityRef::Project(id)));
        }
        Ok(())
    }
}

fn parse_project_row(row: &Row<'_>) -> RepoResult<Project> {
    let id_text: String = row.get("uuid")?;
    let owner_text: String = row.get("owner_uuid")?;
    let site_count: i64 = row.get("site_count")?;

    Ok(Project {
        id: parse_uuid(&id_text, "projects.uuid")?,
        owner_id: parse_uuid(&owner_text, "projects.owner_uuid")?,
        name: row.get("name")?,
        description: row.get("description")?,
        site_count: u32::try_from(site_count).map_err(|_| {
            RepoError::InvalidData(format!("invalid site count `{site_count}`"))
        })?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
