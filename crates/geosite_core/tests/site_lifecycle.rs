use chrono::NaiveDate;
use geosite_core::db::open_db_in_memory;
use geosite_core::{
    AnalyticsRepository, Classify, ErrorKind, LonLat, NewAnalyticsRecord, PolygonGeometry,
    SiteDraft, SiteLifecycleService, SiteMetrics, SiteServiceError, SiteUpdate,
    SqliteAnalyticsRepository, SqliteProjectRepository, SqliteSiteRepository,
};
use rusqlite::Connection;
use uuid::Uuid;

type Service<'conn> =
    SiteLifecycleService<SqliteProjectRepository<'conn>, SqliteSiteRepository<'conn>>;

fn service_for(conn: &Connection, owner: Uuid) -> Service<'_> {
    SiteLifecycleService::new(
        owner,
        SqliteProjectRepository::try_new(conn).unwrap(),
        SqliteSiteRepository::try_new(conn).unwrap(),
    )
}

fn square(lon: f64, lat: f64, side: f64) -> PolygonGeometry {
    PolygonGeometry {
        kind: "Polygon".to_string(),
        coordinates: vec![vec![
            LonLat::new(lon, lat),
            LonLat::new(lon + side, lat),
            LonLat::new(lon + side, lat + side),
            LonLat::new(lon, lat + side),
            LonLat::new(lon, lat),
        ]],
    }
}

fn record(date: &str, carbon: f64) -> NewAnalyticsRecord {
    NewAnalyticsRecord {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        carbon_sequestration_tonnes: carbon,
        biodiversity_score: 50.0,
        tree_count: 10,
        vegetation_cover_percentage: 30.0,
        soil_carbon_percentage: 1.2,
    }
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn create_site_derives_area_and_default_metrics() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("  Highlands  ", None).unwrap();
    assert_eq!(project.name, "Highlands");

    let site = service
        .create_site(project.id, "Terrace", square(30.0, -1.0, 0.01), SiteMetrics::default())
        .unwrap();
    assert_eq!(site.carbon_sequestration_tonnes, 0.0);
    assert_eq!(site.biodiversity_score, 0.0);
    let area = site.area_hectares.unwrap();
    assert!((100.0..150.0).contains(&area), "area {area}");
    assert_eq!(site.polygon.vertex_count(), 4);

    let listed = service.get_project(project.id).unwrap();
    assert_eq!(listed.site_count, 1);
}

#[test]
fn tiny_polygon_gets_minimum_area() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("Garden", None).unwrap();

    let site = service
        .create_site(project.id, "Bed", square(10.0, 10.0, 0.000_01), SiteMetrics::default())
        .unwrap();
    assert_eq!(site.area_hectares, Some(0.1));
}

#[test]
fn explicit_area_wins_over_geometry() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("Survey", None).unwrap();

    let mut draft = SiteDraft::new("Plot", square(0.0, 0.0, 0.01));
    draft.area_hectares = Some(42.0);
    let site = service.create_site_from_draft(project.id, draft).unwrap();
    assert_eq!(site.area_hectares, Some(42.0));
}

#[test]
fn invalid_geometry_is_rejected_before_any_write() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("Coast", None).unwrap();

    let mut open_ring = square(0.0, 0.0, 1.0);
    open_ring.coordinates[0].pop();
    let err = service
        .create_site(project.id, "Open", open_ring, SiteMetrics::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidGeometry);

    let multi = PolygonGeometry {
        kind: "MultiPolygon".to_string(),
        coordinates: Vec::new(),
    };
    let err = service
        .create_site(project.id, "Multi", multi, SiteMetrics::default())
        .unwrap_err();
    assert!(matches!(err, SiteServiceError::InvalidGeometry(_)));
    assert_eq!(count(&conn, "sites"), 0);
}

#[test]
fn foreign_owner_cannot_see_or_touch_sites() {
    let conn = open_db_in_memory().unwrap();
    let owner = service_for(&conn, Uuid::new_v4());
    let stranger = service_for(&conn, Uuid::new_v4());
    let project = owner.create_project("Private", None).unwrap();
    let site = owner
        .create_site(project.id, "Hidden", square(5.0, 5.0, 0.01), SiteMetrics::default())
        .unwrap();

    assert_eq!(stranger.list_sites(project.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(stranger.get_site(site.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(stranger.delete_site(site.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        stranger
            .create_site(project.id, "Intruder", square(1.0, 1.0, 0.01), SiteMetrics::default())
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(stranger.list_projects(0, 0).unwrap().total, 0);
    assert_eq!(owner.list_sites(project.id).unwrap().len(), 1);
}

#[test]
fn update_site_applies_only_given_fields() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("Delta", None).unwrap();
    let site = service
        .create_site(project.id, "Before", square(2.0, 2.0, 0.01), SiteMetrics::default())
        .unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("soil".to_string(), serde_json::json!("loam"));
    let updated = service
        .update_site(
            site.id,
            SiteUpdate {
                name: Some("After".to_string()),
                area_hectares: None,
                metadata: Some(metadata.clone()),
            },
        )
        .unwrap();
    assert_eq!(updated.name, "After");
    assert_eq!(updated.area_hectares, site.area_hectares);
    assert_eq!(updated.metadata, Some(metadata));

    let updated = service.update_site_metrics(site.id, Some(7.5), None).unwrap();
    assert_eq!(updated.carbon_sequestration_tonnes, 7.5);
    assert_eq!(updated.biodiversity_score, 0.0);

    let err = service.update_site_metrics(site.id, None, Some(-1.0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[test]
fn delete_project_cascades_sites_and_analytics() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let analytics = SqliteAnalyticsRepository::try_new(&conn).unwrap();
    let project = service.create_project("Basin", Some("wetland")).unwrap();
    let keep = service.create_project("Keep", None).unwrap();

    for index in 0..3 {
        let site = service
            .create_site(
                project.id,
                &format!("Site {index}"),
                square(index as f64, 0.0, 0.01),
                SiteMetrics::default(),
            )
            .unwrap();
        analytics.insert_record(site.id, &record("2024-01-01", 1.0)).unwrap();
        analytics.insert_record(site.id, &record("2024-02-01", 2.0)).unwrap();
    }
    let survivor = service
        .create_site(keep.id, "Survivor", square(9.0, 9.0, 0.01), SiteMetrics::default())
        .unwrap();

    let deletion = service.delete_project(project.id).unwrap();
    assert_eq!(deletion.sites_removed, 3);
    assert_eq!(deletion.records_removed, 6);
    assert_eq!(service.get_project(project.id).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(count(&conn, "site_analytics"), 0);
    assert_eq!(service.list_sites(keep.id).unwrap()[0].id, survivor.id);
}

#[test]
fn corrupt_geometry_is_skipped_in_listing_but_still_cascaded() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    let project = service.create_project("Legacy", None).unwrap();
    let good = service
        .create_site(project.id, "Good", square(3.0, 3.0, 0.01), SiteMetrics::default())
        .unwrap();
    let broken = service
        .create_site(project.id, "Broken", square(4.0, 4.0, 0.01), SiteMetrics::default())
        .unwrap();
    conn.execute(
        "UPDATE sites SET geometry = '{\"type\":\"Point\",\"coordinates\":[0,0]}' WHERE uuid = ?1;",
        [broken.id.to_string()],
    )
    .unwrap();

    let listed = service.list_sites(project.id).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, good.id);

    let deletion = service.delete_project(project.id).unwrap();
    assert_eq!(deletion.sites_removed, 2);
    assert_eq!(count(&conn, "sites"), 0);
}

#[test]
fn project_paging_uses_default_and_cap() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn, Uuid::new_v4());
    for index in 0..5 {
        service.create_project(&format!("Project {index}"), None).unwrap();
    }

    let page = service.list_projects(1, 2).unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.projects.len(), 2);
    assert_eq!(service.list_projects(0, 0).unwrap().projects.len(), 5);
    assert_eq!(service.list_projects(0, u32::MAX).unwrap().projects.len(), 5);

    let err = service.create_project("   ", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
