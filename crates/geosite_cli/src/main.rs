//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `geosite_core` linkage.
//! - Walk one headless map session end to end: project, drawn site,
//!   analytics series.
//! - Keep output line-oriented for quick local sanity checks.

use chrono::NaiveDate;
use geosite_core::{
    build_series, open_db_in_memory, AnalyticsRepository, ContainerId, CoreConfig, DrawEvent,
    DrawEventKind, EventKind, HeadlessMapBackend, LatLng, MapSurfaceManager, NewAnalyticsRecord,
    RenderShape, SiteLifecycleService, SiteMapView, SqliteAnalyticsRepository,
    SqliteProjectRepository, SqliteSiteRepository,
};
use std::process::ExitCode;
use uuid::Uuid;

fn main() -> ExitCode {
    println!("geosite_core ping={}", geosite_core::ping());
    println!("geosite_core version={}", geosite_core::core_version());

    match walkthrough() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("walkthrough status=error message={message}");
            ExitCode::FAILURE
        }
    }
}

fn walkthrough() -> Result<(), String> {
    let config = CoreConfig::default().with_env_overrides();
    config.validate().map_err(|err| err.to_string())?;
    if geosite_core::init_from_config(&config)? {
        println!("logging status=ok");
    }

    let conn = open_db_in_memory().map_err(|err| err.to_string())?;
    let projects = SqliteProjectRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let sites = SqliteSiteRepository::try_new(&conn).map_err(|err| err.to_string())?;
    let service = SiteLifecycleService::new(Uuid::new_v4(), projects, sites);
    let project = service
        .create_project("Smoke project", None)
        .map_err(|err| err.to_string())?;

    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &config.map);
    let mut view = SiteMapView::new(ContainerId::new("smoke-map"), &config.map);
    view.mount(&mut manager).map_err(|err| err.to_string())?;
    let (ticket, _) = view.select_project(&mut manager, project.id);
    view.apply_sites(&mut manager, ticket, service.list_sites(project.id));

    view.toggle_draw(&mut manager);
    let surface = view
        .surface()
        .ok_or_else(|| "map surface did not mount".to_string())?
        .surface_id();
    let listener = manager
        .backend()
        .listeners(surface, EventKind::DrawCreated)
        .first()
        .copied()
        .ok_or_else(|| "draw tool did not subscribe".to_string())?;
    let ring = vec![
        LatLng::new(-1.0, 30.0),
        LatLng::new(-1.0, 30.01),
        LatLng::new(-0.99, 30.01),
        LatLng::new(-0.99, 30.0),
    ];
    view.handle_draw_event(
        &mut manager,
        DrawEvent {
            listener,
            kind: DrawEventKind::Created(RenderShape::Polygon { rings: vec![ring] }),
        },
    );
    for event in view.confirm_site(&mut manager, &service, None) {
        println!("view event={}", serde_event(&event));
    }

    let site = view
        .sites()
        .first()
        .cloned()
        .ok_or_else(|| "drawn site was not rendered".to_string())?;
    println!(
        "site name={} area_ha={:.2} phase={}",
        site.name,
        site.area_hectares.unwrap_or_default(),
        view.drawing_phase().as_str()
    );

    let analytics = SqliteAnalyticsRepository::try_new(&conn).map_err(|err| err.to_string())?;
    for (day, carbon) in [(15, 2.5), (1, 1.0)] {
        let date = NaiveDate::from_ymd_opt(2024, 1, day)
            .ok_or_else(|| format!("invalid smoke date day={day}"))?;
        let record = NewAnalyticsRecord {
            date,
            carbon_sequestration_tonnes: carbon,
            biodiversity_score: 50.0,
            tree_count: 100,
            vegetation_cover_percentage: 40.0,
            soil_carbon_percentage: 1.5,
        };
        analytics
            .insert_record(site.id, &record)
            .map_err(|err| err.to_string())?;
    }
    let detail = service
        .get_site_detail(site.id)
        .map_err(|err| err.to_string())?;
    let series = build_series(&detail.analytics);
    println!("series points={} dates={:?}", series.carbon.len(), series.dates());

    view.unmount(&mut manager);
    println!("walkthrough status=ok");
    Ok(())
}

fn serde_event(event: &geosite_core::ViewEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| format!("{event:?}"))
}
