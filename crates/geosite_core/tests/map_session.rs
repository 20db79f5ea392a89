use geosite_core::db::open_db_in_memory;
use geosite_core::map::backend::LayerSpec;
use geosite_core::{
    Classify, ContainerId, DrawEvent, DrawEventKind, ErrorKind, EventKind, HeadlessMapBackend,
    LatLng, LonLat, MapConfig, MapSurfaceManager, Notification, PolygonGeometry, RenderShape,
    SessionOutcome, SessionPhase, SiteLifecycleService, SiteMapView, SiteMetrics,
    SqliteProjectRepository, SqliteSiteRepository, SurfaceError, ViewEvent,
};
use rusqlite::Connection;
use uuid::Uuid;

type Service<'conn> =
    SiteLifecycleService<SqliteProjectRepository<'conn>, SqliteSiteRepository<'conn>>;

fn service_for(conn: &Connection) -> Service<'_> {
    SiteLifecycleService::new(
        Uuid::new_v4(),
        SqliteProjectRepository::try_new(conn).unwrap(),
        SqliteSiteRepository::try_new(conn).unwrap(),
    )
}

fn container() -> ContainerId {
    ContainerId::new("site-map")
}

fn drawn_square(lat: f64, lng: f64) -> RenderShape {
    RenderShape::Polygon {
        rings: vec![vec![
            LatLng::new(lat, lng),
            LatLng::new(lat, lng + 0.01),
            LatLng::new(lat + 0.01, lng + 0.01),
            LatLng::new(lat + 0.01, lng),
        ]],
    }
}

fn draw_created(
    manager: &MapSurfaceManager<HeadlessMapBackend>,
    view: &SiteMapView,
    shape: RenderShape,
) -> DrawEvent {
    let surface = view.surface().unwrap().surface_id();
    let listener = manager.backend().listeners(surface, EventKind::DrawCreated)[0];
    DrawEvent {
        listener,
        kind: DrawEventKind::Created(shape),
    }
}

fn outcomes(events: &[ViewEvent]) -> Vec<SessionOutcome> {
    events
        .iter()
        .filter_map(|event| match event {
            ViewEvent::Drawing(transition) => Some(transition.outcome),
            _ => None,
        })
        .collect()
}

fn notifications(events: &[ViewEvent]) -> Vec<&Notification> {
    events
        .iter()
        .filter_map(|event| match event {
            ViewEvent::Notify(notification) => Some(notification),
            _ => None,
        })
        .collect()
}

fn mounted_view(
    manager: &mut MapSurfaceManager<HeadlessMapBackend>,
    service: &Service<'_>,
    project_id: Uuid,
) -> SiteMapView {
    let mut view = SiteMapView::new(container(), &MapConfig::default());
    assert!(view.mount(manager).unwrap());
    let (ticket, events) = view.select_project(manager, project_id);
    assert!(events.is_empty());
    view.apply_sites(manager, ticket, service.list_sites(project_id));
    view
}

#[test]
fn drawn_ring_commits_exactly_one_site_with_default_name() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Ridge", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);

    assert_eq!(outcomes(&view.toggle_draw(&mut manager)), vec![SessionOutcome::Started]);
    let event = draw_created(&manager, &view, drawn_square(-1.0, 30.0));
    assert_eq!(
        outcomes(&view.handle_draw_event(&mut manager, event)),
        vec![SessionOutcome::Captured]
    );
    assert_eq!(view.drawing_phase(), SessionPhase::AwaitingConfirmation);

    let events = view.confirm_site(&mut manager, &service, None);
    let committed = outcomes(&events);
    assert_eq!(committed.len(), 1);
    assert!(matches!(committed[0], SessionOutcome::Committed(_)));
    assert!(notifications(&events).is_empty());

    assert_eq!(view.drawing_phase(), SessionPhase::Idle);
    assert_eq!(view.sites().len(), 1);
    assert_eq!(view.sites()[0].name, "Site 1");
    assert_eq!(service.count_sites(project.id).unwrap(), 1);

    let events = view.confirm_site(&mut manager, &service, Some("Again"));
    assert_eq!(notifications(&events)[0].kind, ErrorKind::InvalidInput);
    assert_eq!(service.count_sites(project.id).unwrap(), 1);

    view.toggle_draw(&mut manager);
    let event = draw_created(&manager, &view, drawn_square(-2.0, 31.0));
    view.handle_draw_event(&mut manager, event);
    view.confirm_site(&mut manager, &service, Some("  North  "));
    let names: Vec<&str> = view.sites().iter().map(|site| site.name.as_str()).collect();
    assert_eq!(names, vec!["Site 1", "North"]);

    let (surface, record) = manager.backend().surface_on(&container()).unwrap();
    assert_eq!(Some(surface), view.surface().map(|handle| handle.surface_id()));
    assert_eq!(record.layers.len(), 1);
    assert!(record.controls.is_empty());
}

#[test]
fn failed_commit_keeps_captured_geometry() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Doomed", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);

    view.toggle_draw(&mut manager);
    let event = draw_created(&manager, &view, drawn_square(10.0, 10.0));
    view.handle_draw_event(&mut manager, event);
    service.delete_project(project.id).unwrap();

    let events = view.confirm_site(&mut manager, &service, None);
    assert!(outcomes(&events).is_empty());
    assert_eq!(notifications(&events)[0].kind, ErrorKind::NotFound);
    assert_eq!(view.drawing_phase(), SessionPhase::AwaitingConfirmation);
    assert_eq!(view.session().drawn().unwrap().polygon().vertex_count(), 4);

    assert_eq!(
        outcomes(&view.cancel_draw(&mut manager)),
        vec![SessionOutcome::Cancelled]
    );
    let (_, record) = manager.backend().surface_on(&container()).unwrap();
    assert!(record
        .layers
        .values()
        .all(|layer| !matches!(layer, LayerSpec::ProvisionalOverlay { .. })));
}

#[test]
fn invalid_drawn_ring_is_reported_and_drawing_continues() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Sketch", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);

    view.toggle_draw(&mut manager);
    let degenerate = RenderShape::Polygon {
        rings: vec![vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)]],
    };
    let event = draw_created(&manager, &view, degenerate);
    let events = view.handle_draw_event(&mut manager, event);
    assert_eq!(notifications(&events)[0].kind, ErrorKind::InvalidGeometry);
    assert_eq!(view.drawing_phase(), SessionPhase::Active);
}

#[test]
fn stale_fetch_is_never_rendered() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let first = service.create_project("First", None).unwrap();
    let second = service.create_project("Second", None).unwrap();
    let geometry = |lon: f64| PolygonGeometry {
        kind: "Polygon".to_string(),
        coordinates: vec![vec![
            LonLat::new(lon, 0.0),
            LonLat::new(lon + 0.01, 0.0),
            LonLat::new(lon + 0.01, 0.01),
            LonLat::new(lon, 0.0),
        ]],
    };
    service
        .create_site(first.id, "Old", geometry(1.0), SiteMetrics::default())
        .unwrap();
    service
        .create_site(second.id, "New", geometry(2.0), SiteMetrics::default())
        .unwrap();

    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = SiteMapView::new(container(), &MapConfig::default());
    view.mount(&mut manager).unwrap();

    let (slow, _) = view.select_project(&mut manager, first.id);
    let (fast, _) = view.select_project(&mut manager, second.id);
    view.apply_sites(&mut manager, fast, service.list_sites(second.id));
    let late = view.apply_sites(&mut manager, slow, service.list_sites(first.id));

    assert!(late.is_empty());
    assert_eq!(view.project_id(), Some(second.id));
    assert_eq!(view.sites().len(), 1);
    assert_eq!(view.sites()[0].name, "New");
    let (_, record) = manager.backend().surface_on(&container()).unwrap();
    assert_eq!(record.layers.len(), 1);
}

#[test]
fn remount_before_teardown_settles_on_one_surface() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Remount", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);
    manager.backend_mut().set_deferred_teardown(true);
    view.toggle_draw(&mut manager);

    assert!(!view.mount(&mut manager).unwrap());
    assert!(view.surface().is_none());
    assert_eq!(view.drawing_phase(), SessionPhase::Idle);
    assert!(!view.settle(&mut manager).unwrap());

    manager.backend_mut().flush_teardowns();
    assert!(view.settle(&mut manager).unwrap());

    let backend = manager.backend();
    assert_eq!(backend.live_surfaces(&container()), 1);
    assert_eq!(backend.surfaces_created(), 3);
    assert_eq!(backend.destroyed_with_children(), 0);
    let (_, record) = backend.surface_on(&container()).unwrap();
    assert_eq!(record.layers.len(), 1);
}

#[test]
fn switching_project_replaces_the_surface() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let first = service.create_project("First", None).unwrap();
    let second = service.create_project("Second", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, first.id);
    let before = view.surface().unwrap().clone();
    view.toggle_draw(&mut manager);

    let (ticket, events) = view.select_project(&mut manager, second.id);
    assert_eq!(outcomes(&events), vec![SessionOutcome::Abandoned]);
    assert!(notifications(&events).is_empty());
    view.apply_sites(&mut manager, ticket, service.list_sites(second.id));

    let after = view.surface().unwrap().clone();
    assert_ne!(after, before);
    assert!(after.generation() > before.generation());
    assert!(!manager.is_live(&before));
    assert_eq!(view.drawing_phase(), SessionPhase::Idle);

    let backend = manager.backend();
    assert_eq!(backend.live_surfaces(&container()), 1);
    assert_eq!(backend.surfaces_created(), 2);
    assert_eq!(backend.destroyed_with_children(), 0);
    let (surface, record) = backend.surface_on(&container()).unwrap();
    assert_eq!(surface, after.surface_id());
    assert_eq!(record.layers.len(), 1);
    assert!(record.controls.is_empty());
    assert!(record.listeners.is_empty());
}

#[test]
fn switching_project_during_teardown_settles_with_new_sites() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let first = service.create_project("First", None).unwrap();
    let second = service.create_project("Second", None).unwrap();
    let geometry = PolygonGeometry {
        kind: "Polygon".to_string(),
        coordinates: vec![vec![
            LonLat::new(4.0, 4.0),
            LonLat::new(4.01, 4.0),
            LonLat::new(4.01, 4.01),
            LonLat::new(4.0, 4.0),
        ]],
    };
    service
        .create_site(second.id, "Grove", geometry, SiteMetrics::default())
        .unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, first.id);
    manager.backend_mut().set_deferred_teardown(true);

    let (ticket, events) = view.select_project(&mut manager, second.id);
    assert!(events.is_empty());
    assert!(view.surface().is_none());
    view.apply_sites(&mut manager, ticket, service.list_sites(second.id));
    assert_eq!(view.sites().len(), 1);
    assert_eq!(manager.backend().live_surfaces(&container()), 0);

    manager.backend_mut().flush_teardowns();
    assert!(view.settle(&mut manager).unwrap());

    let (surface, record) = manager.backend().surface_on(&container()).unwrap();
    assert_eq!(Some(surface), view.surface().map(|handle| handle.surface_id()));
    assert_eq!(manager.backend().live_surfaces(&container()), 1);
    let Some(LayerSpec::Sites { features }) = record.layers.values().next() else {
        panic!("expected sites layer");
    };
    assert_eq!(features.len(), 1);
}

#[test]
fn cancelling_active_drawing_creates_no_site() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Idle", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);

    assert_eq!(outcomes(&view.toggle_draw(&mut manager)), vec![SessionOutcome::Started]);
    let surface = view.surface().unwrap().surface_id();
    let record = manager.backend().surface(surface).unwrap();
    assert_eq!(record.controls.len(), 1);
    assert!(!record.listeners.is_empty());

    let events = view.cancel_draw(&mut manager);
    assert_eq!(outcomes(&events), vec![SessionOutcome::Cancelled]);
    assert!(notifications(&events).is_empty());
    assert_eq!(view.drawing_phase(), SessionPhase::Idle);

    let record = manager.backend().surface(surface).unwrap();
    assert!(record.controls.is_empty());
    assert!(record.listeners.is_empty());
    assert_eq!(record.layers.len(), 1);
    assert_eq!(service.count_sites(project.id).unwrap(), 0);
    assert!(view.sites().is_empty());
}

#[test]
fn busy_container_exhausts_retry_budget_silently() {
    let mut manager = MapSurfaceManager::new(
        HeadlessMapBackend::with_deferred_teardown(),
        &MapConfig::default(),
    );
    let mut view = SiteMapView::new(container(), &MapConfig::default());
    assert!(view.mount(&mut manager).unwrap());
    assert!(!view.mount(&mut manager).unwrap());

    assert!(!view.settle(&mut manager).unwrap());
    let err = view.settle(&mut manager).unwrap_err();
    assert!(matches!(err, SurfaceError::ContainerBusy { attempts: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::TransientSurfaceConflict);
    assert!(Notification::from_error(&err).is_none());
}

#[test]
fn unmount_abandons_drawing_and_drops_pending_fetches() {
    let conn = open_db_in_memory().unwrap();
    let service = service_for(&conn);
    let project = service.create_project("Closing", None).unwrap();
    let mut manager = MapSurfaceManager::new(HeadlessMapBackend::new(), &MapConfig::default());
    let mut view = mounted_view(&mut manager, &service, project.id);
    view.toggle_draw(&mut manager);
    let (ticket, _) = view.select_project(&mut manager, project.id);
    view.toggle_draw(&mut manager);

    let events = view.unmount(&mut manager);
    assert_eq!(outcomes(&events), vec![SessionOutcome::Abandoned]);
    assert_eq!(manager.backend().live_surfaces(&container()), 0);
    assert_eq!(manager.backend().destroyed_with_children(), 0);

    let late = view.apply_sites(&mut manager, ticket, service.list_sites(project.id));
    assert!(late.is_empty());
    assert!(view.sites().is_empty());
}
