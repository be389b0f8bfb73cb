//! Integration tests for stage composition, payloads, variants and notices.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use usd_compose::prelude::*;
use usd_compose::util::{init_test_tracing, InitialLoadSet};

fn p(s: &str) -> Path {
    Path::parse(s).expect("Failed to parse path")
}

fn record_notices(stage: &Stage) -> Arc<Mutex<Vec<ObjectsChanged>>> {
    let seen: Arc<Mutex<Vec<ObjectsChanged>>> = Arc::default();
    let sink = Arc::clone(&seen);
    stage.register_notice_listener(move |notice| sink.lock().push(notice.clone()));
    seen
}

#[test]
fn test_contents_compose_references_and_sublayers() {
    init_test_tracing();
    let registry = LayerRegistry::new();
    let model = registry.create("model.usda");
    model.create_prim_spec(&p("/Model/Geo"), Specifier::Def).expect("Failed to create spec");
    model.create_attribute_spec(&p("/Model/Geo.points"), "point3f[]").expect("Failed to create attribute");
    let sub = registry.create("sub.usda");
    sub.create_prim_spec(&p("/Lights/Key"), Specifier::Def).expect("Failed to create spec");
    let root = registry.create("root.usda");
    root.set_sublayer_paths(vec!["sub.usda".into()]).expect("Failed to set sublayers");
    root.create_prim_spec(&p("/Char"), Specifier::Def).expect("Failed to create spec");
    root.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
        .expect("Failed to author reference");

    let stage = Stage::open(&registry, &root).expect("Failed to open stage");
    assert_eq!(
        stage.contents_json(),
        json!({
            "Char": {"Geo": {".": ["points"]}},
            "Lights": {"Key": {}}
        })
    );
    assert_eq!(stage.used_layers().len(), 3);

    let geo = stage.prim_at_path(&p("/Char/Geo")).expect("Geo missing");
    assert_eq!(geo.parent().expect("parent").path(), &p("/Char"));
    assert_eq!(geo.specifier(), Some(Specifier::Def));
    assert_eq!(stage.pseudo_root().child_names(), vec!["Char".to_string(), "Lights".to_string()]);
}

#[test]
fn test_payloads_follow_load_and_unload() {
    let registry = LayerRegistry::new();
    let model = registry.create("model.usda");
    model.create_prim_spec(&p("/Model/Geo"), Specifier::Def).expect("Failed to create spec");
    let shot = registry.create("shot.usda");
    shot.create_prim_spec(&p("/A"), Specifier::Def).expect("Failed to create spec");
    shot.set_payloads(&p("/A"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
        .expect("Failed to author payload");

    let options = StageOptions::default().with_initial_load(InitialLoadSet::LoadNone);
    let stage = Stage::open_with_options(&registry, &shot, options).expect("Failed to open stage");
    let seen = record_notices(&stage);
    assert_eq!(stage.contents_json(), json!({"A": {}}));
    assert!(!stage.is_loaded(&p("/A")));

    stage.load(&p("/A"));
    assert!(stage.is_loaded(&p("/A")));
    assert_eq!(stage.contents_json(), json!({"A": {"Geo": {}}}));

    stage.unload(&p("/A"));
    assert_eq!(stage.contents_json(), json!({"A": {}}));

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].resynced_paths(), [p("/A")]);
}

#[test]
fn test_variant_selection_edit_resyncs_prim() {
    let registry = LayerRegistry::new();
    let layer = registry.create("set.usda");
    layer.create_prim_spec(&p("/Set"), Specifier::Def).expect("Failed to create spec");
    layer
        .set_variant_set_names(&p("/Set"), ListOp::prepended(vec!["shading".to_string()]))
        .expect("Failed to author variant sets");
    layer.create_variant_spec(&p("/Set"), "shading", "red").expect("Failed to create variant");
    layer.create_variant_spec(&p("/Set"), "shading", "blue").expect("Failed to create variant");
    layer.create_prim_spec(&p("/Set{shading=blue}Leaf"), Specifier::Def).expect("Failed to create spec");
    layer.set_variant_selection(&p("/Set"), "shading", Some("blue")).expect("Failed to select variant");

    let stage = Stage::open(&registry, &layer).expect("Failed to open stage");
    let seen = record_notices(&stage);
    assert_eq!(stage.contents_json(), json!({"Set": {"Leaf": {}}}));

    layer.set_variant_selection(&p("/Set"), "shading", Some("red")).expect("Failed to select variant");
    assert_eq!(stage.contents_json(), json!({"Set": {}}));
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].resynced_paths(), [p("/Set")]);
}

#[test]
fn test_session_layer_is_strongest() {
    let registry = LayerRegistry::new();
    let root = registry.create("root.usda");
    root.create_prim_spec(&p("/Ball"), Specifier::Def).expect("Failed to create spec");
    root.create_attribute_spec(&p("/Ball.radius"), "double").expect("Failed to create attribute");
    root.set_default_value(&p("/Ball.radius"), Value::Double(1.0)).expect("Failed to set default");
    let session = registry.create("session.usda");
    session.create_prim_spec(&p("/Ball"), Specifier::Over).expect("Failed to create spec");
    session.create_attribute_spec(&p("/Ball.radius"), "double").expect("Failed to create attribute");
    session.set_default_value(&p("/Ball.radius"), Value::Double(2.0)).expect("Failed to set default");

    let stage = Stage::open_with_session(&registry, &root, &session).expect("Failed to open stage");
    let radius = stage.attribute_at_path(&p("/Ball.radius")).expect("Attribute missing");
    assert_eq!(radius.get(), Some(Value::Double(2.0)));
    assert!(Arc::ptr_eq(stage.session_layer().expect("session"), &session));
    assert!(Stage::open_with_session(&registry, &root, &root).is_err());
}

#[test]
fn test_default_prim_edit_resyncs_pseudo_root() {
    let registry = LayerRegistry::new();
    let root = registry.create("root.usda");
    root.create_prim_spec(&p("/World"), Specifier::Def).expect("Failed to create spec");
    let stage = Stage::open(&registry, &root).expect("Failed to open stage");
    let seen = record_notices(&stage);

    root.set_default_prim("World").expect("Failed to set default prim");
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].resynced_paths(), [Path::root()]);
}

#[test]
fn test_define_and_override_author_in_edit_target() {
    let registry = LayerRegistry::new();
    let root = registry.create("root.usda");
    let stage = Stage::open(&registry, &root).expect("Failed to open stage");

    let prim = stage.define_prim(&p("/World/Cube"), "Cube").expect("Failed to define prim");
    assert_eq!(prim.type_name(), "Cube");
    let attr = prim.create_attribute("size", "double").expect("Failed to create attribute");
    attr.set(Value::Double(2.0)).expect("Failed to set value");
    assert_eq!(stage.contents_json(), json!({"World": {"Cube": {".": ["size"]}}}));

    let over = stage.override_prim(&p("/World/Sphere")).expect("Failed to override prim");
    assert_eq!(over.specifier(), Some(Specifier::Over));
    assert!(root.has_spec(&p("/World/Sphere")));
    assert_eq!(
        stage.traverse().iter().map(|prim| prim.path().to_string()).collect::<Vec<_>>(),
        vec!["/World", "/World/Cube", "/World/Sphere"]
    );
}
