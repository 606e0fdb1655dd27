//! Scene content reaching the command stream: draw-item skipping, light
//! packing and per-frame uniforms.

mod common;

use glam::Vec3;
use rstest::rstest;

use deferred_renderer::resources::{Material, MeshData, MeshId};
use deferred_renderer::scene::{DrawItem, PointLight};
use deferred_renderer::{DebugView, PipelineVariant};

use common::{
    count_indexed_draws, draw_pushes_in, engine, indexed_draws_in, populate_scene, pushes_in,
    read_model, read_u32,
};

fn without_mesh(item: DrawItem) -> DrawItem {
    DrawItem { mesh: None, ..item }
}

fn without_material(item: DrawItem) -> DrawItem {
    DrawItem {
        material: None,
        ..item
    }
}

#[rstest]
#[case::forward_no_mesh(PipelineVariant::Forward, "forward", without_mesh)]
#[case::forward_no_material(PipelineVariant::Forward, "forward", without_material)]
#[case::deferred_no_mesh(PipelineVariant::Deferred, "gbuffer", without_mesh)]
#[case::deferred_no_material(PipelineVariant::Deferred, "gbuffer", without_material)]
#[case::advanced_no_mesh(PipelineVariant::DeferredAdvanced, "gbuffer", without_mesh)]
#[case::advanced_no_material(PipelineVariant::DeferredAdvanced, "gbuffer", without_material)]
fn test_incomplete_items_are_skipped(
    #[case] variant: PipelineVariant,
    #[case] geometry_pass: &str,
    #[case] strip: fn(DrawItem) -> DrawItem,
) {
    let mut engine = engine(variant, 800, 600);
    let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
    let material = engine.create_material(&Material::default()).unwrap();

    let scene = engine.scene_mut();
    scene.add_item(DrawItem::new(cube, material));
    scene.add_item(strip(
        DrawItem::new(cube, material).with_position(Vec3::Y * 7.0),
    ));
    scene.add_item(DrawItem::new(cube, material).with_position(Vec3::X * 3.0));
    engine.draw_frame().unwrap();

    let commands = engine.backend().last_frame_commands().unwrap();
    let models: Vec<_> = draw_pushes_in(commands, geometry_pass)
        .into_iter()
        .map(read_model)
        .collect();
    assert_eq!(models.len(), 2);
    // Neighbours of the skipped item keep their order and transforms
    assert_eq!(models[0].w_axis.truncate(), Vec3::ZERO);
    assert_eq!(models[1].w_axis.truncate(), Vec3::X * 3.0);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn test_unknown_ids_are_skipped() {
    let mut engine = engine(PipelineVariant::Forward, 800, 600);
    let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
    let material = engine.create_material(&Material::gold()).unwrap();
    engine.scene_mut().add_item(DrawItem::new(cube, material));
    engine
        .scene_mut()
        .add_item(DrawItem::new(MeshId(999), material));
    engine.draw_frame().unwrap();

    let commands = engine.backend().last_frame_commands().unwrap();
    assert_eq!(count_indexed_draws(commands), 1);
}

#[test]
fn test_shadow_cascades_draw_every_caster() {
    let mut engine = engine(PipelineVariant::DeferredAdvanced, 800, 600);
    let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
    let material = engine.create_material(&Material::default()).unwrap();
    engine.scene_mut().add_item(DrawItem::new(cube, material));
    engine
        .scene_mut()
        .add_item(DrawItem::new(cube, material).with_position(Vec3::Z * 4.0));
    engine.draw_frame().unwrap();

    let commands = engine.backend().last_frame_commands().unwrap();
    // Two casters into each of three cascades
    assert_eq!(indexed_draws_in(commands, "shadow_cascade"), 6);
    assert_eq!(indexed_draws_in(commands, "gbuffer"), 2);
}

#[test]
fn test_empty_scene_still_presents() {
    let mut engine = engine(PipelineVariant::DeferredAdvanced, 800, 600);
    for _ in 0..3 {
        engine.draw_frame().unwrap();
    }
    let commands = engine.backend().last_frame_commands().unwrap();
    assert_eq!(count_indexed_draws(commands), 0);
    assert_eq!(engine.frame_number(), 3);
}

#[rstest]
#[case::under(10, 10)]
#[case::at_capacity(256, 256)]
#[case::over(400, 256)]
fn test_point_lights_are_clamped(#[case] count: usize, #[case] expected: u32) {
    let mut engine = engine(PipelineVariant::Deferred, 800, 600);
    for i in 0..count {
        engine.scene_mut().add_point_light(PointLight::new(
            Vec3::new(i as f32 * 0.1, 1.0, 0.0),
            Vec3::ONE,
            1.0,
            4.0,
        ));
    }
    engine.draw_frame().unwrap();
    engine.draw_frame().unwrap();
    assert_eq!(engine.last_uniforms().unwrap().point_light_count, expected);
}

#[test]
fn test_previous_matrices_follow_last_frame() {
    let mut engine = engine(PipelineVariant::DeferredAdvanced, 800, 600);
    engine.draw_frame().unwrap();
    let first = *engine.last_uniforms().unwrap();

    engine.scene_mut().camera.position += Vec3::X;
    engine.draw_frame().unwrap();
    let second = engine.last_uniforms().unwrap();
    assert_eq!(second.prev_view_proj, first.unjittered_view_proj);
    assert_ne!(second.unjittered_view_proj, first.unjittered_view_proj);
}

#[rstest]
#[case::forward_normal(PipelineVariant::Forward, DebugView::Normal, 2)]
#[case::forward_cascades(PipelineVariant::Forward, DebugView::Cascades, 0)]
#[case::forward_unknown(PipelineVariant::Forward, DebugView::from_raw(42), 0)]
#[case::deferred_normal(PipelineVariant::Deferred, DebugView::Normal, 2)]
#[case::deferred_cascades(PipelineVariant::Deferred, DebugView::Cascades, 0)]
#[case::deferred_unknown(PipelineVariant::Deferred, DebugView::from_raw(42), 0)]
#[case::advanced_depth(PipelineVariant::DeferredAdvanced, DebugView::Depth, 5)]
#[case::advanced_cascades(PipelineVariant::DeferredAdvanced, DebugView::Cascades, 6)]
#[case::advanced_unknown(PipelineVariant::DeferredAdvanced, DebugView::from_raw(42), 0)]
fn test_debug_view_reaches_push_constants(
    #[case] variant: PipelineVariant,
    #[case] view: DebugView,
    #[case] expected: u32,
) {
    let mut engine = engine(variant, 800, 600);
    populate_scene(&mut engine);
    engine.set_debug_view(view);
    engine.draw_frame().unwrap();

    // Scope label and byte offset of the debug view in its push block
    let scopes: &[(&str, usize)] = match variant {
        PipelineVariant::Forward => &[("forward", 64)],
        _ => &[("lighting", 0), ("tonemap", 0)],
    };
    let commands = engine.backend().last_frame_commands().unwrap();
    for &(label, offset) in scopes {
        let pushes = pushes_in(commands, label);
        assert!(!pushes.is_empty(), "nothing pushed in {}", label);
        for data in pushes {
            assert_eq!(read_u32(data, offset), expected, "{} pass", label);
        }
    }
    assert!(engine.backend().hazards().is_empty());
}
