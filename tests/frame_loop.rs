//! Frame loop integration tests: slot cycling, acquire/present pairing,
//! swapchain recreation and shutdown, for every pipeline variant.

mod common;

use rstest::rstest;

use deferred_renderer::backend::dummy::{DummyBackend, DummyEvent};
use deferred_renderer::backend::{BackendError, Extent2D};
use deferred_renderer::{Engine, EngineConfig, FrameStatus, PipelineVariant};

use common::{acquires_and_presents, engine, populate_scene};

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_hundred_twenty_frames_cycle_slots(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 1600, 900);
    populate_scene(&mut engine);
    let image_count = engine.swapchain().image_count() as usize;
    assert_eq!(image_count, 3);

    let mut slots = Vec::new();
    for _ in 0..120 {
        match engine.draw_frame().unwrap() {
            FrameStatus::Presented { slot, .. } => slots.push(slot),
            other => panic!("unexpected {:?}", other),
        }
    }

    assert_eq!(slots.len(), 120);
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(*slot, i % image_count, "frame {}", i);
    }
    assert_eq!(engine.frame_number(), 120);
    assert_eq!(engine.recreate_count(), 0);
    assert_eq!(engine.swapchain().extent(), Extent2D::new(1600, 900));
    assert!(engine.backend().hazards().is_empty(), "{:?}", engine.backend().hazards());
}

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_every_acquired_image_is_presented(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 1600, 900);
    populate_scene(&mut engine);
    engine.backend_mut().clear_events();
    for _ in 0..12 {
        engine.draw_frame().unwrap();
    }

    let (acquired, presented) = acquires_and_presents(engine.backend().events());
    assert_eq!(acquired.len(), 12);
    assert_eq!(acquired, presented);

    // Each present directly follows the submit of the frame that acquired it
    let events = engine.backend().events();
    let mut last_acquire = None;
    for event in events {
        match event {
            DummyEvent::Acquire { image_index, .. } => {
                assert!(last_acquire.is_none(), "two acquires without a present");
                last_acquire = Some(*image_index);
            }
            DummyEvent::Present { image_index, .. } => {
                assert_eq!(last_acquire.take(), Some(*image_index));
            }
            _ => {}
        }
    }
}

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_each_frame_waits_on_its_own_slot_fence(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 800, 600);
    engine.backend_mut().clear_events();
    for _ in 0..6 {
        engine.draw_frame().unwrap();
    }

    let events = engine.backend().events();
    let waits: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DummyEvent::FenceWait(f) => Some(*f),
            _ => None,
        })
        .collect();
    let submits: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DummyEvent::Submit { fence: Some(f), .. } => Some(*f),
            _ => None,
        })
        .collect();
    assert_eq!(waits.len(), 6);
    assert_eq!(waits, submits);
    // Three slots, so frame N and N+3 share a fence
    assert_eq!(waits[0], waits[3]);
    assert_ne!(waits[0], waits[1]);
}

#[test]
fn test_resize_is_idempotent() {
    let mut engine = engine(PipelineVariant::Deferred, 800, 600);
    engine.draw_frame().unwrap();

    engine.resize(1280, 720);
    engine.resize(1280, 720);
    engine.draw_frame().unwrap();
    assert_eq!(engine.recreate_count(), 1);
    assert_eq!(engine.swapchain().extent(), Extent2D::new(1280, 720));

    // Same size again is a no-op
    engine.resize(1280, 720);
    engine.draw_frame().unwrap();
    engine.draw_frame().unwrap();
    assert_eq!(engine.recreate_count(), 1);
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn test_zero_size_never_creates_a_swapchain() {
    let mut engine = engine(PipelineVariant::DeferredAdvanced, 800, 600);
    engine.resize(0, 0);
    engine.backend_mut().clear_events();

    for _ in 0..3 {
        assert_eq!(engine.draw_frame().unwrap(), FrameStatus::Skipped);
    }
    assert!(engine.recreate().is_ok());
    let created = engine
        .backend()
        .events()
        .iter()
        .any(|e| matches!(e, DummyEvent::SwapchainCreated { .. }));
    assert!(!created);
    assert_eq!(engine.frame_number(), 0);

    engine.resize(640, 480);
    assert!(matches!(
        engine.draw_frame().unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(engine.swapchain().extent(), Extent2D::new(640, 480));
}

#[test]
fn test_suboptimal_present_triggers_recreate() {
    let mut engine = engine(PipelineVariant::Deferred, 800, 600);
    engine.backend_mut().inject_suboptimal_presents(1);
    assert!(matches!(
        engine.draw_frame().unwrap(),
        FrameStatus::Presented { .. }
    ));
    assert_eq!(engine.recreate_count(), 1);

    // The next frame starts from slot 0 of the new chain
    match engine.draw_frame().unwrap() {
        FrameStatus::Presented { slot, .. } => assert_eq!(slot, 0),
        other => panic!("unexpected {:?}", other),
    }
    assert!(engine.backend().hazards().is_empty());
}

#[test]
fn test_surface_extent_change_is_followed() {
    let mut engine = engine(PipelineVariant::Forward, 800, 600);
    engine.draw_frame().unwrap();
    engine
        .backend_mut()
        .set_surface_extent(Some(Extent2D::new(1024, 576)));

    // The next acquire sees a stale chain
    assert_eq!(engine.draw_frame().unwrap(), FrameStatus::Recreated);
    assert_eq!(engine.swapchain().extent(), Extent2D::new(1024, 576));
    assert!(matches!(
        engine.draw_frame().unwrap(),
        FrameStatus::Presented { .. }
    ));
}

#[test]
fn test_recreate_keeps_layout_cache_stable() {
    let mut engine = engine(PipelineVariant::DeferredAdvanced, 800, 600);
    populate_scene(&mut engine);
    engine.draw_frame().unwrap();
    let before = engine.backend().live_resources();

    for size in [(1024, 768), (640, 480), (800, 600)] {
        engine.resize(size.0, size.1);
        engine.draw_frame().unwrap();
        engine.draw_frame().unwrap();
    }
    let after = engine.backend().live_resources();
    assert_eq!(engine.recreate_count(), 3);
    assert_eq!(after.descriptor_set_layouts, before.descriptor_set_layouts);
    assert_eq!(after.pipelines, before.pipelines);
    assert_eq!(after.textures, before.textures);
    assert_eq!(after.fences, before.fences);
}

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_shutdown_releases_everything(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 1600, 900);
    populate_scene(&mut engine);
    for _ in 0..10 {
        engine.draw_frame().unwrap();
    }
    engine.resize(1200, 800);
    engine.draw_frame().unwrap();

    engine.destroy();
    assert_eq!(engine.backend().live_resources(), Default::default());
    assert!(engine.backend().hazards().is_empty(), "{:?}", engine.backend().hazards());
    assert!(engine
        .backend()
        .events()
        .iter()
        .any(|e| matches!(e, DummyEvent::WaitIdle)));
}

#[test]
fn test_missing_shader_fails_startup() {
    let backend = DummyBackend::new().with_missing_shader("taa.frag.spv");
    let config = EngineConfig::default().with_variant(PipelineVariant::DeferredAdvanced);
    let err = Engine::from_backend(backend, config).err();
    assert!(matches!(err, Some(BackendError::ShaderCreationFailed { .. })));

    // Variants that never load the shader are unaffected
    let backend = DummyBackend::new().with_missing_shader("taa.frag.spv");
    let config = EngineConfig::default().with_variant(PipelineVariant::Deferred);
    assert!(Engine::from_backend(backend, config).is_ok());
}
