//! Layout tracking through whole frames: every attachment and sampled image
//! is in the right layout when used, and the swapchain image ends in the
//! present layout.

mod common;

use rstest::rstest;

use deferred_renderer::backend::dummy::RecordedCommand;
use deferred_renderer::backend::TextureLayout;
use deferred_renderer::PipelineVariant;

use common::{engine, populate_scene, LayoutTracker};

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_every_use_sees_the_right_layout(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 1600, 900);
    populate_scene(&mut engine);
    let mut tracker = LayoutTracker::new();

    for frame in 0..8 {
        engine.draw_frame().unwrap();
        let problems = tracker.check(engine.backend());
        assert!(problems.is_empty(), "frame {}: {:#?}", frame, problems);
    }
}

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_layouts_stay_valid_across_resize(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 800, 600);
    populate_scene(&mut engine);
    let mut tracker = LayoutTracker::new();

    engine.draw_frame().unwrap();
    assert!(tracker.check(engine.backend()).is_empty());
    engine.resize(1280, 720);
    for frame in 0..4 {
        engine.draw_frame().unwrap();
        let problems = tracker.check(engine.backend());
        assert!(problems.is_empty(), "frame {}: {:#?}", frame, problems);
    }
    assert_eq!(engine.recreate_count(), 1);
}

#[rstest]
#[case::forward(PipelineVariant::Forward)]
#[case::deferred(PipelineVariant::Deferred)]
#[case::advanced(PipelineVariant::DeferredAdvanced)]
fn test_frame_ends_with_present_transition(#[case] variant: PipelineVariant) {
    let mut engine = engine(variant, 1600, 900);
    populate_scene(&mut engine);
    let mut tracker = LayoutTracker::new();

    for _ in 0..4 {
        engine.draw_frame().unwrap();
        tracker.check(engine.backend());
        let commands = engine.backend().last_frame_commands().unwrap();
        let Some(RecordedCommand::Barrier(last)) = commands.last() else {
            panic!("frame does not end with a barrier");
        };
        assert_eq!(last.new_layout, TextureLayout::PresentSrc);
        assert_eq!(tracker.layout(last.texture), Some(TextureLayout::PresentSrc));
    }
}

#[rstest]
#[case::forward(PipelineVariant::Forward, 1)]
#[case::deferred(PipelineVariant::Deferred, 3)]
// Three shadow cascades, gbuffer, lighting, motion, taa, tonemap, fxaa
#[case::advanced(PipelineVariant::DeferredAdvanced, 9)]
fn test_rendering_scopes_per_variant(#[case] variant: PipelineVariant, #[case] expected: usize) {
    let mut engine = engine(variant, 800, 600);
    populate_scene(&mut engine);
    engine.draw_frame().unwrap();

    let commands = engine.backend().last_frame_commands().unwrap();
    let begins = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::BeginRendering(_)))
        .count();
    let ends = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::EndRendering))
        .count();
    assert_eq!(begins, ends);
    assert_eq!(begins, expected);
}
