//! Shared fixtures for engine integration tests.
//!
//! Everything runs against the recording dummy backend, so these tests need
//! no GPU or window.

#![allow(dead_code)]

use std::collections::HashMap;

use glam::{Mat4, Vec3};

use deferred_renderer::backend::dummy::{DummyBackend, DummyEvent, RecordedCommand};
use deferred_renderer::backend::{
    DescriptorResource, DescriptorSetHandle, TextureHandle, TextureLayout,
};
use deferred_renderer::resources::{Material, MeshData};
use deferred_renderer::scene::{Camera, DirectionalLight, DrawItem, PointLight};
use deferred_renderer::{Engine, EngineConfig, PipelineVariant};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn engine(variant: PipelineVariant, width: u32, height: u32) -> Engine<DummyBackend> {
    init_logging();
    let config = EngineConfig::default()
        .with_variant(variant)
        .with_size(width, height);
    Engine::from_backend(DummyBackend::new(), config).expect("engine startup")
}

/// A cube, a sphere and a ground plane under a sun and a few point lights.
pub fn populate_scene(engine: &mut Engine<DummyBackend>) {
    let cube = engine.upload_mesh(&MeshData::cube()).unwrap();
    let sphere = engine.upload_mesh(&MeshData::sphere(16, 8)).unwrap();
    let plane = engine.upload_mesh(&MeshData::plane(20.0, 20.0, 1)).unwrap();
    let red = engine
        .create_material(&Material::plastic(Vec3::new(0.8, 0.1, 0.1)))
        .unwrap();
    let gold = engine.create_material(&Material::gold()).unwrap();

    let scene = engine.scene_mut();
    scene.camera = Camera::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO);
    scene.directional_light =
        DirectionalLight::new(Vec3::new(0.3, -1.0, 0.5), Vec3::new(1.0, 0.95, 0.9), 2.0);
    scene.add_item(DrawItem::new(plane, red));
    scene.add_item(DrawItem::new(cube, red).with_position(Vec3::new(-2.0, 1.0, 0.0)));
    scene.add_item(DrawItem::new(sphere, gold).with_position(Vec3::new(2.0, 1.0, 0.0)));
    for i in 0..4 {
        scene.add_point_light(PointLight::new(
            Vec3::new(i as f32 * 2.0 - 3.0, 1.0, 2.0),
            Vec3::ONE,
            3.0,
            6.0,
        ));
    }
}

/// Image indices acquired and presented, in event order.
pub fn acquires_and_presents(events: &[DummyEvent]) -> (Vec<u32>, Vec<u32>) {
    let mut acquired = Vec::new();
    let mut presented = Vec::new();
    for event in events {
        match event {
            DummyEvent::Acquire { image_index, .. } => acquired.push(*image_index),
            DummyEvent::Present { image_index, .. } => presented.push(*image_index),
            _ => {}
        }
    }
    (acquired, presented)
}

pub fn count_indexed_draws(commands: &[RecordedCommand]) -> usize {
    commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::DrawIndexed { .. }))
        .count()
}

/// Indexed draws recorded inside the rendering scope labelled `label`.
pub fn indexed_draws_in(commands: &[RecordedCommand], label: &str) -> usize {
    let mut inside = false;
    let mut count = 0;
    for command in commands {
        match command {
            RecordedCommand::BeginRendering(info) => inside = info.label == Some(label),
            RecordedCommand::EndRendering => inside = false,
            RecordedCommand::DrawIndexed { .. } if inside => count += 1,
            _ => {}
        }
    }
    count
}

/// Push constant payloads recorded inside the rendering scope labelled
/// `label`, in order.
pub fn pushes_in<'a>(commands: &'a [RecordedCommand], label: &str) -> Vec<&'a [u8]> {
    let mut inside = false;
    let mut pushes = Vec::new();
    for command in commands {
        match command {
            RecordedCommand::BeginRendering(info) => inside = info.label == Some(label),
            RecordedCommand::EndRendering => inside = false,
            RecordedCommand::PushConstants { data, .. } if inside => pushes.push(data.as_slice()),
            _ => {}
        }
    }
    pushes
}

/// The payload pushed last before each indexed draw in scope `label`.
pub fn draw_pushes_in<'a>(commands: &'a [RecordedCommand], label: &str) -> Vec<&'a [u8]> {
    let mut inside = false;
    let mut last: Option<&[u8]> = None;
    let mut pushes = Vec::new();
    for command in commands {
        match command {
            RecordedCommand::BeginRendering(info) => {
                inside = info.label == Some(label);
                last = None;
            }
            RecordedCommand::EndRendering => inside = false,
            RecordedCommand::PushConstants { data, .. } if inside => last = Some(data.as_slice()),
            RecordedCommand::DrawIndexed { .. } if inside => {
                pushes.push(last.expect("indexed draw without push constants"));
            }
            _ => {}
        }
    }
    pushes
}

pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    bytemuck::pod_read_unaligned(&data[offset..offset + 4])
}

/// Model matrix at the head of a per-draw push
pub fn read_model(data: &[u8]) -> Mat4 {
    bytemuck::pod_read_unaligned(&data[..64])
}

/// Replays recorded submissions and checks every image is in the layout its
/// use requires.
///
/// Layouts carry over between calls to [`LayoutTracker::check`], so frame N
/// is validated against the state frame N-1 left behind. Textures the tracker
/// has never seen a barrier for are not judged.
#[derive(Default)]
pub struct LayoutTracker {
    layouts: HashMap<TextureHandle, TextureLayout>,
    seen: usize,
}

impl LayoutTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(&self, texture: TextureHandle) -> Option<TextureLayout> {
        self.layouts.get(&texture).copied()
    }

    /// Validate the submissions made since the last call; returns problems.
    pub fn check(&mut self, backend: &DummyBackend) -> Vec<String> {
        let mut problems = Vec::new();
        let submissions = backend.submissions();
        for submission in &submissions[self.seen.min(submissions.len())..] {
            for command in &submission.commands {
                self.apply(backend, command, &mut problems);
            }
        }
        self.seen = submissions.len();
        problems
    }

    fn apply(&mut self, backend: &DummyBackend, command: &RecordedCommand, problems: &mut Vec<String>) {
        match command {
            RecordedCommand::Barrier(barrier) => {
                if let Some(current) = self.layouts.get(&barrier.texture) {
                    if barrier.old_layout != TextureLayout::Undefined
                        && barrier.old_layout != *current
                    {
                        problems.push(format!(
                            "barrier on {:?} claims {:?} but image is {:?}",
                            barrier.texture, barrier.old_layout, current
                        ));
                    }
                }
                self.layouts.insert(barrier.texture, barrier.new_layout);
            }
            RecordedCommand::BeginRendering(info) => {
                let attachments = info
                    .color_attachments
                    .iter()
                    .chain(info.depth_attachment.iter());
                for attachment in attachments {
                    let Some(texture) = backend.view_texture(attachment.view) else {
                        problems.push(format!("attachment view {:?} is unknown", attachment.view));
                        continue;
                    };
                    let current = self.layouts.get(&texture).copied();
                    if current != Some(attachment.layout) {
                        problems.push(format!(
                            "pass {:?} renders to {:?} in {:?}, expected {:?}",
                            info.label, texture, current, attachment.layout
                        ));
                    }
                }
            }
            RecordedCommand::BindDescriptorSet { set, .. } => {
                self.check_sampled(backend, *set, problems);
            }
            _ => {}
        }
    }

    fn check_sampled(&self, backend: &DummyBackend, set: DescriptorSetHandle, problems: &mut Vec<String>) {
        for (binding, resource) in backend.descriptor_writes(set) {
            let (view, expected) = match resource {
                DescriptorResource::CombinedImageSampler { view, layout, .. } => (view, layout),
                DescriptorResource::StorageImage { view, layout } => (view, layout),
                DescriptorResource::Buffer { .. } => continue,
            };
            let Some(texture) = backend.view_texture(view) else {
                continue;
            };
            if let Some(current) = self.layouts.get(&texture) {
                if *current != expected {
                    problems.push(format!(
                        "set {:?} binding {} samples {:?} in {:?}, expected {:?}",
                        set, binding, texture, current, expected
                    ));
                }
            }
        }
    }
}
