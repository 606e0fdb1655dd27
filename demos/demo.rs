//! # Deferred Renderer Demo
//!
//! Opens a window and renders a small PBR scene with the chosen pipeline
//! variant:
//! - Ground plane, cube, sphere, torus, cylinder and cone with different materials
//! - One directional sun light
//! - A ring of coloured point lights
//!
//! Run with `cargo run --example demo -- --variant advanced`.
//! Number keys 1-7 switch debug views, Tab toggles the orbit camera.

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use glam::{Quat, Vec3};

use deferred_renderer::backend::BackendResult;
use deferred_renderer::backend::vulkan::VulkanBackend;
use deferred_renderer::resources::{Material, MeshData, TextureData};
use deferred_renderer::scene::{Camera, DirectionalLight, DrawItem, PointLight, Scene, Transform};
use deferred_renderer::{DebugView, Engine, EngineConfig, PipelineVariant, TonemapOperator};

const RING_LIGHTS: usize = 16;

#[derive(Parser, Debug)]
#[command(about = "Render a PBR test scene")]
struct Args {
    /// forward, deferred or advanced
    #[arg(long, default_value = "deferred")]
    variant: PipelineVariant,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long, default_value = "final")]
    debug_view: DebugView,

    /// reinhard, aces, uncharted2 or none
    #[arg(long, default_value = "aces")]
    tonemap: TonemapOperator,

    #[arg(long, default_value_t = 1.0)]
    exposure: f32,

    #[arg(long, default_value = "shaders")]
    shader_dir: PathBuf,

    /// Present without waiting for vertical blank when supported
    #[arg(long)]
    no_vsync: bool,

    #[arg(long)]
    validation: bool,
}

fn build_scene(engine: &mut Engine<VulkanBackend>) -> BackendResult<()> {
    let plane = engine.upload_mesh(&MeshData::plane(30.0, 30.0, 4))?;
    let cube = engine.upload_mesh(&MeshData::cube())?;
    let sphere = engine.upload_mesh(&MeshData::sphere(48, 24))?;
    let torus = engine.upload_mesh(&MeshData::torus(1.0, 0.3, 48, 16))?;
    let cylinder = engine.upload_mesh(&MeshData::cylinder(0.4, 1.5, 32))?;
    let cone = engine.upload_mesh(&MeshData::cone(0.5, 1.2, 32))?;

    let checker = engine.upload_texture(&TextureData::checkerboard(
        256,
        32,
        [200, 200, 200, 255],
        [90, 90, 90, 255],
    ))?;
    let ground = engine.create_material(
        &Material::new("ground")
            .with_albedo_texture(checker)
            .with_roughness(0.9),
    )?;
    let red = engine.create_material(&Material::plastic(Vec3::new(0.8, 0.1, 0.1)))?;
    let gold = engine.create_material(&Material::gold())?;
    let silver = engine.create_material(&Material::metal(Vec3::splat(0.9), 0.25))?;
    let blue = engine.create_material(&Material::plastic(Vec3::new(0.1, 0.2, 0.8)))?;
    let green = engine.create_material(&Material::rubber(Vec3::new(0.1, 0.7, 0.2)))?;

    let mut scene = Scene::new();
    scene.camera = Camera::new(Vec3::new(0.0, 3.0, 8.0), Vec3::ZERO);
    scene.directional_light = DirectionalLight::new(
        Vec3::new(0.3, -1.0, 0.5),
        Vec3::new(1.0, 0.95, 0.9),
        2.0,
    );

    scene.add_item(DrawItem::new(plane, ground));
    scene.add_item(DrawItem::new(cube, red).with_position(Vec3::new(-3.0, 1.0, 0.0)));
    scene.add_item(DrawItem::new(sphere, gold).with_position(Vec3::new(0.0, 1.0, 0.0)));
    scene.add_item(
        DrawItem::new(torus, silver).with_transform(
            Transform::from_position(Vec3::new(3.0, 1.0, 0.0))
                .with_rotation(Quat::from_rotation_x(TAU / 4.0)),
        ),
    );

    scene.add_item(
        DrawItem::new(cube, blue)
            .with_position(Vec3::new(-1.5, 0.4, 2.5))
            .with_scale(Vec3::splat(0.4)),
    );
    scene.add_item(
        DrawItem::new(sphere, green)
            .with_position(Vec3::new(1.5, 0.5, 2.5))
            .with_scale(Vec3::splat(0.5)),
    );
    scene.add_item(DrawItem::new(cylinder, silver).with_position(Vec3::new(-3.0, 0.75, -3.0)));
    scene.add_item(DrawItem::new(cone, red).with_position(Vec3::new(3.0, 0.6, -3.0)));

    for i in 0..RING_LIGHTS {
        let angle = i as f32 / RING_LIGHTS as f32 * TAU;
        let hue = i as f32 / RING_LIGHTS as f32;
        let color = Vec3::new(
            0.5 + 0.5 * (hue * TAU).cos(),
            0.5 + 0.5 * ((hue + 1.0 / 3.0) * TAU).cos(),
            0.5 + 0.5 * ((hue + 2.0 / 3.0) * TAU).cos(),
        );
        scene.add_point_light(PointLight::new(
            Vec3::new(6.0 * angle.cos(), 0.75, 6.0 * angle.sin()),
            color,
            4.0,
            5.0,
        ));
    }

    engine.set_scene(scene);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = EngineConfig::default()
        .with_title(format!("Deferred Renderer - {}", args.variant))
        .with_variant(args.variant)
        .with_debug_view(args.debug_view)
        .with_tonemap(args.tonemap, args.exposure)
        .with_shader_dir(args.shader_dir)
        .with_vsync(!args.no_vsync)
        .with_validation(args.validation || cfg!(debug_assertions));

    log::info!("Starting {} renderer", args.variant);
    match deferred_renderer::window::run(config, args.frames, build_scene) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
