//! Scene viewer
//!
//! Opens a window with a floor, a ring of cubes, a sun and a spot light. The
//! logic thread spins the cubes and streams in one extra cube per second
//! until `--stream` cubes have arrived.
//!
//! ```text
//! cargo run --example viewer -- --deferred --msaa 1
//! cargo run --example viewer -- --config graphics.json --shader-dir shaders
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::{Mat4, Quat, Vec3, Vec4};
use vkengine::{EngineConfig, MaterialParams, MeshData, RenderResult, RenderSettings};

#[derive(Parser, Debug)]
#[command(name = "viewer", about = "vkengine scene viewer", version)]
struct Args {
    /// Graphics settings JSON (EnableShadowMap, MSAAMaxSamples, ...).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the shader variants.
    #[arg(long, default_value = "shaders")]
    shader_dir: PathBuf,

    /// Initial window width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Disable vertical sync (may cause tearing).
    #[arg(long)]
    no_vsync: bool,

    /// Use the deferred path.
    #[arg(long)]
    deferred: bool,

    /// Render a depth pre-pass.
    #[arg(long)]
    prepass: bool,

    /// Disable shadow maps.
    #[arg(long)]
    no_shadows: bool,

    /// Upper bound on MSAA samples.
    #[arg(long)]
    msaa: Option<u32>,

    /// Cubes streamed in by the logic thread.
    #[arg(long, default_value = "4")]
    stream: u64,
}

const RING: usize = 6;
const TICKS_PER_SECOND: u64 = 60;

fn settings(args: &Args) -> RenderResult<RenderSettings> {
    let mut settings = match &args.config {
        Some(path) => RenderSettings::from_file(path)?,
        None => RenderSettings::default(),
    };
    settings.enable_deferred |= args.deferred;
    settings.enable_z_prepass |= args.prepass;
    if args.no_shadows {
        settings.enable_shadow_map = false;
    }
    if let Some(samples) = args.msaa {
        settings.msaa_max_samples = samples;
    }
    settings.validate()
}

fn ring_transform(index: usize, angle: f32) -> Mat4 {
    let around = angle + index as f32 * std::f32::consts::TAU / RING as f32;
    Mat4::from_rotation_translation(
        Quat::from_rotation_y(angle * 2.0),
        Vec3::new(around.cos() * 4.0, 0.75, around.sin() * 4.0),
    )
}

fn main() {
    vkengine::init_logging();
    let args = Args::parse();

    let render = match settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Invalid graphics settings: {}", e);
            std::process::exit(1);
        }
    };
    let config = EngineConfig {
        title: "vkengine viewer".into(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        shader_dir: args.shader_dir.clone(),
        render,
    };
    let stream = args.stream;

    let result = vkengine::window::run(&config, move |engine| {
        let scene = Arc::clone(engine.scene());
        scene.add_camera("main", Vec3::new(0.0, 6.0, 10.0), Vec3::ZERO);
        scene.add_sun("sun", Vec3::new(-0.4, -1.0, -0.3), Vec3::ONE, 3.0);
        scene.add_spot(
            "spot",
            Vec3::new(3.0, 5.0, 3.0),
            Vec3::new(-0.5, -1.0, -0.5),
            Vec3::new(1.0, 0.8, 0.6),
            40.0,
            35f32.to_radians(),
        );

        scene.add_material("floor", &["pbr", "unlit"]).set_params(MaterialParams {
            color: Vec4::new(0.6, 0.6, 0.6, 1.0),
            roughness: 0.9,
            metallic: 0.0,
        });
        scene.add_material("cube", &["pbr", "unlit"]).set_params(MaterialParams {
            color: Vec4::new(0.8, 0.2, 0.1, 1.0),
            roughness: 0.4,
            metallic: 0.1,
        });

        let floor = Arc::new(MeshData::plane("floor", 20.0, 20.0, "floor"));
        engine.parse_mesh_data(&floor);
        scene.add_model("floor", vec![floor]);

        let cubes: Vec<Arc<MeshData>> = (0..RING)
            .map(|i| Arc::new(MeshData::cube(format!("cube {}", i), 1.0, "cube")))
            .collect();
        for cube in &cubes {
            engine.parse_mesh_data(cube);
        }
        let ring = scene.add_model("ring", cubes);

        engine.start_logic(Duration::from_millis(1000 / TICKS_PER_SECOND), move |tick| {
            let angle = tick.index as f32 / TICKS_PER_SECOND as f32;
            for (i, mesh) in ring.meshes().iter().enumerate() {
                mesh.set_transform(ring_transform(i, angle));
            }

            let second = tick.index / TICKS_PER_SECOND;
            if tick.index % TICKS_PER_SECOND == 0 && second >= 1 && second <= stream {
                let height = 1.5 + second as f32;
                let cube = MeshData::cube(format!("streamed {}", second), 0.5, "cube")
                    .with_transform(Mat4::from_translation(Vec3::new(0.0, height, 0.0)));
                let cube = Arc::new(cube);
                tick.uploads.enqueue(&cube);
                tick.scene.add_model("streamed", vec![cube]);
                log::info!("Streamed cube {} of {}", second, stream);
            }
        })
    });

    if let Err(e) = result {
        log::error!("Viewer failed: {}", e);
        std::process::exit(1);
    }
}
