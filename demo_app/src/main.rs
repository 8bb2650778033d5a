//! Instancing demo
//!
//! Builds a small scene on the headless device and runs a handful of
//! frames, logging the indirect draw stream each frame. Run with
//! `RUST_LOG=debug` to watch buffer and descriptor traffic.

use instanced_render::assets::{MeshAsset, SubMesh};
use instanced_render::gfx::TextureId;
use instanced_render::prelude::*;

fn register_rock(
    renderer: &mut Renderer,
    library: &mut MeshLibrary,
    material: MaterialHandle,
) -> Result<AssetId, RenderError> {
    // Two sub-meshes sharing one vertex block: a body and a detail shell.
    let vertices = vec![0u8; 36 * 32];
    let indices = vec![0u8; 48 * 4];
    let vertex_block = renderer.upload_geometry(BufferKind::Vertex, &vertices, 32)?;
    let index_block = renderer.upload_geometry(BufferKind::Index, &indices, 4)?;
    Ok(library.insert(MeshAsset {
        submeshes: vec![
            SubMesh {
                index_offset: index_block.offset(),
                index_count: 36,
                vertex_offset: vertex_block.offset(),
                material,
            },
            SubMesh {
                index_offset: index_block.offset() + 36 * 4,
                index_count: 12,
                vertex_offset: vertex_block.offset(),
                material,
            },
        ],
        vertex_stride: 32,
        index_stride: 4,
        bone_count: 0,
        bone_table: None,
    }))
}

fn register_crawler(
    renderer: &mut Renderer,
    library: &mut MeshLibrary,
    material: MaterialHandle,
) -> Result<AssetId, RenderError> {
    let vertices = vec![0u8; 64 * 48];
    let indices = vec![0u8; 90 * 4];
    let vertex_block = renderer.upload_geometry(BufferKind::Vertex, &vertices, 48)?;
    let index_block = renderer.upload_geometry(BufferKind::Index, &indices, 4)?;
    Ok(library.insert(MeshAsset {
        submeshes: vec![SubMesh {
            index_offset: index_block.offset(),
            index_count: 90,
            vertex_offset: vertex_block.offset(),
            material,
        }],
        vertex_stride: 48,
        index_stride: 4,
        bone_count: 8,
        bone_table: None,
    }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let limits = RenderLimits::default();
    let device = HeadlessDevice::new(limits.frames_in_flight);
    let mut renderer = Renderer::new(Box::new(device), limits)?;
    let mut library = MeshLibrary::new();

    let albedo = renderer.register_texture(TextureId(1));
    let normal = renderer.register_texture(TextureId(2));
    let rock_material = renderer.create_material();
    renderer.update_material(rock_material, [0.45, 0.42, 0.38, 1.0], albedo, normal);
    let crawler_material = renderer.create_material();
    renderer.update_material(crawler_material, [0.2, 0.55, 0.3, 1.0], albedo, normal);

    let rock = register_rock(&mut renderer, &mut library, rock_material)?;
    let crawler = register_crawler(&mut renderer, &mut library, crawler_material)?;

    let mut rocks = Vec::new();
    for i in 0..5 {
        let position = Vec3::new(i as f32 * 3.0, 0.0, 0.0);
        rocks.push(renderer.create_instance(
            &library,
            MeshArchetype::Static,
            rock,
            Transform::from_position(position),
            ViewMask::ALL,
        )?);
    }
    let walker = renderer.create_instance(
        &library,
        MeshArchetype::Skeletal,
        crawler,
        Transform::from_position(Vec3::new(0.0, 0.0, 5.0)),
        ViewMask::ALL,
    )?;

    let camera = renderer.create_view("main", ViewMask::ALL)?;
    renderer.update_view(
        camera,
        &Mat4::identity(),
        &Mat4::new_perspective(16.0 / 9.0, 1.2, 0.1, 500.0),
        Vec3::new(0.0, 4.0, -10.0),
    )?;

    for tick in 0u32..8 {
        // Wiggle one rock and the crawler's root bone each tick.
        let t = tick as f32 * 0.25;
        renderer.set_transform(
            MeshArchetype::Static,
            rocks[0],
            Transform::from_position(Vec3::new(t.sin() * 2.0, 0.0, 0.0)),
        );
        let palette: Vec<Mat4> = (0..8)
            .map(|bone| Mat4::new_translation(&Vec3::new(0.0, (t + bone as f32).sin(), 0.0)))
            .collect();
        renderer.set_bone_palette(walker, &palette)?;

        if tick == 5 {
            renderer.destroy_instance(MeshArchetype::Static, rocks.pop().expect("rocks remain"));
        }

        let frame = renderer.render_frame()?;
        let stats = renderer.stats();
        log::info!(
            "frame {tick} (slot {}): {} instances, {} draw calls",
            frame.get(),
            stats.live_instances,
            stats.draw_calls
        );
    }

    println!(
        "done: {} live instances, {} draw calls in the last frame",
        renderer.stats().live_instances,
        renderer.stats().draw_calls
    );
    Ok(())
}
