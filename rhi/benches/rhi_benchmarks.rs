use std::sync::Arc;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use ember_rhi::backend::software::SoftwareBackend;
use ember_rhi::descriptors::{CpuDescriptorHeap, Descriptor, GpuDescriptorAllocator, HeapKind};
use ember_rhi::resources::HandleTable;
use ember_rhi::{
    BufferDescriptor, BufferHandle, BufferUsage, ColorTarget, RenderGraph, RenderPass, Renderer,
    RendererConfig, SwapchainDescriptor, TextureFormat,
};

fn software_renderer(config: RendererConfig) -> Renderer {
    let backend = SoftwareBackend::new().expect("software backend");
    Renderer::with_backend(Arc::new(backend), config).expect("renderer")
}

// ---------------------------------------------------------------------------
// Descriptors and handles
// ---------------------------------------------------------------------------

fn bench_gpu_descriptor_allocation(c: &mut Criterion) {
    c.bench_function("gpu_descriptors_alloc_copy_1024", |b| {
        let mut allocator = GpuDescriptorAllocator::new(4096, 256);
        b.iter(|| {
            allocator.reset();
            for _ in 0..1024 {
                let slot = allocator.alloc_view();
                allocator.copy_view(slot, &Descriptor::Null).unwrap();
            }
            black_box(allocator.views_allocated());
        });
    });
}

fn bench_cpu_descriptor_allocation(c: &mut Criterion) {
    c.bench_function("cpu_descriptors_alloc_1024", |b| {
        b.iter_batched(
            || CpuDescriptorHeap::new(HeapKind::View, 1024),
            |mut heap| {
                for _ in 0..1024 {
                    black_box(heap.allocate(Descriptor::Null).unwrap());
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_handle_table(c: &mut Criterion) {
    c.bench_function("handle_table_insert_get_1024", |b| {
        b.iter_batched(
            HandleTable::<BufferHandle, u64>::new,
            |mut table| {
                for i in 0..1024u64 {
                    let handle = table.insert(i).unwrap();
                    black_box(table.get(handle).unwrap());
                }
                table
            },
            BatchSize::SmallInput,
        );
    });
}

// ---------------------------------------------------------------------------
// Upload staging
// ---------------------------------------------------------------------------

fn bench_upload_staging(c: &mut Criterion) {
    let mut renderer = software_renderer(
        RendererConfig::default()
            .with_frame_count(2)
            .with_upload_ring_size(4 * 1024 * 1024),
    );
    let buffer = renderer
        .create_buffer(&BufferDescriptor::new(256, BufferUsage::UNIFORM), None)
        .expect("buffer");
    let payload = [0x5au8; 256];

    c.bench_function("upload_stage_64x256b_frame", |b| {
        b.iter(|| {
            renderer.begin_frame().unwrap();
            let cmd = renderer.begin_commands().unwrap();
            for _ in 0..64 {
                renderer.update_buffer(buffer, 0, &payload).unwrap();
            }
            renderer.end_commands(cmd).unwrap();
            black_box(renderer.submit(cmd).unwrap());
            renderer.end_frame().unwrap();
        });
    });
    renderer.shutdown().unwrap();
}

// ---------------------------------------------------------------------------
// Render graph
// ---------------------------------------------------------------------------

fn bench_graph_build(c: &mut Criterion) {
    let mut renderer = software_renderer(RendererConfig::default());
    let swapchain = renderer
        .create_swapchain(&SwapchainDescriptor::new(64, 64, TextureFormat::Rgba8Unorm))
        .expect("swapchain");

    c.bench_function("render_graph_build_compile_16_passes", |b| {
        b.iter(|| {
            let mut graph = RenderGraph::new();
            for i in 0..16 {
                graph.add_pass(
                    RenderPass::new(format!("pass_{i}"))
                        .with_color(ColorTarget::backbuffer(swapchain, [0.0, 0.0, 0.0, 1.0])),
                );
            }
            graph.compile().unwrap();
            black_box(&graph);
        });
    });
    renderer.shutdown().unwrap();
}

fn bench_graph_execute(c: &mut Criterion) {
    let mut renderer = software_renderer(RendererConfig::default());
    let swapchain = renderer
        .create_swapchain(
            &SwapchainDescriptor::new(64, 64, TextureFormat::Rgba8Unorm).with_depth_format(None),
        )
        .expect("swapchain");
    let mut graph = RenderGraph::new();
    for i in 0..4 {
        graph.add_pass(
            RenderPass::new(format!("pass_{i}"))
                .with_color(ColorTarget::backbuffer(swapchain, [0.1, 0.2, 0.3, 1.0])),
        );
    }

    c.bench_function("render_graph_execute_4_clear_passes_64x64", |b| {
        b.iter(|| black_box(graph.execute(&mut renderer, swapchain).unwrap()));
    });
    renderer.shutdown().unwrap();
}

criterion_group!(
    benches,
    bench_gpu_descriptor_allocation,
    bench_cpu_descriptor_allocation,
    bench_handle_table,
    bench_upload_staging,
    bench_graph_build,
    bench_graph_execute,
);

criterion_main!(benches);
