// =============================================================================
// VIEWPORT RENDERER - Reference frame producer
// =============================================================================
//
// Opens a window, builds the Vulkan backend and one presentation surface,
// then clears and presents the current back buffer every frame.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (resize, fullscreen key, minimize, close)     │
// │    └── PresentationSurface (swap chain + back-buffer ring)      │
// │          ├── VulkanDevice (queue + timeline completion fence)   │
// │          └── ImageViewRegistry (render-target views)            │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait until the command buffer of the current slot is free again
// 2. Record a clear of the current back buffer through its view
// 3. Submit, signalling the next timeline value
// 4. Tell the surface which fence value guards its buffers
// 5. Present (rotates the ring)
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

use viewport_renderer::backend::{ImageViewRegistry, VulkanDevice, VulkanSurface};
use viewport_renderer::config::Config;
use viewport_renderer::{CompletionTracker, PresentationSurface};

type Surface = PresentationSurface<VulkanDevice, ImageViewRegistry>;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    // Initialize logging
    init_logging(&config);
    log::info!("Starting viewport renderer");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Surface: {} buffers, {:?}, {:?}",
        config.surface.buffer_count,
        config.surface.pixel_format,
        config.surface.present_mode
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging with optional file output
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    // The log goes to the file instead of stderr if enabled
    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to open {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Create/clear the log file and write its header
fn open_log_file(path: impl AsRef<Path>) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    writeln!(file, "=== Viewport Renderer Log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;
    Ok(file)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Vulkan objects that exist while the window is open.
///
/// IMPORTANT: Field order matters for Drop! The surface goes before the
/// registry that holds its views and the device everything came from.
struct Gpu {
    surface: Surface,
    command_pool: vk::CommandPool,
    /// One command buffer per ring slot
    command_buffers: Vec<vk::CommandBuffer>,
    /// Timeline value of the last submission that used each command buffer
    slot_fence_values: Vec<u64>,
    registry: Arc<ImageViewRegistry>,
    device: Arc<VulkanDevice>,
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    gpu: Option<Gpu>,
    is_fullscreen: bool,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let is_fullscreen = config.window.fullscreen;
        let now = Instant::now();
        Self {
            config,
            window: None,
            gpu: None,
            is_fullscreen,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<Gpu> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&self.config.window.title, enable_validation)?;
        let registry = Arc::new(ImageViewRegistry::new(&device));
        let native_surface = VulkanSurface::new(&device, window.clone())?;

        let size = window.inner_size();
        let mut desc = self.config.surface_desc();
        desc.width = size.width.max(1);
        desc.height = size.height.max(1);

        let surface = PresentationSurface::create(
            device.clone(),
            registry.clone(),
            native_surface,
            desc,
        )
        .context("Failed to create presentation surface")?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.graphics_queue_family)
            // RESET: command buffers are re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.device.create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(surface.buffer_count());
        let command_buffers = unsafe { device.device.allocate_command_buffers(&alloc_info)? };
        let slot_fence_values = vec![0; command_buffers.len()];

        log::info!("Vulkan initialized successfully!");
        Ok(Gpu {
            surface,
            command_pool,
            command_buffers,
            slot_fence_values,
            registry,
            device,
        })
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render and present a single frame.
    ///
    /// Returns Ok(false) when nothing was presented (minimized, or the
    /// swapchain had to be rebuilt first).
    fn render_frame(&mut self) -> Result<bool> {
        let clear_color = self.config.surface.clear_color;
        let gpu = match self.gpu.as_mut() {
            Some(gpu) => gpu,
            None => return Ok(false),
        };

        if !gpu.surface.should_present() {
            return Ok(false);
        }

        let Some(semaphores) = gpu.surface.swap_chain().frame_semaphores() else {
            // Out of date at the same size, or out of rotation: a resize
            // would be a no-op, so rebuild in place and render next frame
            gpu.surface.rebuild()?;
            gpu.slot_fence_values.iter_mut().for_each(|value| *value = 0);
            return Ok(false);
        };

        let device = &gpu.device;
        let slot = gpu.surface.current_index() as usize;
        let cmd = gpu.command_buffers[slot];

        // The command buffer of this slot may still be executing
        device.timeline.wait_for(gpu.slot_fence_values[slot])?;

        let image = *gpu.surface.current_buffer();
        let view = gpu
            .registry
            .resolve(gpu.surface.current_view())
            .context("Current back buffer has no view")?;
        let extent = gpu.surface.swap_chain().extent();

        unsafe {
            device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            record_clear(&device.device, cmd, image, view, extent, clear_color)?;
        }

        // ─────────────────────────────────────────────────────────────────────
        // Submit: wait for the acquired image, signal present + timeline
        // ─────────────────────────────────────────────────────────────────────
        let fence_value = device.timeline.next_value();

        let wait_semaphores = [semaphores.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let wait_values = [0];
        let signal_semaphores = [semaphores.render_finished, device.timeline.semaphore()];
        let signal_values = [0, fence_value];
        let command_buffers = [cmd];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info.build()], vk::Fence::null())?;
        }

        gpu.slot_fence_values[slot] = fence_value;
        gpu.surface.mark_used(fence_value);

        gpu.surface.present()
    }

    // =========================================================================
    // SURFACE CHANGES
    // =========================================================================

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<()> {
        let is_fullscreen = self.is_fullscreen;
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };

        // Minimized: keep the buffers, stop presenting
        if width == 0 || height == 0 {
            gpu.surface.set_should_present(false);
            return Ok(());
        }

        let format = gpu.surface.desc().format;
        let rebuilt = gpu.surface.resize(width, height, is_fullscreen, format)?;
        gpu.surface.set_should_present(true);

        // New ring, fresh fence history. A kept ring keeps its values: those
        // submissions may still be in flight.
        if rebuilt {
            gpu.slot_fence_values.iter_mut().for_each(|value| *value = 0);
        }
        Ok(())
    }

    fn toggle_fullscreen(&mut self) -> Result<()> {
        self.is_fullscreen = !self.is_fullscreen;
        let is_fullscreen = self.is_fullscreen;

        if let Some(gpu) = self.gpu.as_mut() {
            let desc = *gpu.surface.desc();
            gpu.surface.resize(desc.width, desc.height, is_fullscreen, desc.format)?;
        }
        Ok(())
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                let mode = if self.is_fullscreen { "fullscreen" } else { "windowed" };
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms) [{}]",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                    mode
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }

    fn shutdown(&mut self) {
        let Some(gpu) = self.gpu.take() else {
            return;
        };
        log::info!("Cleaning up Vulkan resources...");

        let Gpu {
            surface,
            command_pool,
            registry,
            device,
            ..
        } = gpu;

        // The native surface outlives every swap chain built on it
        let native_surface = surface.surface_handle().clone();

        // Drains the timeline before releasing the ring
        if let Err(e) = surface.destroy() {
            log::error!("Failed to destroy presentation surface: {:?}", e);
        }

        let _ = device.wait_idle();
        unsafe {
            device.device.destroy_command_pool(command_pool, None);
        }
        native_surface.destroy(&device);
        drop(registry);

        log::info!("Cleanup complete");
    }
}

/// Record a full-image clear through the back buffer's render-target view.
unsafe fn record_clear(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    color: [f32; 4],
) -> Result<()> {
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    device.begin_command_buffer(
        cmd,
        &vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
    )?;

    // UNDEFINED -> COLOR_ATTACHMENT (previous contents are discarded)
    let to_attachment = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[to_attachment],
    );

    let color_attachment = vk::RenderingAttachmentInfo::builder()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        })
        .build();
    let color_attachments = [color_attachment];

    let rendering_info = vk::RenderingInfo::builder()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments);

    device.cmd_begin_rendering(cmd, &rendering_info);
    device.cmd_end_rendering(cmd);

    // COLOR_ATTACHMENT -> PRESENT_SRC
    let to_present = vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .dst_access_mask(vk::AccessFlags::empty())
        .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range)
        .build();

    device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[to_present],
    );

    device.end_command_buffer(cmd)?;
    Ok(())
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        // Full-screen state is applied by the swap chain
        match self.init_vulkan(window.clone()) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Err(e) = self.resize_surface(size.width, size.height) {
                    log::error!("Failed to resize surface: {:?}", e);
                    self.shutdown();
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(true) => self.update_fps(),
                Ok(false) => {}
                Err(e) => log::error!("Render error: {:?}", e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        let name = format!("{:?}", key);
                        if name == self.config.controls.quit_key || key == KeyCode::Escape {
                            log::info!("{} pressed, exiting...", name);
                            self.shutdown();
                            event_loop.exit();
                        } else if name == self.config.controls.fullscreen_key {
                            if let Err(e) = self.toggle_fullscreen() {
                                log::error!("Failed to switch fullscreen: {:?}", e);
                            }
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws for maximum FPS.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_truncated_and_takes_log_lines() {
        let path = std::env::temp_dir().join(format!("viewport_log_{}.log", std::process::id()));
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "[INFO] surface created").unwrap();
        drop(file);

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(contents.starts_with("=== Viewport Renderer Log ==="));
        assert!(contents.contains("[INFO] surface created"));
        assert!(!contents.contains("stale"));
    }
}
