// =============================================================================
// LAVA - minimal Vulkan mesh renderer
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (App)                                         │
// │    └── Renderer (render pass, pipeline, buffers, frame loop)    │
// │          └── VulkanDevice + Swapchain (backend/)                │
// │                └── Command buffers, one per frame slot          │
// │                      └── FrameSync (fences, semaphores)         │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. about_to_wait requests a redraw
// 2. RedrawRequested -> Renderer::draw_frame
// 3. Resize events are only recorded; the swapchain is rebuilt lazily
//
// =============================================================================

mod backend;
mod config;
mod mesh;
mod renderer;

use anyhow::Result;
use config::Config;
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Logging depends on the config, so report where it came from afterwards
    let (config, source) = Config::load(config::CONFIG_PATH);

    init_logging(&config);
    source.log(&config);
    log::info!("Starting Lava");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable { "resizable" } else { "fixed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("Renderer stopped after an error, see the log above");
    }
    Ok(())
}

/// Initialize logging, optionally redirected to the configured log file
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env, Target};

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "=== Lava Log ===");
                let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
                let _ = writeln!(file);
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!(
                    "Warning: could not open log file {}: {}",
                    config.debug.log_file, e
                );
            }
        }
    }

    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,

    // Dropped before the window; the surface must not outlive it
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// Set when the loop exits because of an error rather than a close
    failed: bool,

    // FPS tracking
    frame_count: u32,
    last_frame_time: Instant,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            renderer: None,
            window: None,
            failed: false,
            frame_count: 0,
            last_frame_time: now,
            last_fps_update: now,
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(ref renderer) = self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::error!("Failed to wait for device idle: {:?}", e);
            }
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop) {
        self.failed = true;
        self.shutdown(event_loop);
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
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
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
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.fail(event_loop);
                return;
            }
        };

        match Renderer::new(&self.config, &window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                self.fail(event_loop);
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(ref mut renderer) = self.renderer {
                    renderer.resize(size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                let Some(ref mut renderer) = self.renderer else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(true) => self.update_fps(),
                    Ok(false) => {}
                    Err(e) => {
                        log::error!("Render error: {:?}", e);
                        self.fail(event_loop);
                    }
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // Tear down Vulkan while the window still exists
        self.renderer = None;
    }
}
