// =============================================================================
// RENDERER - GPU objects and the per-frame loop
// =============================================================================
//
// FRAME FLOW (draw_frame):
// 1. Wait for the fence of the slot about to be reused
// 2. Acquire the next swapchain image (signals the slot's acquire semaphore)
// 3. If another slot rendered to that image last, wait on its fence too
// 4. Reset the slot fence, re-record the slot's command buffer
// 5. Submit: wait acquire -> signal release + slot fence
// 6. Present waiting on the release semaphore
// 7. Advance to the next slot
//
// =============================================================================

use crate::backend::buffer::{DepthImage, GpuBuffer};
use crate::backend::frame::{FrameTracker, SurfaceState};
use crate::backend::sync::FrameSync;
use crate::backend::{pipeline, shader, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::mesh::Mesh;
use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::Arc;
use std::time::Instant;
use winit::window::Window;

/// Radians per second around the Y axis for loaded meshes
const ROTATION_SPEED: f32 = 0.8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PushConstants {
    mvp: [[f32; 4]; 4],
    model: [[f32; 4]; 4],
}

/// Owns every Vulkan object the application creates.
///
/// Raw handles are destroyed in `Drop`; the RAII wrappers (swapchain, depth
/// image, buffers) each hold an `Arc<VulkanDevice>`, so the device outlives
/// all of them.
pub struct Renderer {
    device: Arc<VulkanDevice>,

    // Swapchain-dependent, rebuilt on resize
    swapchain: Option<Swapchain>,
    depth: Option<DepthImage>,
    framebuffers: Vec<vk::Framebuffer>,

    // Built once
    color_format: vk::Format,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    index_count: u32,

    // One command buffer and one sync triple per frame slot
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    frame_sync: Vec<FrameSync>,
    frames: FrameTracker,

    preferred_present_mode: vk::PresentModeKHR,
    clear_color: [f32; 4],
    surface_state: SurfaceState,

    camera_distance: f32,
    spin: bool,
    start: Instant,
}

impl Renderer {
    pub fn new(config: &Config, window: &Window) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let device = VulkanDevice::new(&config.window.title, enable_validation, window)?;

        let mesh = match &config.assets.mesh {
            Some(path) => Mesh::load_obj(path)?,
            None => {
                log::info!("No mesh configured, drawing the built-in triangle");
                Mesh::triangle()
            }
        };

        let vertex_buffer = GpuBuffer::with_data(
            device.clone(),
            "vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = GpuBuffer::with_data(
            device.clone(),
            "indices",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;

        let size = window.inner_size();
        let window_extent = if size.width == 0 || size.height == 0 {
            vk::Extent2D {
                width: config.window.width,
                height: config.window.height,
            }
        } else {
            vk::Extent2D {
                width: size.width,
                height: size.height,
            }
        };

        let preferred_present_mode = config.preferred_present_mode();
        let swapchain = Swapchain::new(
            device.clone(),
            preferred_present_mode,
            window_extent.width,
            window_extent.height,
        )?;

        let frames_in_flight = config.frames_in_flight();
        let image_count = swapchain.images.len();

        // Everything below owns raw handles; once `renderer` exists, an
        // early return cleans up through Drop (destroying a null handle is
        // a no-op).
        let mut renderer = Self {
            device,
            swapchain: None,
            depth: None,
            framebuffers: Vec::new(),
            color_format: swapchain.format,
            render_pass: vk::RenderPass::null(),
            pipeline: vk::Pipeline::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            frame_sync: Vec::new(),
            frames: FrameTracker::new(frames_in_flight, image_count),
            preferred_present_mode,
            clear_color: config.graphics.clear_color,
            surface_state: SurfaceState::new(window_extent),
            camera_distance: (mesh.bounding_radius() * 2.5).max(1.5),
            spin: config.assets.mesh.is_some(),
            start: Instant::now(),
        };

        renderer.render_pass = pipeline::create_render_pass(&renderer.device, renderer.color_format)?;
        renderer.create_pipeline(config)?;
        renderer.attach_swapchain(swapchain)?;
        renderer.create_frame_resources(frames_in_flight)?;

        log::info!(
            "Vulkan initialized: {} indices, {} frames in flight",
            renderer.index_count,
            renderer.frames.frames_in_flight()
        );
        Ok(renderer)
    }

    fn create_pipeline(&mut self, config: &Config) -> Result<()> {
        let vert = shader::load_shader_module(&self.device, &config.assets.vertex_shader)?;
        let frag = match shader::load_shader_module(&self.device, &config.assets.fragment_shader) {
            Ok(frag) => frag,
            Err(e) => {
                unsafe { self.device.device.destroy_shader_module(vert, None) };
                return Err(e);
            }
        };

        let result = pipeline::create_graphics_pipeline(&self.device, self.render_pass, vert, frag);

        unsafe {
            self.device.device.destroy_shader_module(vert, None);
            self.device.device.destroy_shader_module(frag, None);
        }

        let (pipeline, layout) = result?;
        self.pipeline = pipeline;
        self.pipeline_layout = layout;
        Ok(())
    }

    /// Depth image and framebuffers for a freshly created swapchain
    fn attach_swapchain(&mut self, swapchain: Swapchain) -> Result<()> {
        if swapchain.format != self.color_format {
            anyhow::bail!(
                "Surface format changed from {:?} to {:?}",
                self.color_format,
                swapchain.format
            );
        }

        let depth = DepthImage::new(self.device.clone(), swapchain.extent)?;
        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &swapchain.image_views,
            depth.view,
            self.render_pass,
            swapchain.extent,
        )?;

        self.frames.reset_images(swapchain.images.len());
        self.depth = Some(depth);
        self.swapchain = Some(swapchain);
        Ok(())
    }

    fn create_frame_resources(&mut self, frames_in_flight: usize) -> Result<()> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(self.device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        self.command_pool = unsafe { self.device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(frames_in_flight as u32);

        self.command_buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        for _ in 0..frames_in_flight {
            let sync = FrameSync::new(&self.device)?;
            self.frame_sync.push(sync);
        }

        Ok(())
    }

    /// Note a new window size; the swapchain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface_state.resize(width, height);
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        let extent = self.surface_state.extent();

        // Nothing may still reference the old images or framebuffers
        self.device.wait_idle()?;

        pipeline::destroy_framebuffers(&self.device, &self.framebuffers);
        self.framebuffers.clear();
        self.depth = None;
        // The surface can only have one swapchain at a time
        self.swapchain = None;

        let swapchain = Swapchain::new(
            self.device.clone(),
            self.preferred_present_mode,
            extent.width,
            extent.height,
        )?;
        self.attach_swapchain(swapchain)?;

        self.surface_state.recreated();
        Ok(())
    }

    /// Render a single frame. Returns `false` when the frame was skipped
    /// (minimised window, out-of-date swapchain).
    pub fn draw_frame(&mut self) -> Result<bool> {
        if self.surface_state.should_skip() {
            return Ok(false);
        }

        if self.surface_state.should_recreate() {
            self.recreate_swapchain()?;
        }

        let slot = self.frames.current();
        let sync = self.frame_sync[slot];
        let device = &self.device.device;

        // STEP 1: bound the number of frames in flight
        sync.wait(device)?;

        // STEP 2: acquire
        let swapchain = self.swapchain.as_ref().context("Swapchain not initialized")?;
        let acquired = swapchain.acquire_next_image(u64::MAX, sync.image_available)?;
        let Some(image_index) = self.surface_state.on_acquire(acquired) else {
            // The slot fence is still signalled, so skipping is safe
            log::debug!("Swapchain out of date, recreating");
            return Ok(false);
        };

        // STEP 3: the image may still be in use by another slot's frame
        if let Some(previous) = self.frames.claim_image(image_index, sync.in_flight_fence) {
            unsafe { device.wait_for_fences(&[previous], true, u64::MAX) }
                .context("Failed to wait for image fence")?;
        }

        // STEP 4: only reset once we are certain to submit
        unsafe { device.reset_fences(&[sync.in_flight_fence]) }
            .context("Failed to reset in-flight fence")?;

        let cmd = self.command_buffers[slot];
        let framebuffer = self.framebuffers[image_index as usize];
        self.record_commands(cmd, framebuffer, swapchain.extent)?;

        // STEP 5: submit
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")?;

        // STEP 6: present
        let needs_recreate =
            swapchain.present(self.device.present_queue, image_index, &signal_semaphores)?;
        self.surface_state.on_present(needs_recreate);

        // STEP 7
        self.frames.advance();

        Ok(true)
    }

    fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let device = &self.device.device;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];

        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let push_constants = self.push_constants(extent);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            // The render pass moves the image UNDEFINED -> COLOR_ATTACHMENT
            // on begin and COLOR_ATTACHMENT -> PRESENT_SRC on end.
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_push_constants(
                cmd,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                bytemuck::bytes_of(&push_constants),
            );
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);

            device.cmd_end_render_pass(cmd);

            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }

        Ok(())
    }

    fn push_constants(&self, extent: vk::Extent2D) -> PushConstants {
        let model = if self.spin {
            Mat4::from_rotation_y(self.start.elapsed().as_secs_f32() * ROTATION_SPEED)
        } else {
            Mat4::IDENTITY
        };
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, self.camera_distance), Vec3::ZERO, Vec3::Y);
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut projection =
            Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, self.camera_distance * 4.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;

        PushConstants {
            mvp: (projection * view * model).to_cols_array_2d(),
            model: model.to_cols_array_2d(),
        }
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        let _ = self.device.wait_idle();

        let device = &self.device.device;
        unsafe {
            for sync in &self.frame_sync {
                sync.destroy(device);
            }
            // Also frees the command buffers
            device.destroy_command_pool(self.command_pool, None);

            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
        }

        pipeline::destroy_framebuffers(&self.device, &self.framebuffers);
        self.framebuffers.clear();
        self.depth = None;

        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }

        // Image views first, then the swapchain itself
        self.swapchain = None;

        log::info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constants_fill_the_pipeline_range() {
        assert_eq!(
            std::mem::size_of::<PushConstants>() as u32,
            pipeline::PUSH_CONSTANT_SIZE
        );
    }
}
