// Frame-in-flight bookkeeping
//
// Two independent rings meet here: the frame slots we cycle through
// (bounded by `frames_in_flight`) and the swapchain images the presentation
// engine hands back in whatever order it likes. An image can come back
// while a frame from another slot is still rendering into it, so each image
// remembers the fence of the last slot that used it.

use ash::vk;

#[derive(Debug)]
pub struct FrameTracker {
    frames_in_flight: usize,
    current: usize,
    images_in_flight: Vec<vk::Fence>,
}

impl FrameTracker {
    pub fn new(frames_in_flight: usize, image_count: usize) -> Self {
        assert!(frames_in_flight > 0, "need at least one frame in flight");
        Self {
            frames_in_flight,
            current: 0,
            images_in_flight: vec![vk::Fence::null(); image_count],
        }
    }

    /// Slot index for the frame being built
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Move to the next slot, wrapping around
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Hand `image_index` to the slot guarded by `fence`.
    ///
    /// Returns the fence the caller must wait on before writing the image:
    /// the fence of a *different* slot that rendered to it last. The current
    /// slot's own fence has already been waited on, so it is never returned.
    pub fn claim_image(&mut self, image_index: u32, fence: vk::Fence) -> Option<vk::Fence> {
        let owner = &mut self.images_in_flight[image_index as usize];
        let previous = std::mem::replace(owner, fence);

        if previous == vk::Fence::null() || previous == fence {
            None
        } else {
            Some(previous)
        }
    }

    /// Forget image ownership after the swapchain was recreated.
    ///
    /// Callers wait for device idle first, so no fence is outstanding.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, vk::Fence::null());
    }
}

/// Window size plus the two flags that decide whether a frame is drawn.
///
/// Resize events and swapchain results only set flags here; the renderer
/// acts on them at the start of the next frame.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceState {
    extent: vk::Extent2D,
    minimized: bool,
    needs_recreate: bool,
}

impl SurfaceState {
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            minimized: extent.width == 0 || extent.height == 0,
            needs_recreate: false,
        }
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// A zero-sized window is minimised; anything else needs a new swapchain
    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        if width == 0 || height == 0 {
            self.minimized = true;
        } else {
            self.minimized = false;
            self.needs_recreate = true;
        }
    }

    /// Nothing can be presented to a minimised window
    pub fn should_skip(&self) -> bool {
        self.minimized
    }

    pub fn should_recreate(&self) -> bool {
        self.needs_recreate && !self.minimized
    }

    pub fn recreated(&mut self) {
        self.needs_recreate = false;
    }

    /// Fold an acquire result into the state.
    ///
    /// Returns the image to render into, or `None` when the frame has to be
    /// skipped because the swapchain is out of date. Callers must skip
    /// before resetting the slot fence so the next wait does not block.
    pub fn on_acquire(&mut self, acquired: Option<(u32, bool)>) -> Option<u32> {
        match acquired {
            Some((image_index, suboptimal)) => {
                if suboptimal {
                    self.needs_recreate = true;
                }
                Some(image_index)
            }
            None => {
                self.needs_recreate = true;
                None
            }
        }
    }

    pub fn on_present(&mut self, needs_recreate: bool) {
        if needs_recreate {
            self.needs_recreate = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    #[test]
    fn slots_rotate_round_robin() {
        let mut tracker = FrameTracker::new(2, 3);
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(tracker.current());
            tracker.advance();
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn single_slot_never_moves() {
        let mut tracker = FrameTracker::new(1, 2);
        tracker.advance();
        tracker.advance();
        assert_eq!(tracker.current(), 0);
    }

    #[test]
    fn fresh_image_needs_no_wait() {
        let mut tracker = FrameTracker::new(2, 3);
        assert_eq!(tracker.claim_image(0, fence(1)), None);
        assert_eq!(tracker.claim_image(1, fence(2)), None);
    }

    #[test]
    fn image_reused_by_other_slot_waits_on_previous_fence() {
        let mut tracker = FrameTracker::new(2, 3);
        tracker.claim_image(2, fence(1));

        // slot 1 gets image 2 back while slot 0 may still be rendering to it
        assert_eq!(tracker.claim_image(2, fence(2)), Some(fence(1)));
        // ownership moved to slot 1
        assert_eq!(tracker.claim_image(2, fence(1)), Some(fence(2)));
    }

    #[test]
    fn image_reused_by_same_slot_needs_no_extra_wait() {
        let mut tracker = FrameTracker::new(2, 2);
        tracker.claim_image(1, fence(7));
        assert_eq!(tracker.claim_image(1, fence(7)), None);
    }

    #[test]
    fn reset_forgets_owners_and_resizes() {
        let mut tracker = FrameTracker::new(2, 2);
        tracker.claim_image(0, fence(1));
        tracker.claim_image(1, fence(2));

        tracker.reset_images(4);
        assert_eq!(tracker.claim_image(0, fence(2)), None);
        assert_eq!(tracker.claim_image(3, fence(1)), None);
    }

    #[test]
    fn full_loop_with_more_images_than_slots() {
        // 2 slots, 3 images handed out in order: 0, 1, 2, 0, 1, 2
        let fences = [fence(10), fence(20)];
        let mut tracker = FrameTracker::new(2, 3);
        let mut waits = Vec::new();

        for frame in 0..6u32 {
            let slot_fence = fences[tracker.current()];
            waits.push(tracker.claim_image(frame % 3, slot_fence));
            tracker.advance();
        }

        assert_eq!(
            waits,
            vec![
                None,
                None,
                None,
                // image 0 was slot 0's; frame 3 runs on slot 1
                Some(fence(10)),
                // image 1 was slot 1's; frame 4 runs on slot 0
                Some(fence(20)),
                // image 2 was slot 0's; frame 5 runs on slot 1
                Some(fence(10)),
            ]
        );
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn fresh_surface_draws_without_recreation() {
        let state = SurfaceState::new(extent(800, 600));
        assert!(!state.should_skip());
        assert!(!state.should_recreate());
    }

    #[test]
    fn minimised_window_skips_frames_until_restored() {
        let mut state = SurfaceState::new(extent(800, 600));

        state.resize(0, 0);
        assert!(state.should_skip());
        assert!(!state.should_recreate());

        state.resize(1024, 768);
        assert!(!state.should_skip());
        assert!(state.should_recreate());
        assert_eq!(state.extent(), extent(1024, 768));

        state.recreated();
        assert!(!state.should_recreate());
    }

    #[test]
    fn zero_height_alone_counts_as_minimised() {
        let mut state = SurfaceState::new(extent(800, 600));
        state.resize(800, 0);
        assert!(state.should_skip());
    }

    #[test]
    fn pending_recreation_waits_while_minimised() {
        let mut state = SurfaceState::new(extent(800, 600));
        state.resize(640, 480);
        state.resize(0, 0);
        assert!(!state.should_recreate());

        state.resize(640, 480);
        assert!(state.should_recreate());
    }

    #[test]
    fn out_of_date_acquire_skips_and_requests_recreation() {
        let mut tracker = FrameTracker::new(2, 3);
        let mut state = SurfaceState::new(extent(800, 600));

        assert_eq!(state.on_acquire(None), None);
        assert!(state.should_recreate());

        // A skipped frame never claims an image or advances the slot
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.claim_image(0, fence(10)), None);
    }

    #[test]
    fn suboptimal_acquire_renders_and_requests_recreation() {
        let mut state = SurfaceState::new(extent(800, 600));

        assert_eq!(state.on_acquire(Some((1, false))), Some(1));
        assert!(!state.should_recreate());

        assert_eq!(state.on_acquire(Some((2, true))), Some(2));
        assert!(state.should_recreate());
    }

    #[test]
    fn present_result_only_ever_adds_a_request() {
        let mut state = SurfaceState::new(extent(800, 600));

        state.on_present(false);
        assert!(!state.should_recreate());

        state.on_present(true);
        state.on_present(false);
        assert!(state.should_recreate());
    }
}
