use crate::{
    eye::Eye,
    session::SessionPhase,
    types::{FrameTiming, ImageExtent, Pose, ProjectionView, RawControllerInput, View},
    VrResult,
};

/// The headset runtime and GPU operations the engine drives.
///
/// Implementations own every runtime and graphics handle; none of those types
/// cross this boundary. All calls come from the render thread with the
/// engine's backend lock held.
pub trait XrBackend: Send {
    /// Host colour buffer handed to [`copy_to_eye`](Self::copy_to_eye).
    type Image;

    // Runtime -> engine
    /// Drains one session phase change, `None` when the queue is empty.
    fn poll_event(&mut self) -> VrResult<Option<SessionPhase>>;
    fn begin_session(&mut self) -> VrResult<()>;
    fn end_session(&mut self) -> VrResult<()>;

    // Frame timing
    fn wait_frame(&mut self) -> VrResult<FrameTiming>;
    fn begin_frame(&mut self) -> VrResult<()>;
    /// Both eye views in runtime space. Fails when tracking is lost.
    fn locate_views(&mut self, display_time_ns: i64) -> VrResult<[View; 2]>;
    /// Aim poses in runtime space, `None` for an untracked hand.
    fn locate_hands(&mut self, display_time_ns: i64) -> VrResult<[Option<Pose>; 2]>;
    /// Syncs the action set and reads button/axis values. Aim poses are
    /// filled in separately from [`locate_hands`](Self::locate_hands).
    fn poll_actions(&mut self, display_time_ns: i64) -> VrResult<RawControllerInput>;

    // Engine -> runtime
    /// Copies `image` into `eye`'s swapchain and releases the swapchain image.
    fn copy_to_eye(&mut self, image: &Self::Image, eye: Eye) -> VrResult<()>;
    fn swapchain_extent(&self, eye: Eye) -> Option<ImageExtent>;
    /// Ends the frame, with a projection layer or with no layers at all.
    fn end_frame(
        &mut self,
        display_time_ns: i64,
        layer: Option<&[ProjectionView; 2]>,
    ) -> VrResult<()>;
}
