//! OpenXR session bound to the host's D3D12 device, with a fenced copy path
//! from the host back buffer into the per-eye swapchains.

use std::mem::ManuallyDrop;
use std::ptr;
use std::time::Duration;

use openxr as xr;
use stereohook_vr::{
    Eye, FrameTiming, ImageExtent, Pose, ProjectionView, RawControllerInput, SessionPhase, View,
    VrError, VrResult, VrSettings, XrBackend,
};
use tracing::{debug, info, warn};

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::IDXGISwapChain3;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use crate::common::{
    choose_swapchain_format, config_err, copy_extent, create_reference_space, map_session_state,
    require_stereo, runtime_err, stereo_views, to_xr_fov, to_xr_pose, unavailable_err,
    HandSpaces, InputActions, VIEW_COUNT,
};

fn gpu_err(context: &'static str) -> impl Fn(windows::core::Error) -> VrError {
    move |e| VrError::Gpu(format!("{context}: {e}"))
}

fn timeout_ms(timeout: Duration) -> u32 {
    timeout.as_millis().min(u128::from(u32::MAX)) as u32
}

/// Device and queue captured from the host's swapchain.
#[derive(Clone)]
pub struct HostGraphics {
    pub device: ID3D12Device,
    pub queue: ID3D12CommandQueue,
    /// DXGI format of the host back buffer.
    pub back_buffer_format: u32,
}

// SAFETY: D3D12 devices and command queues are free-threaded.
unsafe impl Send for HostGraphics {}
unsafe impl Sync for HostGraphics {}

impl HostGraphics {
    /// Takes the host's device from `swapchain` and creates a dedicated
    /// high-priority direct queue for headset submission.
    pub fn from_swapchain(swapchain: &IDXGISwapChain3) -> VrResult<Self> {
        unsafe {
            let device: ID3D12Device = swapchain.GetDevice().map_err(gpu_err("GetDevice"))?;
            let desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Priority: D3D12_COMMAND_QUEUE_PRIORITY_HIGH.0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&desc)
                .map_err(gpu_err("CreateCommandQueue"))?;
            let back_buffer_format = swapchain
                .GetDesc1()
                .map(|d| d.Format.0 as u32)
                .map_err(gpu_err("GetDesc1"))?;
            Ok(Self {
                device,
                queue,
                back_buffer_format,
            })
        }
    }
}

fn transition(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // Borrowed without AddRef; the barrier never releases it.
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

fn subresource_location(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            SubresourceIndex: 0,
        },
    }
}

/// One command allocator/list pair plus a fence, reused for every eye copy.
///
/// Every wait, including the drain on drop, is bounded by the configured
/// GPU wait timeout.
pub struct GpuCopier {
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_value: u64,
    event: HANDLE,
    settings: &'static VrSettings,
}

// SAFETY: only used from the thread holding the engine lock.
unsafe impl Send for GpuCopier {}

impl GpuCopier {
    pub fn new(graphics: &HostGraphics, settings: &'static VrSettings) -> VrResult<Self> {
        unsafe {
            let device = &graphics.device;
            let allocator: ID3D12CommandAllocator = device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                .map_err(gpu_err("CreateCommandAllocator"))?;
            let list: ID3D12GraphicsCommandList = device
                .CreateCommandList(
                    0,
                    D3D12_COMMAND_LIST_TYPE_DIRECT,
                    &allocator,
                    None::<&ID3D12PipelineState>,
                )
                .map_err(gpu_err("CreateCommandList"))?;
            list.Close().map_err(gpu_err("Close"))?;
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(gpu_err("CreateFence"))?;
            let event = CreateEventW(None, false, false, None).map_err(gpu_err("CreateEventW"))?;
            Ok(Self {
                queue: graphics.queue.clone(),
                allocator,
                list,
                fence,
                fence_value: 0,
                event,
                settings,
            })
        }
    }

    pub fn timeout(&self) -> Duration {
        self.settings.gpu_wait_timeout()
    }

    fn wait_for_value(&self, value: u64) -> VrResult<()> {
        let timeout = self.timeout();
        unsafe {
            if self.fence.GetCompletedValue() >= value {
                return Ok(());
            }
            self.fence
                .SetEventOnCompletion(value, self.event)
                .map_err(gpu_err("SetEventOnCompletion"))?;
            let result = WaitForSingleObject(self.event, timeout_ms(timeout));
            if result == WAIT_OBJECT_0 {
                Ok(())
            } else if result == WAIT_TIMEOUT {
                Err(VrError::Timeout(format!("GPU fence {value} after {timeout:?}")))
            } else {
                Err(VrError::Gpu(format!("fence wait failed: {result:?}")))
            }
        }
    }

    /// Signals the queue and blocks until the GPU reaches the signal.
    pub fn wait_for_gpu(&mut self) -> VrResult<()> {
        self.fence_value += 1;
        unsafe {
            self.queue
                .Signal(&self.fence, self.fence_value)
                .map_err(gpu_err("Signal"))?;
        }
        self.wait_for_value(self.fence_value)
    }

    /// Copies `src` (in PRESENT state) into `dst` (in RENDER_TARGET state)
    /// and waits for the copy to finish. Both resources end in their
    /// original states.
    pub fn copy(&mut self, src: &ID3D12Resource, dst: &ID3D12Resource) -> VrResult<()> {
        // A previous copy that timed out may still own the allocator.
        self.wait_for_value(self.fence_value)?;
        unsafe {
            self.allocator.Reset().map_err(gpu_err("allocator Reset"))?;
            self.list
                .Reset(&self.allocator, None::<&ID3D12PipelineState>)
                .map_err(gpu_err("list Reset"))?;

            self.list.ResourceBarrier(&[
                transition(src, D3D12_RESOURCE_STATE_PRESENT, D3D12_RESOURCE_STATE_COPY_SOURCE),
                transition(dst, D3D12_RESOURCE_STATE_RENDER_TARGET, D3D12_RESOURCE_STATE_COPY_DEST),
            ]);

            let src_desc = src.GetDesc();
            let dst_desc = dst.GetDesc();
            let (width, height) = copy_extent(
                (src_desc.Width, src_desc.Height),
                (dst_desc.Width, dst_desc.Height),
            );
            let region = D3D12_BOX {
                left: 0,
                top: 0,
                front: 0,
                right: width,
                bottom: height,
                back: 1,
            };
            let src_location = subresource_location(src);
            let dst_location = subresource_location(dst);
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, Some(&region));

            self.list.ResourceBarrier(&[
                transition(src, D3D12_RESOURCE_STATE_COPY_SOURCE, D3D12_RESOURCE_STATE_PRESENT),
                transition(dst, D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_RENDER_TARGET),
            ]);
            self.list.Close().map_err(gpu_err("list Close"))?;

            let list: ID3D12CommandList = self.list.cast().map_err(gpu_err("cast command list"))?;
            self.queue.ExecuteCommandLists(&[Some(list)]);
        }
        self.wait_for_gpu()
    }
}

impl Drop for GpuCopier {
    fn drop(&mut self) {
        if let Err(err) = self.wait_for_gpu() {
            warn!("GPU did not drain before copier teardown: {err}");
        }
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

struct EyeSwapchain {
    handle: xr::Swapchain<xr::D3D12>,
    images: Vec<ID3D12Resource>,
    extent: ImageExtent,
    /// Acquired image whose wait timed out; the next copy waits on it again.
    pending: Option<u32>,
}

fn wait_swapchain_image(
    instance: &xr::Instance,
    swapchain: &xr::Swapchain<xr::D3D12>,
    timeout: Duration,
) -> VrResult<()> {
    let info = xr::sys::SwapchainImageWaitInfo {
        ty: xr::sys::SwapchainImageWaitInfo::TYPE,
        next: ptr::null(),
        timeout: xr::Duration::from_nanos(timeout.as_nanos().min(i64::MAX as u128) as i64),
    };
    let result = unsafe { (instance.fp().wait_swapchain_image)(swapchain.as_raw(), &info) };
    if result == xr::sys::Result::TIMEOUT_EXPIRED {
        Err(VrError::Timeout(format!("swapchain image after {timeout:?}")))
    } else if result.into_raw() < 0 {
        Err(VrError::Runtime(format!("OpenXR wait image: {result:?}")))
    } else {
        Ok(())
    }
}

/// Headset runtime backend on the host's D3D12 device.
pub struct OpenXrBackend {
    // Drop order: swapchains, hand spaces, reference space, session,
    // action set, instance.
    swapchains: [EyeSwapchain; VIEW_COUNT],
    hand_spaces: Option<HandSpaces>,
    reference_space: xr::Space,
    frame_stream: xr::FrameStream<xr::D3D12>,
    frame_waiter: xr::FrameWaiter,
    session: xr::Session<xr::D3D12>,
    actions: Option<InputActions>,
    copier: GpuCopier,
    events: xr::EventDataBuffer,
    instance: xr::Instance,
    settings: &'static VrSettings,
}

// SAFETY: the D3D12 resources it holds are free-threaded and the engine
// serializes every call behind its lock.
unsafe impl Send for OpenXrBackend {}

impl OpenXrBackend {
    pub fn new(graphics: &HostGraphics, settings: &'static VrSettings) -> VrResult<Self> {
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| VrError::Unavailable(format!("OpenXR loader: {e}")))?;
        let available = entry
            .enumerate_extensions()
            .map_err(unavailable_err("extension enumerate"))?;
        if !available.khr_d3d12_enable {
            return Err(VrError::Unavailable(
                "OpenXR runtime lacks XR_KHR_D3D12_enable".into(),
            ));
        }
        let mut extensions = xr::ExtensionSet::default();
        extensions.khr_d3d12_enable = true;

        let app_info = xr::ApplicationInfo {
            application_name: "stereohook",
            application_version: 1,
            engine_name: "stereohook",
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(unavailable_err("create_instance"))?;
        if let Ok(props) = instance.properties() {
            info!(
                "OpenXR runtime: {} {}",
                props.runtime_name, props.runtime_version
            );
        }
        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(unavailable_err("no headset found"))?;

        let view_configs = instance
            .enumerate_view_configuration_views(system, xr::ViewConfigurationType::PRIMARY_STEREO)
            .map_err(config_err("view configuration"))?;
        require_stereo(view_configs.len())?;

        // Required before session creation even though the device is fixed.
        instance
            .graphics_requirements::<xr::D3D12>(system)
            .map_err(config_err("D3D12 requirements"))?;

        let create_info = xr::d3d::SessionCreateInfoD3D12 {
            device: graphics.device.as_raw().cast(),
            queue: graphics.queue.as_raw().cast(),
        };
        let (session, frame_waiter, frame_stream) = unsafe {
            instance
                .create_session::<xr::D3D12>(system, &create_info)
                .map_err(config_err("create_session"))?
        };
        let (reference_space, space_type) = create_reference_space(&session)?;
        info!(?space_type, "OpenXR session created");

        let formats = session
            .enumerate_swapchain_formats()
            .map_err(config_err("swapchain formats"))?;
        let format = choose_swapchain_format(&formats, graphics.back_buffer_format)
            .ok_or_else(|| VrError::Config("runtime offers no swapchain formats".into()))?;
        if format != graphics.back_buffer_format {
            warn!(
                host = graphics.back_buffer_format,
                selected = format,
                "host back buffer format not offered by runtime"
            );
        }

        let mut swapchains = Vec::with_capacity(VIEW_COUNT);
        for (index, config) in view_configs.iter().enumerate() {
            let extent = ImageExtent {
                width: config.recommended_image_rect_width,
                height: config.recommended_image_rect_height,
            };
            let handle = session
                .create_swapchain(&xr::SwapchainCreateInfo {
                    create_flags: xr::SwapchainCreateFlags::EMPTY,
                    usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                        | xr::SwapchainUsageFlags::TRANSFER_DST,
                    format,
                    sample_count: 1,
                    width: extent.width,
                    height: extent.height,
                    face_count: 1,
                    array_size: 1,
                    mip_count: 1,
                })
                .map_err(config_err("create_swapchain"))?;
            let images = handle
                .enumerate_images()
                .map_err(config_err("swapchain images"))?
                .into_iter()
                .filter_map(|raw| {
                    let raw: *mut std::ffi::c_void = raw.cast();
                    unsafe { ID3D12Resource::from_raw_borrowed(&raw) }.cloned()
                })
                .collect::<Vec<_>>();
            info!(
                eye = index,
                width = extent.width,
                height = extent.height,
                images = images.len(),
                "swapchain created"
            );
            swapchains.push(EyeSwapchain {
                handle,
                images,
                extent,
                pending: None,
            });
        }
        let swapchains: [EyeSwapchain; VIEW_COUNT] = swapchains
            .try_into()
            .map_err(|_| VrError::Config("swapchain count mismatch".into()))?;

        let input = InputActions::new(&instance, &session).and_then(|actions| {
            let spaces = actions.hand_spaces(&session)?;
            Ok((actions, spaces))
        });
        let (actions, hand_spaces) = match input {
            Ok((actions, spaces)) => (Some(actions), Some(spaces)),
            Err(err) => {
                warn!("controller actions unavailable: {err}");
                (None, None)
            }
        };

        let copier = GpuCopier::new(graphics, settings)
            .map_err(|e| VrError::Config(e.to_string()))?;
        info!("D3D12 copy resources created");

        Ok(Self {
            swapchains,
            hand_spaces,
            reference_space,
            frame_stream,
            frame_waiter,
            session,
            actions,
            copier,
            events: xr::EventDataBuffer::new(),
            instance,
            settings,
        })
    }
}

impl XrBackend for OpenXrBackend {
    type Image = ID3D12Resource;

    fn poll_event(&mut self) -> VrResult<Option<SessionPhase>> {
        while let Some(event) = self
            .instance
            .poll_event(&mut self.events)
            .map_err(runtime_err("poll_event"))?
        {
            match event {
                xr::Event::SessionStateChanged(change) => {
                    if let Some(phase) = map_session_state(change.state()) {
                        return Ok(Some(phase));
                    }
                }
                xr::Event::InstanceLossPending(_) => return Ok(Some(SessionPhase::LossPending)),
                xr::Event::EventsLost(lost) => {
                    warn!("OpenXR dropped {} events", lost.lost_event_count());
                }
                xr::Event::ReferenceSpaceChangePending(_) => {
                    debug!("reference space change pending");
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn begin_session(&mut self) -> VrResult<()> {
        self.session
            .begin(xr::ViewConfigurationType::PRIMARY_STEREO)
            .map(|_| ())
            .map_err(runtime_err("session begin"))
    }

    fn end_session(&mut self) -> VrResult<()> {
        self.session
            .end()
            .map(|_| ())
            .map_err(runtime_err("session end"))
    }

    fn wait_frame(&mut self) -> VrResult<FrameTiming> {
        let state = self.frame_waiter.wait().map_err(runtime_err("wait_frame"))?;
        Ok(FrameTiming {
            predicted_display_time_ns: state.predicted_display_time.as_nanos(),
            predicted_display_period_ns: state.predicted_display_period.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> VrResult<()> {
        self.frame_stream
            .begin()
            .map(|_| ())
            .map_err(runtime_err("begin_frame"))
    }

    fn locate_views(&mut self, display_time_ns: i64) -> VrResult<[View; 2]> {
        let (flags, views) = self
            .session
            .locate_views(
                xr::ViewConfigurationType::PRIMARY_STEREO,
                xr::Time::from_nanos(display_time_ns),
                &self.reference_space,
            )
            .map_err(runtime_err("locate_views"))?;
        stereo_views(flags, &views)
    }

    fn locate_hands(&mut self, display_time_ns: i64) -> VrResult<[Option<Pose>; 2]> {
        let time = xr::Time::from_nanos(display_time_ns);
        Ok(match self.hand_spaces.as_ref() {
            Some(spaces) => spaces.locate(&self.reference_space, time),
            None => [None, None],
        })
    }

    fn poll_actions(&mut self, _display_time_ns: i64) -> VrResult<RawControllerInput> {
        match self.actions.as_ref() {
            Some(actions) => actions.poll(&self.session),
            None => Ok(RawControllerInput::default()),
        }
    }

    fn copy_to_eye(&mut self, image: &ID3D12Resource, eye: Eye) -> VrResult<()> {
        let timeout = self.settings.gpu_wait_timeout();
        let swapchain = &mut self.swapchains[eye.index()];
        let index = match swapchain.pending {
            Some(index) => index,
            None => {
                let index = swapchain
                    .handle
                    .acquire_image()
                    .map_err(runtime_err("acquire_image"))?;
                swapchain.pending = Some(index);
                index
            }
        };
        wait_swapchain_image(&self.instance, &swapchain.handle, timeout)?;
        swapchain.pending = None;

        let copied = match swapchain.images.get(index as usize) {
            Some(target) => self.copier.copy(image, target),
            None => Err(VrError::Protocol(format!(
                "swapchain image {index} out of range for {eye:?} eye"
            ))),
        };
        swapchain
            .handle
            .release_image()
            .map_err(runtime_err("release_image"))?;
        copied
    }

    fn swapchain_extent(&self, eye: Eye) -> Option<ImageExtent> {
        self.swapchains.get(eye.index()).map(|s| s.extent)
    }

    fn end_frame(
        &mut self,
        display_time_ns: i64,
        layer: Option<&[ProjectionView; 2]>,
    ) -> VrResult<()> {
        let time = xr::Time::from_nanos(display_time_ns);
        let Some(views) = layer else {
            return self
                .frame_stream
                .end(time, xr::EnvironmentBlendMode::OPAQUE, &[])
                .map_err(runtime_err("end_frame"));
        };

        let projection_view = |eye: Eye| {
            let view = &views[eye.index()];
            let rect = xr::Rect2Di {
                offset: xr::Offset2Di { x: 0, y: 0 },
                extent: xr::Extent2Di {
                    width: view.extent.width as i32,
                    height: view.extent.height as i32,
                },
            };
            xr::CompositionLayerProjectionView::new()
                .pose(to_xr_pose(view.pose))
                .fov(to_xr_fov(view.fov))
                .sub_image(
                    xr::SwapchainSubImage::new()
                        .swapchain(&self.swapchains[eye.index()].handle)
                        .image_array_index(0)
                        .image_rect(rect),
                )
        };
        let projection_views = Eye::BOTH.map(projection_view);
        let projection = xr::CompositionLayerProjection::new()
            .space(&self.reference_space)
            .views(&projection_views);
        let layers: [&xr::CompositionLayerBase<xr::D3D12>; 1] = [&projection];
        self.frame_stream
            .end(time, xr::EnvironmentBlendMode::OPAQUE, &layers)
            .map_err(runtime_err("end_frame"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DXGI_FORMAT_R8G8B8A8_UNORM;
    use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
    use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter, IDXGIFactory4};

    fn graphics_on(adapter: &IDXGIAdapter) -> HostGraphics {
        unsafe {
            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(adapter, D3D_FEATURE_LEVEL_11_0, &mut device).unwrap();
            let device = device.unwrap();
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    ..Default::default()
                })
                .unwrap();
            HostGraphics {
                device,
                queue,
                back_buffer_format: DXGI_FORMAT_R8G8B8A8_UNORM,
            }
        }
    }

    fn warp_graphics() -> HostGraphics {
        unsafe {
            let factory: IDXGIFactory4 = CreateDXGIFactory1().unwrap();
            let adapter: IDXGIAdapter = factory.EnumWarpAdapter().unwrap();
            graphics_on(&adapter)
        }
    }

    fn leaked_settings() -> &'static VrSettings {
        Box::leak(Box::new(VrSettings::default()))
    }

    #[test]
    fn copier_waits_use_the_configured_timeout() {
        let settings = leaked_settings();
        settings.set_gpu_wait_timeout_ms(250);
        let mut copier = GpuCopier::new(&warp_graphics(), settings).unwrap();
        assert_eq!(copier.timeout(), Duration::from_millis(250));

        copier.wait_for_gpu().unwrap();
        settings.set_gpu_wait_timeout_ms(40);
        assert_eq!(copier.timeout(), Duration::from_millis(40));
        copier.wait_for_gpu().unwrap();
        assert_eq!(copier.fence_value, 2);
    }

    #[test]
    #[ignore = "needs an OpenXR runtime with a connected headset"]
    fn backend_tears_down_after_session_creation() {
        let graphics = unsafe {
            let factory: IDXGIFactory4 = CreateDXGIFactory1().unwrap();
            let adapter: IDXGIAdapter = factory.EnumAdapters(0).unwrap();
            graphics_on(&adapter)
        };
        let mut backend = OpenXrBackend::new(&graphics, leaked_settings()).unwrap();
        assert_eq!(backend.hand_spaces.is_some(), backend.actions.is_some());
        backend.poll_event().unwrap();
        drop(backend);
    }
}
