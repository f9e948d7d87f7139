//! Windows glue: resolves hook targets, installs the detours and forwards
//! each intercepted call to the [`Plugin`] bodies.

use std::ffi::c_void;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use stereohook_common::{Error, Result};
use stereohook_vr::{set_vr_status, GamepadButtons, GamepadState, VrError};
use stereohook_vr_openxr::{HostGraphics, OpenXrBackend};
use tracing::{error, info, warn};

use windows::core::{s, w, Interface, HRESULT, PCWSTR};
use windows::Win32::Foundation::{
    E_FAIL, ERROR_DEVICE_NOT_CONNECTED, ERROR_SUCCESS, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM,
};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, ID3D12CommandQueue, ID3D12Device, ID3D12Resource,
    D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIFactory4, IDXGIOutput, IDXGISwapChain, IDXGISwapChain1,
    IDXGISwapChain3, DXGI_ADAPTER_FLAG_SOFTWARE, DXGI_SWAP_CHAIN_DESC1,
    DXGI_SWAP_EFFECT_FLIP_DISCARD, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress, LoadLibraryW};
use windows::Win32::System::ProcessStatus::{GetModuleInformation, MODULEINFO};
use windows::Win32::System::Threading::GetCurrentProcess;
use windows::Win32::UI::Input::XboxController::{XINPUT_GAMEPAD_BUTTON_FLAGS, XINPUT_STATE};
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassExW, UnregisterClassW,
    WINDOW_EX_STYLE, WNDCLASSEXW, WS_OVERLAPPEDWINDOW,
};

use crate::detour::{install_hook, Detour, LoaderHooks, OriginalFn};
use crate::hooks::{HostTransform, Plugin, SHUTDOWN_GRACE};
use crate::pattern::{follow_jump_thunks, resolve_first, CAMERA_UPDATE_PATTERNS};
use crate::HostApi;

type HostPlugin = Plugin<OpenXrBackend, HostGraphics>;

type PresentFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT;
type CameraUpdateFn = unsafe extern "system" fn(*mut c_void);
type XInputGetStateFn = unsafe extern "system" fn(u32, *mut XINPUT_STATE) -> u32;

/// `IDXGISwapChain::Present` slot in the swapchain vtable.
const PRESENT_VTABLE_INDEX: usize = 8;

static PLUGIN: OnceLock<HostPlugin> = OnceLock::new();
static PRESENT: OriginalFn = OriginalFn::new();
static CAMERA_UPDATE: OriginalFn = OriginalFn::new();
static XINPUT_GET_STATE: OriginalFn = OriginalFn::new();
static CAMERA_TRANSFORM_OFFSET: AtomicUsize = AtomicUsize::new(0);

fn plugin() -> &'static HostPlugin {
    PLUGIN.get_or_init(|| Plugin::new(stereohook_vr::settings(), OpenXrBackend::new))
}

fn graphics_err(context: &'static str) -> impl Fn(windows::core::Error) -> Error {
    move |e| Error::graphics(format!("{context}: {e}"))
}

unsafe fn current_back_buffer(swapchain: &IDXGISwapChain3) -> Option<ID3D12Resource> {
    let index = swapchain.GetCurrentBackBufferIndex();
    swapchain.GetBuffer::<ID3D12Resource>(index).ok()
}

unsafe extern "system" fn hook_present(
    swapchain: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> HRESULT {
    if let Some(plugin) = PLUGIN.get() {
        let chain = IDXGISwapChain::from_raw_borrowed(&swapchain)
            .and_then(|chain| chain.cast::<IDXGISwapChain3>().ok());
        if let Some(chain) = chain {
            plugin.present(
                || HostGraphics::from_swapchain(&chain).map_err(Error::graphics),
                || current_back_buffer(&chain),
            );
        }
    }
    match PRESENT.get() {
        Some(original) => {
            let original: PresentFn = std::mem::transmute(original);
            original(swapchain, sync_interval, flags)
        }
        None => E_FAIL,
    }
}

unsafe extern "system" fn hook_camera_update(component: *mut c_void) {
    let offset = CAMERA_TRANSFORM_OFFSET.load(Ordering::Acquire);
    if let (Some(plugin), false, true) = (PLUGIN.get(), component.is_null(), offset != 0) {
        let transform = &mut *component.cast::<u8>().add(offset).cast::<HostTransform>();
        plugin.camera_update(transform);
    }
    if let Some(original) = CAMERA_UPDATE.get() {
        let original: CameraUpdateFn = std::mem::transmute(original);
        original(component);
    }
}

fn gamepad_from_xinput(state: &XINPUT_STATE, connected: bool) -> GamepadState {
    let pad = &state.Gamepad;
    GamepadState {
        connected,
        packet_number: state.dwPacketNumber,
        buttons: GamepadButtons::from_bits_retain(pad.wButtons.0),
        left_trigger: pad.bLeftTrigger,
        right_trigger: pad.bRightTrigger,
        thumb_lx: pad.sThumbLX,
        thumb_ly: pad.sThumbLY,
        thumb_rx: pad.sThumbRX,
        thumb_ry: pad.sThumbRY,
    }
}

fn write_xinput(state: &mut XINPUT_STATE, pad: &GamepadState) {
    state.dwPacketNumber = pad.packet_number;
    let out = &mut state.Gamepad;
    out.wButtons = XINPUT_GAMEPAD_BUTTON_FLAGS(pad.buttons.bits());
    out.bLeftTrigger = pad.left_trigger;
    out.bRightTrigger = pad.right_trigger;
    out.sThumbLX = pad.thumb_lx;
    out.sThumbLY = pad.thumb_ly;
    out.sThumbRX = pad.thumb_rx;
    out.sThumbRY = pad.thumb_ry;
}

unsafe extern "system" fn hook_xinput_get_state(user_index: u32, state: *mut XINPUT_STATE) -> u32 {
    let Some(original) = XINPUT_GET_STATE.get() else {
        return ERROR_DEVICE_NOT_CONNECTED.0;
    };
    let original: XInputGetStateFn = std::mem::transmute(original);
    let result = original(user_index, state);

    let (Some(plugin), Some(state)) = (PLUGIN.get(), state.as_mut()) else {
        return result;
    };
    let mut pad = gamepad_from_xinput(state, result == ERROR_SUCCESS.0);
    if plugin.fuse_gamepad(user_index, &mut pad) {
        write_xinput(state, &pad);
        return ERROR_SUCCESS.0;
    }
    result
}

unsafe extern "system" fn dummy_window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

const DUMMY_CLASS: PCWSTR = w!("StereohookDummyWindow");

/// Invisible window that only exists to own a throwaway swapchain.
struct DummyWindow {
    hwnd: HWND,
    instance: HINSTANCE,
}

impl DummyWindow {
    unsafe fn create() -> Result<Self> {
        let instance: HINSTANCE = GetModuleHandleW(None)
            .map_err(graphics_err("GetModuleHandleW"))?
            .into();
        let class = WNDCLASSEXW {
            cbSize: size_of::<WNDCLASSEXW>() as u32,
            lpfnWndProc: Some(dummy_window_proc),
            hInstance: instance,
            lpszClassName: DUMMY_CLASS,
            ..Default::default()
        };
        // Fails harmlessly when a previous load registered it.
        RegisterClassExW(&class);
        let hwnd = CreateWindowExW(
            WINDOW_EX_STYLE(0),
            DUMMY_CLASS,
            w!(""),
            WS_OVERLAPPEDWINDOW,
            0,
            0,
            100,
            100,
            None,
            None,
            Some(instance),
            None,
        )
        .map_err(graphics_err("CreateWindowExW"))?;
        Ok(Self { hwnd, instance })
    }
}

impl Drop for DummyWindow {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.hwnd);
            let _ = UnregisterClassW(DUMMY_CLASS, Some(self.instance));
        }
    }
}

/// Finds `Present` by building a throwaway D3D12 swapchain and reading its
/// vtable; every DXGI swapchain in the process shares that code.
unsafe fn present_address() -> Result<usize> {
    let factory: IDXGIFactory4 = CreateDXGIFactory1().map_err(graphics_err("CreateDXGIFactory1"))?;
    let adapter = (0..)
        .map_while(|index| factory.EnumAdapters1(index).ok())
        .find(|adapter| {
            adapter
                .GetDesc1()
                .map(|desc| desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 == 0)
                .unwrap_or(false)
        })
        .ok_or_else(|| Error::not_found("hardware adapter"))?;

    let mut device: Option<ID3D12Device> = None;
    D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device)
        .map_err(graphics_err("D3D12CreateDevice"))?;
    let device = device.ok_or_else(|| Error::graphics("D3D12CreateDevice returned no device"))?;
    let queue: ID3D12CommandQueue = device
        .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        })
        .map_err(graphics_err("CreateCommandQueue"))?;

    let window = DummyWindow::create()?;
    let desc = DXGI_SWAP_CHAIN_DESC1 {
        Width: 100,
        Height: 100,
        Format: DXGI_FORMAT_R8G8B8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 2,
        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
        ..Default::default()
    };
    let swapchain: IDXGISwapChain1 = factory
        .CreateSwapChainForHwnd(&queue, window.hwnd, &desc, None, None::<&IDXGIOutput>)
        .map_err(graphics_err("CreateSwapChainForHwnd"))?;

    let vtable = *(swapchain.as_raw() as *const *const usize);
    let address = *vtable.add(PRESENT_VTABLE_INDEX);
    info!("Present resolved at {address:#x}");
    Ok(address)
}

unsafe fn xinput_address() -> Result<usize> {
    let module = LoadLibraryW(w!("XInput1_4.dll"))
        .or_else(|_| LoadLibraryW(w!("XInput1_3.dll")))
        .map_err(|_| Error::not_found("XInput DLL"))?;
    GetProcAddress(module, s!("XInputGetState"))
        .map(|f| f as usize)
        .ok_or_else(|| Error::not_found("XInputGetState export"))
}

unsafe fn main_module_range() -> Result<(usize, usize)> {
    let module = GetModuleHandleW(None).map_err(graphics_err("GetModuleHandleW"))?;
    let mut info = MODULEINFO::default();
    GetModuleInformation(GetCurrentProcess(), module, &mut info, size_of::<MODULEINFO>() as u32)
        .map_err(graphics_err("GetModuleInformation"))?;
    Ok((info.lpBaseOfDll as usize, info.SizeOfImage as usize))
}

unsafe fn camera_update_address(api: &HostApi) -> Option<usize> {
    if !api.camera_update.is_null() {
        info!("camera update resolved through host reflection");
        return Some(follow_jump_thunks(api.camera_update as usize));
    }
    info!("no reflected camera update, trying signatures");
    let (base, len) = match main_module_range() {
        Ok(range) => range,
        Err(err) => {
            warn!("cannot scan host image: {err}");
            return None;
        }
    };
    let (index, address) = resolve_first(base, len, &CAMERA_UPDATE_PATTERNS)?;
    info!("camera update matched signature {index} at {address:#x}");
    Some(follow_jump_thunks(address))
}

fn install_camera_hook(detour: &dyn Detour, api: &HostApi) {
    CAMERA_TRANSFORM_OFFSET.store(api.camera_transform_offset, Ordering::Release);
    let Some(target) = (unsafe { camera_update_address(api) }) else {
        warn!("camera update not found, head tracking disabled");
        return;
    };
    if api.camera_transform_offset == 0 {
        warn!("host gave no camera transform offset, head tracking disabled");
    }
    let result = unsafe {
        install_hook(
            detour,
            "camera update",
            target,
            hook_camera_update as usize,
            &CAMERA_UPDATE,
        )
    };
    if let Err(err) = result {
        warn!("camera hook failed, head tracking disabled: {err}");
    }
}

fn install_input_hook(detour: &dyn Detour) {
    let result = unsafe {
        xinput_address().and_then(|target| {
            install_hook(
                detour,
                "XInputGetState",
                target,
                hook_xinput_get_state as usize,
                &XINPUT_GET_STATE,
            )
        })
    };
    if let Err(err) = result {
        warn!("input hook failed, controller support limited: {err}");
    }
}

pub(crate) fn load(api: &HostApi) -> Result<()> {
    let attach = api
        .attach
        .ok_or_else(|| Error::config("host loader provided no attach callback"))?;
    let detour = LoaderHooks::new(attach);
    let plugin = plugin();

    let target = unsafe { present_address()? };
    unsafe { install_hook(&detour, "Present", target, hook_present as usize, &PRESENT)? };
    install_camera_hook(&detour, api);
    install_input_hook(&detour);

    let settings = plugin.engine().settings();
    info!(
        vr_enabled = settings.vr_enabled(),
        ipd_mm = settings.ipd_mm(),
        world_scale = settings.world_scale(),
        "stereohook loaded"
    );
    set_vr_status("VR: idle (waiting for host graphics queue)");
    Ok(())
}

pub(crate) fn unload() {
    match PLUGIN.get() {
        Some(plugin) => plugin.shutdown(SHUTDOWN_GRACE),
        None => info!("stereohook unloaded before initialization"),
    }
}

/// Recreates the headset session after a runtime loss. Returns 0 on
/// success, -1 before the first present, -2 on failure.
#[no_mangle]
pub extern "C" fn stereohook_reset_session() -> i32 {
    let Some(plugin) = PLUGIN.get() else {
        return -1;
    };
    match plugin.reset_session() {
        Ok(()) => 0,
        Err(VrError::NotRunning) => -1,
        Err(err) => {
            error!("session reset failed: {err}");
            -2
        }
    }
}
