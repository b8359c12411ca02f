//! Win32 backend: low-level keyboard hook, foreground tracking, SendInput
//! injection, caret lookup through GUI thread info and monitor work areas.

use crate::errors::{InputError, ProbeError};
use crate::keyboard_api::{FrontmostApplication, InputObserver, Key, ObservedKey, SyntheticInputInjector};
use crate::placement::{Point, Rect, ScreenGeometry};
use crate::probe::{ElementRole, IntrospectionLayer};
use crate::{EngineEvent, Result};
use crossbeam_channel::Sender;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::c_int;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::{io, mem, ptr};
use tracing::{debug, error, info, warn};

use winapi::shared::basetsd::DWORD_PTR;
use winapi::shared::minwindef::{DWORD, FALSE, LPARAM, LRESULT, WPARAM};
use winapi::shared::windef::{HWINEVENTHOOK, HWND, POINT, RECT};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::handleapi::CloseHandle;
use winapi::um::processthreadsapi::{GetCurrentProcessId, GetCurrentThreadId, OpenProcess};
use winapi::um::winbase::QueryFullProcessImageNameW;
use winapi::um::winnt::{LONG, PROCESS_QUERY_LIMITED_INFORMATION};
use winapi::um::winuser::*;

/// Tag carried in `dwExtraInfo` of everything we inject, so the hook can
/// tell our own keystrokes from the user's.
const INJECTED_MARKER: usize = 0x534E_4B59;

/// Tells `ToUnicodeEx` not to touch the keyboard state (Windows 10 1607+),
/// which keeps dead keys working in the foreign application.
const TO_UNICODE_NO_STATE_CHANGE: u32 = 0x4;

const VK_V: u16 = 0x56;

/// Upper bound for synchronous messages sent to foreign windows, which may
/// be hung.
const FOREIGN_MESSAGE_TIMEOUT_MS: u32 = 50;

static GLOBAL_SENDER: Lazy<Mutex<Option<Sender<EngineEvent>>>> = Lazy::new(|| Mutex::new(None));
static IGNORED_APPS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(Vec::new()));
/// Set while one of our own windows (the picker) is in the foreground.
static FOREGROUND_IGNORED: AtomicBool = AtomicBool::new(false);

fn publish(event: EngineEvent) {
    if let Some(sender) = GLOBAL_SENDER.lock().as_ref() {
        // never block inside a hook callback
        if let Err(e) = sender.try_send(event) {
            warn!(error = %e, "Dropping input event, engine bus unavailable");
        }
    }
}

unsafe extern "system" fn keyboard_hook_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if code >= 0 && matches!(w_param as u32, WM_KEYDOWN | WM_SYSKEYDOWN) {
        let kb_struct = &*(l_param as *const KBDLLHOOKSTRUCT);
        let ours = kb_struct.dwExtraInfo == INJECTED_MARKER;
        if !ours && !FOREGROUND_IGNORED.load(Ordering::SeqCst) {
            if let Some(key) = translate_key(kb_struct.vkCode, kb_struct.scanCode) {
                publish(EngineEvent::Key(ObservedKey::global(key, kb_struct.vkCode)));
            }
        }
    }

    CallNextHookEx(ptr::null_mut(), code, w_param, l_param)
}

unsafe extern "system" fn foreground_proc(
    _hook: HWINEVENTHOOK,
    _event: DWORD,
    hwnd: HWND,
    _id_object: LONG,
    _id_child: LONG,
    _event_thread: DWORD,
    _event_time: DWORD,
) {
    report_foreground(hwnd);
}

fn report_foreground(hwnd: HWND) {
    if hwnd.is_null() {
        return;
    }
    let Some(app) = frontmost_application(hwnd) else {
        debug!("foreground window without an owning process");
        FOREGROUND_IGNORED.store(false, Ordering::SeqCst);
        return;
    };

    let ignored = is_ignored_app(&app, unsafe { GetCurrentProcessId() }, &IGNORED_APPS.lock());
    FOREGROUND_IGNORED.store(ignored, Ordering::SeqCst);
    if ignored {
        debug!(app = %app.id, "own window in foreground");
        return;
    }
    publish(EngineEvent::FocusChanged(app));
}

fn is_ignored_app(app: &FrontmostApplication, own_pid: u32, ignored: &[String]) -> bool {
    app.pid == own_pid || ignored.iter().any(|id| id.eq_ignore_ascii_case(&app.id))
}

fn frontmost_application(hwnd: HWND) -> Option<FrontmostApplication> {
    let mut pid: DWORD = 0;
    unsafe { GetWindowThreadProcessId(hwnd, &mut pid) };
    if pid == 0 {
        return None;
    }
    let path = process_image_path(pid);
    if path.is_none() {
        debug!(pid, "process image not readable");
    }
    Some(FrontmostApplication::new(application_id(pid, path.as_deref()), pid, hwnd as usize))
}

/// Executable name, or `pid:<n>` for processes we may not inspect
/// (elevated windows, protected processes).
fn application_id(pid: u32, image_path: Option<&str>) -> String {
    match image_path {
        Some(path) => executable_name(path),
        None => format!("pid:{}", pid),
    }
}

fn process_image_path(pid: u32) -> Option<String> {
    unsafe {
        let process = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid);
        if process.is_null() {
            return None;
        }
        let mut buffer = [0u16; 1024];
        let mut size = buffer.len() as DWORD;
        let ok = QueryFullProcessImageNameW(process, 0, buffer.as_mut_ptr(), &mut size);
        CloseHandle(process);
        if ok == 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..size as usize]))
    }
}

fn executable_name(path: &str) -> String {
    path.rsplit(['\\', '/']).next().unwrap_or(path).to_string()
}

fn is_modifier(vk_code: i32) -> bool {
    matches!(
        vk_code,
        VK_SHIFT
            | VK_LSHIFT
            | VK_RSHIFT
            | VK_CONTROL
            | VK_LCONTROL
            | VK_RCONTROL
            | VK_MENU
            | VK_LMENU
            | VK_RMENU
            | VK_LWIN
            | VK_RWIN
            | VK_CAPITAL
    )
}

/// Pure modifier key-downs are not keystrokes as far as capture is concerned.
fn translate_key(vk_code: DWORD, scan_code: DWORD) -> Option<Key> {
    match vk_code as i32 {
        VK_BACK => Some(Key::Backspace),
        VK_ESCAPE => Some(Key::Escape),
        vk if is_modifier(vk) => None,
        _ => Some(
            vk_code_to_char(vk_code, scan_code)
                .filter(|c| !c.is_control())
                .map(Key::Char)
                .unwrap_or(Key::Other(vk_code)),
        ),
    }
}

fn vk_code_to_char(vk_code: DWORD, scan_code: DWORD) -> Option<char> {
    let mut keyboard_state = [0u8; 256];
    unsafe {
        for vk in [VK_SHIFT, VK_CONTROL, VK_MENU] {
            if GetAsyncKeyState(vk) as u16 & 0x8000 != 0 {
                keyboard_state[vk as usize] = 0x80;
            }
        }
        if GetKeyState(VK_CAPITAL) & 1 != 0 {
            keyboard_state[VK_CAPITAL as usize] = 0x01;
        }
    }

    let mut unicode_chars = [0u16; 4];
    let result = unsafe {
        let thread = GetWindowThreadProcessId(GetForegroundWindow(), ptr::null_mut());
        ToUnicodeEx(
            vk_code,
            scan_code,
            keyboard_state.as_ptr(),
            unicode_chars.as_mut_ptr(),
            unicode_chars.len() as c_int,
            TO_UNICODE_NO_STATE_CHANGE,
            GetKeyboardLayout(thread),
        )
    };

    if result == 1 {
        char::from_u32(unicode_chars[0] as u32)
    } else {
        None
    }
}

fn run_hook_thread(ready: Sender<std::result::Result<u32, InputError>>) {
    unsafe {
        let keyboard_hook = SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), ptr::null_mut(), 0);
        if keyboard_hook.is_null() {
            let error = io::Error::last_os_error();
            let _ = ready.send(Err(InputError::HookError(format!("SetWindowsHookExW failed: {}", error))));
            return;
        }

        let focus_hook = SetWinEventHook(
            EVENT_SYSTEM_FOREGROUND,
            EVENT_SYSTEM_FOREGROUND,
            ptr::null_mut(),
            Some(foreground_proc),
            0,
            0,
            WINEVENT_OUTOFCONTEXT,
        );
        if focus_hook.is_null() {
            UnhookWindowsHookEx(keyboard_hook);
            let _ = ready.send(Err(InputError::HookError("SetWinEventHook failed".into())));
            return;
        }

        let _ = ready.send(Ok(GetCurrentThreadId()));
        report_foreground(GetForegroundWindow());

        let mut msg: MSG = mem::zeroed();
        while GetMessageW(&mut msg, ptr::null_mut(), 0, 0) > 0 {
            TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }

        UnhookWinEvent(focus_hook);
        UnhookWindowsHookEx(keyboard_hook);
    }
    debug!("hook thread finished");
}

/// System-wide keyboard and foreground observer. Both hooks live on one
/// dedicated thread that pumps messages until [`InputObserver::stop`].
pub struct WindowsInputObserver {
    ignored_apps: Vec<String>,
    thread: Option<JoinHandle<()>>,
    thread_id: u32,
}

impl WindowsInputObserver {
    /// `ignored_apps` are executable names whose windows are our own.
    pub fn new(ignored_apps: Vec<String>) -> Self {
        Self { ignored_apps, thread: None, thread_id: 0 }
    }
}

impl InputObserver for WindowsInputObserver {
    fn start(&mut self, bus: Sender<EngineEvent>) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        *GLOBAL_SENDER.lock() = Some(bus);
        *IGNORED_APPS.lock() = self.ignored_apps.clone();

        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name("snipkey-hooks".into())
            .spawn(move || run_hook_thread(ready_tx))?;

        let thread_id = ready_rx
            .recv()
            .map_err(|_| InputError::HookError("hook thread exited before installing hooks".into()))??;

        self.thread = Some(handle);
        self.thread_id = thread_id;
        info!(thread_id, "keyboard and focus hooks installed");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, 0, 0) };
        handle
            .join()
            .map_err(|_| InputError::HookError("hook thread panicked".into()))?;
        *GLOBAL_SENDER.lock() = None;
        info!("keyboard and focus hooks removed");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl Drop for WindowsInputObserver {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "Failed to stop input observer");
        }
    }
}

fn keyboard_input(vk: u16, scan: u16, flags: DWORD) -> INPUT {
    unsafe {
        let mut input: INPUT = mem::zeroed();
        input.type_ = INPUT_KEYBOARD;
        let ki = input.u.ki_mut();
        ki.wVk = vk;
        ki.wScan = scan;
        ki.dwFlags = flags;
        ki.dwExtraInfo = INJECTED_MARKER;
        input
    }
}

/// Virtual-key code for non-character keys; characters have none.
fn virtual_key(key: Key) -> u32 {
    match key {
        Key::Backspace => VK_BACK as u32,
        Key::Escape => VK_ESCAPE as u32,
        Key::Other(code) => code,
        Key::Char(_) => 0,
    }
}

fn key_inputs(key: Key, up: bool) -> Vec<INPUT> {
    let up_flag = if up { KEYEVENTF_KEYUP } else { 0 };
    match key {
        Key::Char(c) => {
            let mut units = [0u16; 2];
            c.encode_utf16(&mut units)
                .iter()
                .map(|unit| keyboard_input(0, *unit, KEYEVENTF_UNICODE | up_flag))
                .collect()
        }
        Key::Backspace | Key::Escape | Key::Other(_) => {
            vec![keyboard_input(virtual_key(key) as u16, 0, up_flag)]
        }
    }
}

fn send_inputs(mut inputs: Vec<INPUT>) -> std::result::Result<(), InputError> {
    let sent = unsafe {
        SendInput(inputs.len() as u32, inputs.as_mut_ptr(), mem::size_of::<INPUT>() as c_int)
    };
    if sent as usize != inputs.len() {
        return Err(InputError::InjectError(format!(
            "SendInput accepted {} of {} events: {}",
            sent,
            inputs.len(),
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

fn key_lparam(scan_code: u32, up: bool) -> LPARAM {
    let mut lparam = 1 | ((scan_code & 0xFF) << 16);
    if up {
        lparam |= (1 << 30) | (1 << 31);
    }
    lparam as i32 as LPARAM
}

/// Window holding keyboard focus inside the application that owns `window`.
fn focus_window(window: HWND) -> HWND {
    unsafe {
        let thread = GetWindowThreadProcessId(window, ptr::null_mut());
        let mut info: GUITHREADINFO = mem::zeroed();
        info.cbSize = mem::size_of::<GUITHREADINFO>() as DWORD;
        if thread != 0 && GetGUIThreadInfo(thread, &mut info) != 0 && !info.hwndFocus.is_null() {
            info.hwndFocus
        } else {
            window
        }
    }
}

fn post(hwnd: HWND, message: u32, w_param: WPARAM, l_param: LPARAM) -> std::result::Result<(), InputError> {
    if unsafe { PostMessageW(hwnd, message, w_param, l_param) } == 0 {
        return Err(InputError::InjectError(format!(
            "PostMessageW({:#x}) failed: {}",
            message,
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Injects through `SendInput`; replays go straight to the foreign focus
/// window because the picker holds keyboard focus at that moment.
#[derive(Debug, Default)]
pub struct WindowsInjector;

impl WindowsInjector {
    pub fn new() -> Self {
        Self
    }
}

impl SyntheticInputInjector for WindowsInjector {
    fn key_down(&self, key: Key) -> std::result::Result<(), InputError> {
        send_inputs(key_inputs(key, false))
    }

    fn key_up(&self, key: Key) -> std::result::Result<(), InputError> {
        send_inputs(key_inputs(key, true))
    }

    fn paste(&self) -> std::result::Result<(), InputError> {
        send_inputs(vec![
            keyboard_input(VK_CONTROL as u16, 0, 0),
            keyboard_input(VK_V, 0, 0),
            keyboard_input(VK_V, 0, KEYEVENTF_KEYUP),
            keyboard_input(VK_CONTROL as u16, 0, KEYEVENTF_KEYUP),
        ])
    }

    fn replay(&self, app: &FrontmostApplication, key: Key) -> std::result::Result<(), InputError> {
        if app.window == 0 {
            return Err(InputError::InjectError(format!("no window known for {}", app.id)));
        }
        let target = focus_window(app.window as HWND);

        match key {
            Key::Char(c) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units).iter() {
                    post(target, WM_CHAR, *unit as WPARAM, 1)?;
                }
                Ok(())
            }
            Key::Backspace | Key::Escape | Key::Other(_) => {
                let vk = virtual_key(key);
                let scan = unsafe { MapVirtualKeyW(vk, MAPVK_VK_TO_VSC) };
                post(target, WM_KEYDOWN, vk as WPARAM, key_lparam(scan, false))?;
                if key == Key::Backspace {
                    post(target, WM_CHAR, 0x08, key_lparam(scan, false))?;
                }
                post(target, WM_KEYUP, vk as WPARAM, key_lparam(scan, true))
            }
        }
    }
}

/// Focused control of the foreground GUI thread.
#[derive(Debug, Clone, Copy)]
pub struct FocusedControl {
    hwnd: usize,
    thread_id: u32,
}

impl FocusedControl {
    fn hwnd(&self) -> HWND {
        self.hwnd as HWND
    }
}

fn gui_thread_info(thread_id: u32) -> std::result::Result<GUITHREADINFO, ProbeError> {
    unsafe {
        let mut info: GUITHREADINFO = mem::zeroed();
        info.cbSize = mem::size_of::<GUITHREADINFO>() as DWORD;
        if GetGUIThreadInfo(thread_id, &mut info) == 0 {
            return Err(ProbeError::AccessDenied(GetLastError()));
        }
        Ok(info)
    }
}

fn class_name(hwnd: HWND) -> std::result::Result<String, ProbeError> {
    let mut buffer = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, buffer.as_mut_ptr(), buffer.len() as c_int) };
    if len <= 0 {
        return Err(ProbeError::System(format!("GetClassNameW failed: {}", io::Error::last_os_error())));
    }
    Ok(String::from_utf16_lossy(&buffer[..len as usize]))
}

fn is_edit_class(class: &str) -> bool {
    class.eq_ignore_ascii_case("Edit") || class.to_ascii_lowercase().starts_with("richedit")
}

fn rect_from(rect: RECT) -> Rect {
    Rect::from_edges(rect.left, rect.top, rect.right, rect.bottom)
}

/// Caret and focus lookup through `GetGUIThreadInfo` and the classic edit
/// control messages.
#[derive(Debug, Default)]
pub struct Win32Introspection;

impl Win32Introspection {
    pub fn new() -> Self {
        Self
    }
}

impl IntrospectionLayer for Win32Introspection {
    type Element = FocusedControl;

    fn focused_element(&self, pid: u32) -> std::result::Result<FocusedControl, ProbeError> {
        let foreground = unsafe { GetForegroundWindow() };
        if foreground.is_null() {
            return Err(ProbeError::NoFocusedElement);
        }
        let mut owner: DWORD = 0;
        let thread_id = unsafe { GetWindowThreadProcessId(foreground, &mut owner) };
        if owner != pid {
            return Err(ProbeError::NoFocusedElement);
        }

        let info = gui_thread_info(thread_id)?;
        if info.hwndFocus.is_null() {
            return Err(ProbeError::NoFocusedElement);
        }
        Ok(FocusedControl { hwnd: info.hwndFocus as usize, thread_id })
    }

    fn role(&self, element: &FocusedControl) -> std::result::Result<ElementRole, ProbeError> {
        let class = class_name(element.hwnd())?;
        if !is_edit_class(&class) {
            return Ok(ElementRole::Other(class));
        }
        let style = unsafe { GetWindowLongW(element.hwnd(), GWL_STYLE) } as u32;
        if style & (ES_MULTILINE as u32) != 0 {
            Ok(ElementRole::TextArea)
        } else {
            Ok(ElementRole::TextField)
        }
    }

    fn selected_range(&self, element: &FocusedControl) -> std::result::Result<Range<usize>, ProbeError> {
        let class = class_name(element.hwnd())?;
        if is_edit_class(&class) {
            return edit_selection(element.hwnd());
        }

        // controls that draw their own caret still report it to the system
        let info = gui_thread_info(element.thread_id)?;
        if info.hwndCaret.is_null() {
            return Err(ProbeError::NoSelectedRange);
        }
        Ok(0..0)
    }

    fn bounds_for_range(
        &self,
        element: &FocusedControl,
        _range: Range<usize>,
    ) -> std::result::Result<Rect, ProbeError> {
        let info = gui_thread_info(element.thread_id)?;
        if info.hwndCaret.is_null() {
            return Err(ProbeError::NoBoundsForRange);
        }

        let mut top_left = POINT { x: info.rcCaret.left, y: info.rcCaret.top };
        if unsafe { ClientToScreen(info.hwndCaret, &mut top_left) } == 0 {
            return Err(ProbeError::System("ClientToScreen failed".into()));
        }
        let caret = rect_from(info.rcCaret);
        Ok(Rect::new(top_left.x, top_left.y, caret.width.max(1), caret.height))
    }

    fn frame(&self, element: &FocusedControl) -> std::result::Result<Rect, ProbeError> {
        let mut rect: RECT = unsafe { mem::zeroed() };
        if unsafe { GetWindowRect(element.hwnd(), &mut rect) } == 0 {
            return Err(ProbeError::NoFrame);
        }
        Ok(rect_from(rect))
    }
}

/// Work areas from the monitor layout.
#[derive(Debug, Default)]
pub struct MonitorGeometry;

impl ScreenGeometry for MonitorGeometry {
    fn work_area(&self, near: Option<Point>) -> Rect {
        let (point, flags) = match near {
            Some(p) => (POINT { x: p.x, y: p.y }, MONITOR_DEFAULTTONEAREST),
            None => (POINT { x: 0, y: 0 }, MONITOR_DEFAULTTOPRIMARY),
        };
        unsafe {
            let monitor = MonitorFromPoint(point, flags);
            let mut info: MONITORINFO = mem::zeroed();
            info.cbSize = mem::size_of::<MONITORINFO>() as DWORD;
            if !monitor.is_null() && GetMonitorInfoW(monitor, &mut info) != 0 {
                return rect_from(info.rcWork);
            }
            Rect::new(0, 0, GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN))
        }
    }
}

/// Asks an edit control for its selection without blocking on a hung owner.
fn edit_selection(hwnd: HWND) -> std::result::Result<Range<usize>, ProbeError> {
    let mut start: DWORD = 0;
    let mut end: DWORD = 0;
    let mut result: DWORD_PTR = 0;
    let sent = unsafe {
        SendMessageTimeoutW(
            hwnd,
            EM_GETSEL,
            &mut start as *mut DWORD as WPARAM,
            &mut end as *mut DWORD as LPARAM,
            SMTO_ABORTIFHUNG,
            FOREIGN_MESSAGE_TIMEOUT_MS,
            &mut result,
        )
    };
    if sent == 0 {
        return Err(ProbeError::System(format!(
            "EM_GETSEL got no answer within {}ms: {}",
            FOREIGN_MESSAGE_TIMEOUT_MS,
            io::Error::last_os_error()
        )));
    }
    Ok(start as usize..end as usize)
}
