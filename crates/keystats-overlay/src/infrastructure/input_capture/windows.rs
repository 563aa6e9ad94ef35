//! Windows low-level keyboard and mouse hook implementation.
//!
//! Each [`WindowsHookSource`] owns one hook (`WH_KEYBOARD_LL` or
//! `WH_MOUSE_LL`) installed on its own Win32 message-loop thread.  Low-level
//! hook callbacks receive no user pointer, so the callback finds its sender
//! and pressed set through a process-wide slot per source kind.  `start`
//! fills the slot and `stop` empties it.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, UnhookWindowsHookEx, HC_ACTION, HOOKPROC, KBDLLHOOKSTRUCT, MSG,
    MSLLHOOKSTRUCT, PM_NOREMOVE, WH_KEYBOARD_LL, WH_MOUSE_LL, WINDOWS_HOOK_ID, WM_KEYDOWN,
    WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEHWHEEL,
    WM_MOUSEWHEEL, WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_USER,
    WM_XBUTTONDOWN, WM_XBUTTONUP, XBUTTON1,
};

use keystats_core::{InputSignal, KeyCode, SourceKind};

use super::{
    mouse_button_code, normalize_wheel, CaptureError, EdgeFilter, InputSource, MouseButton,
    RawAction, SignalSender,
};

/// What a hook callback needs to deliver edges for one source.
struct HookRegistration {
    filter: Arc<EdgeFilter>,
    sender: SignalSender,
}

impl HookRegistration {
    fn on_action(&self, code: KeyCode, action: RawAction) {
        if let Some(edge) = self.filter.classify(code, action) {
            self.sender.push(InputSignal::Edge(edge));
        }
    }

    fn on_wheel(&self, raw_delta: i32) {
        if let Some(delta) = normalize_wheel(raw_delta) {
            self.sender.push(InputSignal::Wheel(delta));
        }
    }
}

static KEYBOARD_SLOT: Mutex<Option<HookRegistration>> = Mutex::new(None);
static MOUSE_SLOT: Mutex<Option<HookRegistration>> = Mutex::new(None);

fn slot_for(kind: SourceKind) -> &'static Mutex<Option<HookRegistration>> {
    match kind {
        SourceKind::Keyboard => &KEYBOARD_SLOT,
        SourceKind::Mouse => &MOUSE_SLOT,
    }
}

/// Runs `f` against the registration for `slot` without ever blocking.
///
/// The lock is only contended while `start`/`stop` swap the slot; an event
/// arriving in that instant is skipped.
fn with_registration(slot: &Mutex<Option<HookRegistration>>, f: impl FnOnce(&HookRegistration)) {
    if let Ok(guard) = slot.try_lock() {
        if let Some(registration) = guard.as_ref() {
            f(registration);
        }
    }
}

/// Running hook thread for one source.
struct HookThread {
    thread_id: u32,
    handle: JoinHandle<()>,
}

/// Windows low-level hook source for one device kind.
pub struct WindowsHookSource {
    kind: SourceKind,
    sender: SignalSender,
    filter: Arc<EdgeFilter>,
    thread: Mutex<Option<HookThread>>,
}

impl WindowsHookSource {
    pub fn new(kind: SourceKind, sender: SignalSender) -> Self {
        Self {
            kind,
            sender,
            filter: Arc::new(EdgeFilter::new(kind)),
            thread: Mutex::new(None),
        }
    }

    /// Empties the process-wide slot if this source owns it.
    fn release_slot(&self) {
        let mut slot = slot_for(self.kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot
            .as_ref()
            .is_some_and(|reg| Arc::ptr_eq(&reg.filter, &self.filter))
        {
            *slot = None;
        }
    }
}

impl InputSource for WindowsHookSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn start(&self) -> Result<(), CaptureError> {
        let mut running = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        {
            let mut slot = slot_for(self.kind)
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                return Err(CaptureError::SlotTaken(self.kind));
            }
            *slot = Some(HookRegistration {
                filter: Arc::clone(&self.filter),
                sender: self.sender.clone(),
            });
        }

        let kind = self.kind;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32, i32>>();
        let handle = match thread::Builder::new()
            .name(format!("keystats-{kind}-hook"))
            .spawn(move || run_hook_thread(kind, ready_tx))
        {
            Ok(handle) => handle,
            Err(source) => {
                self.release_slot();
                return Err(CaptureError::ThreadSpawn { kind, source });
            }
        };

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                info!("{kind} hook installed (thread {thread_id})");
                *running = Some(HookThread { thread_id, handle });
                Ok(())
            }
            Ok(Err(code)) => {
                let _ = handle.join();
                self.release_slot();
                Err(CaptureError::HookInstallFailed { kind, code })
            }
            Err(_) => {
                let _ = handle.join();
                self.release_slot();
                Err(CaptureError::HookThreadExited(kind))
            }
        }
    }

    fn stop(&self) {
        let taken = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(HookThread { thread_id, handle }) = taken {
            // SAFETY: Posting WM_QUIT to a thread id we obtained from that
            // thread; the thread's message queue was created before the id
            // was reported.
            match unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) } {
                Ok(()) => {
                    if handle.join().is_err() {
                        warn!("{} hook thread panicked", self.kind);
                    }
                    info!("{} hook removed", self.kind);
                }
                Err(e) => warn!("failed to stop {} hook thread: {e}", self.kind),
            }
        }

        self.release_slot();
        self.filter.clear();
    }

    fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for WindowsHookSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the dedicated hook thread.
///
/// Reports `Ok(thread_id)` or `Err(platform_code)` on `ready` exactly once,
/// then pumps messages until `WM_QUIT`.
fn run_hook_thread(kind: SourceKind, ready: std_mpsc::Sender<Result<u32, i32>>) {
    let (hook_id, hook_proc): (WINDOWS_HOOK_ID, HOOKPROC) = match kind {
        SourceKind::Keyboard => (WH_KEYBOARD_LL, Some(keyboard_hook_proc)),
        SourceKind::Mouse => (WH_MOUSE_LL, Some(mouse_hook_proc)),
    };

    let mut msg = MSG::default();
    // SAFETY: Forces creation of this thread's message queue so that
    // PostThreadMessageW from `stop` cannot race the first GetMessageW.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
    }

    // SAFETY: Low-level hooks need no module handle; the thread runs a
    // message loop below for as long as the hook is installed.
    let hook = match unsafe { SetWindowsHookExW(hook_id, hook_proc, None, 0) } {
        Ok(hook) => hook,
        Err(e) => {
            let _ = ready.send(Err(e.code().0));
            return;
        }
    };

    // SAFETY: No preconditions.
    let thread_id = unsafe { GetCurrentThreadId() };
    if ready.send(Ok(thread_id)).is_err() {
        // SAFETY: `hook` was returned by SetWindowsHookExW above.
        unsafe {
            let _ = UnhookWindowsHookEx(hook);
        }
        return;
    }

    // SAFETY: Standard Win32 GetMessage/DispatchMessage loop.  GetMessageW
    // returns 0 on WM_QUIT and -1 on error; both end the loop.
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            DispatchMessageW(&msg);
        }
        if let Err(e) = UnhookWindowsHookEx(hook) {
            debug!("UnhookWindowsHookEx({kind}) failed: {e}");
        }
    }
}

/// Low-level keyboard hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread.  Must return quickly or Windows
/// removes the hook.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        // SAFETY: l_param points to a KBDLLHOOKSTRUCT when n_code == HC_ACTION.
        let kbs = &*(l_param.0 as *const KBDLLHOOKSTRUCT);

        let action = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(RawAction::Down),
            WM_KEYUP | WM_SYSKEYUP => Some(RawAction::Up),
            _ => None,
        };

        if let Some(action) = action {
            let code = kbs.vkCode as KeyCode;
            with_registration(&KEYBOARD_SLOT, |reg| reg.on_action(code, action));
        }
    }

    // SAFETY: Always forward to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}

/// Low-level mouse hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread; must return quickly.
unsafe extern "system" fn mouse_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code == HC_ACTION as i32 {
        // SAFETY: l_param points to a MSLLHOOKSTRUCT when n_code == HC_ACTION.
        let mhs = &*(l_param.0 as *const MSLLHOOKSTRUCT);
        let high_word = (mhs.mouseData >> 16) as u16;
        let x_button = if high_word == XBUTTON1 {
            MouseButton::X1
        } else {
            MouseButton::X2
        };

        let button = match w_param.0 as u32 {
            WM_LBUTTONDOWN => Some((MouseButton::Left, RawAction::Down)),
            WM_LBUTTONUP => Some((MouseButton::Left, RawAction::Up)),
            WM_RBUTTONDOWN => Some((MouseButton::Right, RawAction::Down)),
            WM_RBUTTONUP => Some((MouseButton::Right, RawAction::Up)),
            WM_MBUTTONDOWN => Some((MouseButton::Middle, RawAction::Down)),
            WM_MBUTTONUP => Some((MouseButton::Middle, RawAction::Up)),
            WM_XBUTTONDOWN => Some((x_button, RawAction::Down)),
            WM_XBUTTONUP => Some((x_button, RawAction::Up)),
            WM_MOUSEWHEEL | WM_MOUSEHWHEEL => {
                let delta = i32::from(high_word as i16);
                with_registration(&MOUSE_SLOT, |reg| reg.on_wheel(delta));
                None
            }
            _ => None,
        };

        if let Some((button, action)) = button {
            let code = mouse_button_code(button);
            with_registration(&MOUSE_SLOT, |reg| reg.on_action(code, action));
        }
    }

    // SAFETY: Always forward to the next hook in the chain.
    CallNextHookEx(None, n_code, w_param, l_param)
}
