// Window collaborator
//
// `update` pumps OS events and must stay on the render thread. The open
// flag is the only part of a window the update thread ever sees.

use crate::config::WindowConfig;
use anyhow::Result;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "window is open" state. Clearing it is the only way either loop
/// is asked to stop.
#[derive(Debug, Clone, Default)]
pub struct OpenFlag(Arc<AtomicBool>);

impl OpenFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Resized { width: u32, height: u32 },
    CloseRequested,
}

pub trait Window {
    /// Create the OS window and mark it open
    fn create(&mut self, config: &WindowConfig) -> Result<()>;

    fn open_flag(&self) -> OpenFlag;

    /// Callable from any thread through the open flag
    fn is_open(&self) -> bool {
        self.open_flag().is_open()
    }

    /// Pump pending OS events. Render thread only.
    fn update(&mut self) -> Vec<WindowEvent>;

    /// Drawable size in physical pixels
    fn size(&self) -> (u32, u32);

    fn set_title(&mut self, _title: &str) {}

    /// Native handles for surface creation, if there is a native window
    fn raw_handles(&self) -> Option<(RawDisplayHandle, RawWindowHandle)> {
        None
    }
}

/// A window with no OS window behind it.
///
/// Each `update` counts as one frame. Scripted events fire on the frame they
/// were scheduled for; with a frame limit the window closes itself once the
/// limit is reached.
#[derive(Debug, Default)]
pub struct HeadlessWindow {
    open: OpenFlag,
    size: (u32, u32),
    title: String,
    frames: u64,
    frame_limit: Option<u64>,
    scripted: VecDeque<(u64, WindowEvent)>,
}

impl HeadlessWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Deliver `event` from the `frame`-th call to `update` (1-based)
    pub fn with_event_at(mut self, frame: u64, event: WindowEvent) -> Self {
        let at = self.scripted.partition_point(|(f, _)| *f <= frame);
        self.scripted.insert(at, (frame, event));
        self
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Window for HeadlessWindow {
    fn create(&mut self, config: &WindowConfig) -> Result<()> {
        self.size = (config.width, config.height);
        self.title = config.title.clone();
        self.open.open();
        log::info!("Headless window '{}' {}x{}", self.title, config.width, config.height);
        Ok(())
    }

    fn open_flag(&self) -> OpenFlag {
        self.open.clone()
    }

    fn is_open(&self) -> bool {
        self.open.is_open()
    }

    fn update(&mut self) -> Vec<WindowEvent> {
        self.frames += 1;

        let mut events = Vec::new();
        while self.scripted.front().is_some_and(|(f, _)| *f <= self.frames) {
            if let Some((_, event)) = self.scripted.pop_front() {
                events.push(event);
            }
        }
        if self.frame_limit.is_some_and(|limit| self.frames >= limit) {
            events.push(WindowEvent::CloseRequested);
        }

        for event in &events {
            match *event {
                WindowEvent::Resized { width, height } => self.size = (width, height),
                WindowEvent::CloseRequested => self.open.close(),
            }
        }
        events
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }
}
