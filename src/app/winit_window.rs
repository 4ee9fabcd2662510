// Native window - winit, pumped from the render loop
//
// The render loop owns the frame cadence, so winit's event loop is pumped
// with a zero timeout once per frame instead of being handed control.
//
// Keys: ESC closes the window, F11 toggles borderless fullscreen.

use super::window::{OpenFlag, Window, WindowEvent};
use crate::config::WindowConfig;
use anyhow::{Context, Result};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::time::Duration;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent as WinitEvent;
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, WindowAttributes, WindowId};

/// Pumps allowed for the platform to deliver `resumed`
const CREATE_PUMPS: usize = 100;

pub struct WinitWindow {
    event_loop: Option<EventLoop<()>>,
    state: WinitState,
}

#[derive(Default)]
struct WinitState {
    config: WindowConfig,
    window: Option<winit::window::Window>,
    open: OpenFlag,
    is_fullscreen: bool,
    events: Vec<WindowEvent>,
    create_error: Option<anyhow::Error>,
}

impl WinitWindow {
    pub fn new() -> Self {
        Self {
            event_loop: None,
            state: WinitState::default(),
        }
    }

    fn pump(&mut self, timeout: Duration) {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return;
        };
        if let PumpStatus::Exit(code) = event_loop.pump_app_events(Some(timeout), &mut self.state) {
            log::info!("Event loop exited with code {}", code);
            self.state.open.close();
        }
    }
}

impl Default for WinitWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl Window for WinitWindow {
    fn create(&mut self, config: &WindowConfig) -> Result<()> {
        self.state.config = config.clone();
        self.state.is_fullscreen = config.fullscreen;
        self.event_loop = Some(EventLoop::new().context("Failed to create event loop")?);

        for _ in 0..CREATE_PUMPS {
            if self.state.window.is_some() || self.state.create_error.is_some() {
                break;
            }
            self.pump(Duration::from_millis(10));
        }

        if let Some(e) = self.state.create_error.take() {
            return Err(e);
        }
        if self.state.window.is_none() {
            anyhow::bail!("Platform never resumed the event loop, no window was created");
        }

        self.state.open.open();
        Ok(())
    }

    fn open_flag(&self) -> OpenFlag {
        self.state.open.clone()
    }

    fn is_open(&self) -> bool {
        self.state.open.is_open()
    }

    fn update(&mut self) -> Vec<WindowEvent> {
        self.pump(Duration::ZERO);
        std::mem::take(&mut self.state.events)
    }

    fn size(&self) -> (u32, u32) {
        match &self.state.window {
            Some(window) => {
                let size = window.inner_size();
                (size.width, size.height)
            }
            None => (self.state.config.width, self.state.config.height),
        }
    }

    fn set_title(&mut self, title: &str) {
        if let Some(window) = &self.state.window {
            window.set_title(title);
        }
    }

    fn raw_handles(&self) -> Option<(RawDisplayHandle, RawWindowHandle)> {
        let window = self.state.window.as_ref()?;
        Some((window.raw_display_handle(), window.raw_window_handle()))
    }
}

impl WinitState {
    fn toggle_fullscreen(&mut self) {
        if let Some(ref window) = self.window {
            self.is_fullscreen = !self.is_fullscreen;

            if self.is_fullscreen {
                // Enter fullscreen (use current monitor)
                window.set_fullscreen(Some(Fullscreen::Borderless(None)));
                log::info!("Entered fullscreen mode");
            } else {
                window.set_fullscreen(None);
                log::info!("Exited fullscreen mode");
            }
        }
    }

    fn request_close(&mut self) {
        self.open.close();
        self.events.push(WindowEvent::CloseRequested);
    }
}

impl ApplicationHandler for WinitState {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(self.config.width, self.config.height));

        if self.config.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        match event_loop.create_window(window_attributes) {
            Ok(window) => self.window = Some(window),
            Err(e) => self.create_error = Some(anyhow::Error::new(e).context("Failed to create window")),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WinitEvent) {
        match event {
            WinitEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.request_close();
            }

            WinitEvent::Resized(size) => {
                self.events.push(WindowEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
            }

            WinitEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                self.request_close();
                            }
                            KeyCode::F11 => self.toggle_fullscreen(),
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }
}
