use std::sync::Arc;
use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowId};
use crate::replayer::config::ReplayConfig;
use crate::replayer::profiler::RunSummary;
use crate::replayer::vk::VulkanDevice;
use crate::replayer::workload::Workload;
use crate::replayer::Replayer;

const WINDOW_SIZE: u32 = 512;

/// Replays one iteration per redraw until the window is closed.
pub struct InteractiveApp<'a> {
    config: &'a ReplayConfig,
    workload: &'a Workload,
    window: Option<Arc<Window>>,
    replayer: Option<Replayer<VulkanDevice>>,

    // State
    error: Option<Report>,
    close_requested: bool,
}

impl<'a> InteractiveApp<'a> {
    pub fn new(config: &'a ReplayConfig, workload: &'a Workload) -> Self {
        Self {
            config,
            workload,
            window: None,
            replayer: None,

            error: None,
            close_requested: false,
        }
    }

    pub fn run(mut self) -> Result<RunSummary> {
        let event_loop = EventLoop::new()?;
        event_loop.run_app(&mut self)?;

        if let Some(err) = self.error.take() {
            return Err(err);
        }
        let mut replayer = self
            .replayer
            .take()
            .ok_or_else(|| eyre!("The window closed before the workload was loaded"))?;
        replayer.finish()
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attributes = Window::default_attributes()
            .with_title("dispatch-replay")
            .with_inner_size(PhysicalSize::new(WINDOW_SIZE, WINDOW_SIZE))
            .with_resizable(false);
        let window = Arc::new(event_loop.create_window(attributes)?);

        let device = VulkanDevice::new(&self.config.device, Some(window.clone()))?;
        self.replayer = Some(Replayer::load(device, self.workload)?);
        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: Report) {
        log::error!("Stopping the interactive replay: {}", err);
        self.error = Some(err);
        event_loop.exit();
    }
}

impl ApplicationHandler for InteractiveApp<'_> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.error.is_some() {
            return;
        }
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if self.window.as_ref().map(|w| w.id()) != Some(window_id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            WindowEvent::RedrawRequested => {
                let dispatches = self.config.dispatches_per_iteration;
                if let Some(replayer) = self.replayer.as_mut() {
                    if let Err(err) = replayer.execute_iteration(dispatches) {
                        self.fail(event_loop, err);
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                KeyEvent {
                    logical_key: Key::Named(NamedKey::Escape),
                    state: ElementState::Pressed,
                    ..
                },
                ..
            } => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.close_requested {
            event_loop.exit();
            return;
        }

        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}
