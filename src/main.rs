use std::time::{Duration, Instant};

use accutrace::{
    config::{AppConfig, Args},
    logging::{init_logging, LoggingConfig},
    App,
};
use winit::{
    dpi::PhysicalSize,
    event::{DeviceEvent, ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::{Window, WindowBuilder},
};

const TITLE_REFRESH: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    let args = Args::from_env()?;
    init_logging(LoggingConfig { env_filter: args.log.clone(), ..Default::default() });
    let config = AppConfig::load(&args)?;

    let event_loop = EventLoop::new();
    let [width, height] = config.window_size;
    let window = WindowBuilder::new()
        .with_title("AccuTrace")
        .with_inner_size(PhysicalSize::new(width, height))
        .build(&event_loop)?;

    let mut app = Some(App::new(&window, config)?);
    let mut last_frame = Instant::now();
    let mut last_title = Instant::now();

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        let Some(running) = app.as_mut() else {
            return;
        };

        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::Resized(size) => running.resize(size.width, size.height),
                WindowEvent::ScaleFactorChanged { new_inner_size, .. } => {
                    running.resize(new_inner_size.width, new_inner_size.height)
                }
                WindowEvent::Focused(false) => {
                    running.fly_cam.release_all();
                }
                WindowEvent::KeyboardInput {
                    input: KeyboardInput { virtual_keycode: Some(key), state, .. },
                    ..
                } => {
                    if key == VirtualKeyCode::R && state == ElementState::Pressed {
                        if let Err(e) = running.reseed() {
                            log::error!("Cannot regenerate the scene: {e:?}");
                        }
                    }
                    if running.fly_cam.on_key(key, state) {
                        lock_cursor(&window, running.fly_cam.is_cursor_locked());
                    }
                }
                WindowEvent::MouseInput { state, button, .. } => running.fly_cam.on_mouse_button(button, state),
                _ => {}
            },
            Event::DeviceEvent { event: DeviceEvent::MouseMotion { delta }, .. } => {
                running.fly_cam.on_mouse_motion(delta);
            }
            Event::MainEventsCleared => {
                let now = Instant::now();
                let dt = now.duration_since(last_frame).as_secs_f32();
                last_frame = now;

                running.update(dt);
                if let Err(e) = running.render() {
                    log::error!("Frame failed: {e:?}");
                    *control_flow = ControlFlow::Exit;
                    return;
                }

                if now.duration_since(last_title) >= TITLE_REFRESH {
                    last_title = now;
                    window.set_title(&format!("AccuTrace | {} samples", running.sample_count()));
                }
            }
            Event::LoopDestroyed => {
                // Vulkan objects go before the window.
                app.take();
            }
            _ => {}
        }
    });
}

fn lock_cursor(window: &Window, locked: bool) {
    if let Err(e) = window.set_cursor_grab(locked) {
        log::warn!("Cannot change cursor grab: {e}");
    }
    window.set_cursor_visible(!locked);
}
