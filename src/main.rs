use ash::vk;
use glam::{Mat4, Vec3};
use kestrel::{Model, RenderResult, Renderer, RendererConfig};
use std::time::Instant;

const WINDOW_TITLE: &str = "kestrel";
const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

#[repr(C)]
#[derive(Copy, Clone)]
struct FrameUniforms {
    view_projection: Mat4,
}

struct App {
    renderer: Renderer,
    model: Option<Model>,
    last_frame: Instant,
}

impl App {
    fn new(window: &winit::window::Window, model_path: Option<String>) -> RenderResult<App> {
        let mut renderer = Renderer::new(window, RendererConfig::default())?;
        let model = match model_path {
            Some(path) => Some(Model::load(path, &mut renderer)?),
            None => None,
        };
        Ok(App {
            renderer,
            model,
            last_frame: Instant::now(),
        })
    }

    fn render_one(&mut self) -> RenderResult<()> {
        let dt = self.last_frame.elapsed().as_secs_f32();
        self.last_frame = Instant::now();

        if let Some(model) = self.model.as_mut() {
            model.update_animation(dt);
        }

        let _cmd = self.renderer.begin_frame()?;

        if let Some(model) = self.model.as_mut() {
            model.update_joints(self.renderer.active_slot());
        }

        let extent = self.renderer.extent();
        let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
        let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 1.5, 4.0), Vec3::ZERO, Vec3::Y);
        let mut allocation = self
            .renderer
            .frame_allocate(std::mem::size_of::<FrameUniforms>() as vk::DeviceSize)?;
        allocation.write(&FrameUniforms {
            view_projection: projection * view,
        });

        self.renderer.end_frame()
    }

    fn draw_frame(&mut self, window: &winit::window::Window) {
        match self.render_one() {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                let size = window.inner_size();
                if let Err(e) = self.renderer.resize_swapchain(size.width, size.height) {
                    log::error!("swapchain recovery failed: {e}");
                }
            }
            Err(e) => {
                log::error!("frame failed: {e}");
            }
        }
    }
}

fn init_window(event_loop: &winit::event_loop::EventLoop<()>) -> winit::window::Window {
    winit::window::WindowBuilder::new()
        .with_title(WINDOW_TITLE)
        .with_inner_size(winit::dpi::LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT))
        .build(event_loop)
        .expect("Failed to create window")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let model_path = std::env::args().nth(1);
    let event_loop = winit::event_loop::EventLoop::new().expect("Failed to make event loop");
    let window = init_window(&event_loop);
    let mut app = match App::new(&window, model_path) {
        Ok(app) => app,
        Err(e) => {
            log::error!("renderer init failed: {e}");
            std::process::exit(1);
        }
    };

    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);
    event_loop
        .run(move |event, elwt| match event {
            winit::event::Event::WindowEvent { event, .. } => match event {
                winit::event::WindowEvent::CloseRequested => {
                    elwt.exit();
                }
                winit::event::WindowEvent::RedrawRequested => {
                    app.draw_frame(&window);
                }
                _ => (),
            },
            winit::event::Event::AboutToWait => {
                window.request_redraw();
            }
            _ => (),
        })
        .expect("event loop terminated abnormally");
}
