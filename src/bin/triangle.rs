use core::ffi::CStr;

use bytemuck::cast_slice;
use firstlight::{vk, Instance, MemoryHeap, Pipelines, Renderer, Swapchain};
use glam::{Mat4, Vec3};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;

const FRAMES_IN_FLIGHT: usize = 2;

fn main() {
    use logger::Logger;
    static LOGGER: Logger = Logger;
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .unwrap();

    let sdl = sdl2::init().unwrap();
    let time = sdl.timer().unwrap();
    let video = sdl.video().unwrap();
    let window = video.window("Hello, Triangle!", 480, 480).vulkan().build().unwrap();

    let app_name = unsafe { CStr::from_bytes_with_nul_unchecked(b"triangle demo\0") };
    let instance = Instance::new(&window, app_name).unwrap();
    let surface = firstlight::create_surface(
        &instance,
        window.display_handle().unwrap().as_raw(),
        window.window_handle().unwrap().as_raw(),
    )
    .unwrap();

    let physical_device = firstlight::get_physical_device(&instance, &surface).unwrap();
    let device = physical_device.create_device(&instance).unwrap();

    let device_local_memory = physical_device
        .find_memory_type(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        .expect("every vulkan device has device-local memory");
    let host_visible_memory = physical_device
        .find_memory_type(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
        .expect("every vulkan device has host-visible, host-coherent memory");
    let mut device_local_heap = MemoryHeap::new(&device, device_local_memory, format_args!("device-local heap"));
    let mut host_visible_heap = MemoryHeap::new(&device, host_visible_memory, format_args!("host-visible heap"));

    let (width, height) = window.vulkan_drawable_size();
    let extent = vk::Extent2D { width, height };
    let swapchain = Swapchain::new(&device, &physical_device, surface, extent, &mut device_local_heap).unwrap();

    let vertex_shader = firstlight::include_words!("../../shaders/spirv/triangle.vert.spv");
    let fragment_shader = firstlight::include_words!("../../shaders/spirv/triangle.frag.spv");
    let pipelines = Pipelines::new(&device, vertex_shader, fragment_shader, extent).unwrap();
    let framebuffers = firstlight::Framebuffers::new(&device, &pipelines, &swapchain).unwrap();

    // Interleaved positions and colors, one corner of each primary color.
    let vertices = [
        Vec3::new(0.0, -0.5, 0.5),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.5, 0.5, 0.5),
        Vec3::new(0.0, 1.0, 0.0),
        Vec3::new(-0.5, 0.5, 0.5),
        Vec3::new(0.0, 0.0, 1.0),
    ];
    let vertex_bytes: &[u8] = cast_slice(&vertices);
    let buffer_create_info = vk::BufferCreateInfo::default()
        .size(vertex_bytes.len() as vk::DeviceSize)
        .usage(vk::BufferUsageFlags::VERTEX_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let vertex_buffer = host_visible_heap
        .create_buffer(buffer_create_info, vertex_bytes, format_args!("triangle vertices"))
        .unwrap();

    let mut renderer = Renderer::new(&device, FRAMES_IN_FLIGHT, swapchain.image_count()).unwrap();

    let mut event_pump = sdl.event_pump().unwrap();
    'main: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    keycode: Some(Keycode::Escape),
                    ..
                } => break 'main,
                _ => {}
            }
        }

        let transform = Mat4::from_rotation_z(time.ticks() as f32 / 1000.0);
        match renderer.render_frame(&swapchain, &pipelines, &framebuffers, &vertex_buffer, vertices.len() as u32 / 2, transform) {
            Ok(()) => {}
            Err(firstlight::RenderError::SwapchainOutOfDate) => {
                // The window is fixed-size, so this only happens when the
                // surface is going away.
                log::info!("swapchain out of date, exiting");
                break 'main;
            }
            Err(err) => {
                log::error!("failed to render frame: {err}");
                break 'main;
            }
        }
    }
    device.wait_idle().unwrap();
}

mod logger {
    use log::{Level, Log, Metadata, Record};

    pub struct Logger;

    impl Log for Logger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                let message = format!("{}", record.args());
                let file = record.file().unwrap_or("");
                let line = record.line().unwrap_or(0);
                let is_vk_debug_utils_print = file.ends_with("debug_utils.rs");
                let mut log_level = record.level();
                if is_vk_debug_utils_print && message.contains("[Loader Message]") {
                    log_level = Level::Trace;
                }
                let (color_code, color_end) = if cfg!(target_family = "unix") {
                    let start = match log_level {
                        Level::Trace => "\u{1B}[34m", /* blue */
                        Level::Debug => "\u{1B}[36m", /* cyan */
                        Level::Info => "\u{1B}[32m",  /* green */
                        Level::Warn => "\u{1B}[33m",  /* yellow */
                        Level::Error => "\u{1B}[31m", /* red */
                    };
                    (start, "\u{1B}[m")
                } else {
                    ("", "")
                };
                if log_level < Level::Trace {
                    if is_vk_debug_utils_print {
                        if let Some((tag, msg)) = message.split_once("] ") {
                            eprintln!("{color_code}{tag}]{color_end} {msg}");
                        } else {
                            eprintln!("{color_code}[VK_EXT_debug_utils]{color_end} {message}");
                        }
                    } else {
                        eprintln!("{color_code}[{file}:{line}]{color_end} {message}");
                    }
                }
            }
        }

        fn flush(&self) {
            use std::io::Write;
            let mut stderr = std::io::stderr().lock();
            let _ = stderr.flush();
        }
    }
}
