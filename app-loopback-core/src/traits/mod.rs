pub mod capture_endpoint;
pub mod loopback_backend;
pub mod ready_signal;
pub mod render_device;
