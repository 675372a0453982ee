pub mod render_sink;
pub mod wav_format;
