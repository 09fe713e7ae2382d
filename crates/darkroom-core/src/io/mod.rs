pub mod fits;
pub mod fits_writer;
pub mod naming;

pub use fits::{is_compressed, read_frame, read_header, stage_statuses};
pub use fits_writer::write_frame;
