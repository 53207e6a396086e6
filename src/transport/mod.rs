pub mod accumulator;
pub mod frame_parser;
pub mod line_reader;

pub use accumulator::{DeltaAccumulator, DeltaUpdate, delta_from_payload};
pub use frame_parser::{FrameEvent, FrameParser};
pub use line_reader::LineReader;
