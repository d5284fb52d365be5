//! §4.5 sub-detectors.

pub mod electronic_marker;
pub mod hash;
pub mod keyword;
pub mod layout;
pub mod stream_marker;

pub use electronic_marker::ElectronicMarkerDetector;
pub use hash::HashDetector;
pub use keyword::KeywordDetector;
pub use layout::LayoutDetector;
pub use stream_marker::StreamMarkerDetector;
