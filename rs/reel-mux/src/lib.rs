//! Matroska/EBML packaging for H.264/H.265 video and AAC/G.711 audio
//! frames: variable-length-integer and master-element encoding, Annex-B /
//! AVCC NAL-unit adaptation, SPS/HEVC parameter-set parsing, and the
//! Matroska fragment generator that ties them together.

pub mod bitreader;
pub mod ebml;
pub mod error;
pub mod mkv;
pub mod model;
pub mod nal;
pub mod sps;

pub use error::{Error, Result};
pub use mkv::generator::{Generator, GeneratorConfig, GeneratorState};
pub use mkv::{NalAdaptationMask, PackagedFrame, Tag};
pub use model::{AudioInfo, Frame, FrameFlags, TrackInfo, TrackKind, TrackMedia, VideoInfo};
