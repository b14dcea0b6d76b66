//! Assembles Matroska headers, clusters, and simple blocks from a sequence
//! of frames, extracting codec-private data from inline parameter sets when
//! the caller hasn't supplied it up front.

use bytes::{BufMut, Bytes, BytesMut};

use super::ids;
use super::{NalAdaptationMask, PackagedFrame, Tag};
use crate::ebml;
use crate::error::{Error, Result};
use crate::model::{Frame, TrackInfo, TrackKind, TrackMedia};
use crate::nal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
	New,
	StreamStart,
	ClusterStart,
	Block,
	Eos,
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
	/// Nanoseconds represented by a single Matroska tick.
	pub timecode_scale_ns: u64,
	/// Target fragment (cluster) duration, in 100-ns ticks.
	pub target_fragment_duration: u64,
	pub key_frame_fragmentation: bool,
	pub nal_adaptation_mask: NalAdaptationMask,
}

impl Default for GeneratorConfig {
	fn default() -> Self {
		Self {
			timecode_scale_ns: 1_000_000, // 1 ms, matching the Matroska default
			target_fragment_duration: 20_000_000, // 2s in 100ns ticks
			key_frame_fragmentation: false,
			nal_adaptation_mask: NalAdaptationMask::None,
		}
	}
}

pub struct Generator {
	config: GeneratorConfig,
	state: GeneratorState,
	primary_video_track: Option<u64>,
	cluster_start_hns: u64,
	session_sequence: u64,
}

impl Generator {
	pub fn new(config: GeneratorConfig, primary_video_track: Option<u64>) -> Self {
		Self {
			config,
			state: GeneratorState::New,
			primary_video_track,
			cluster_start_hns: 0,
			session_sequence: 0,
		}
	}

	pub fn state(&self) -> GeneratorState {
		self.state
	}

	fn hns_to_ticks(&self, hns: u64) -> u64 {
		let scale_hns = (self.config.timecode_scale_ns / 100).max(1);
		hns / scale_hns
	}

	/// Packages one frame, emitting headers and/or a new cluster as needed.
	/// `tracks` is the caller-owned track list; codec-private data and
	/// derived video/audio parameters are written back into it the first
	/// time they're recovered from an inline parameter set.
	pub fn put_frame(&mut self, frame: &Frame, tracks: &mut [TrackInfo]) -> Result<PackagedFrame> {
		if self.state == GeneratorState::Eos {
			return Err(Error::InvalidState);
		}
		if !tracks.iter().any(|t| t.track_id == frame.track_id) {
			return Err(Error::UnknownTrack(frame.track_id));
		}

		self.maybe_extract_cpd(frame, tracks)?;

		let track_idx = tracks.iter().position(|t| t.track_id == frame.track_id).unwrap();
		let payload = self.adapt_payload(frame, &tracks[track_idx])?;

		let mut out = BytesMut::new();
		let stream_start = self.state == GeneratorState::New;
		let mut cluster_start = stream_start;

		if stream_start {
			out.put(self.encode_ebml_header().as_slice());
			out.put(ebml::encode_master_unknown_size(ids::SEGMENT).as_slice());
			out.put(self.encode_segment_info()?.as_slice());
			out.put(self.encode_tracks(tracks)?.as_slice());
			self.cluster_start_hns = frame.decoding_ts;
		} else if self.should_start_new_cluster(frame) {
			cluster_start = true;
			self.cluster_start_hns = frame.decoding_ts;
		}

		if cluster_start {
			out.put(self.encode_cluster_open(frame.decoding_ts).as_slice());
		}

		let block = self.encode_simple_block(frame, &payload)?;
		out.put(block.as_slice());

		self.state = if cluster_start {
			GeneratorState::ClusterStart
		} else {
			GeneratorState::Block
		};
		self.session_sequence += 1;

		Ok(PackagedFrame {
			bytes: out.freeze(),
			fragment_start: cluster_start,
			cluster_start,
			stream_start,
			fragment_pts: frame.presentation_ts,
			fragment_dts: frame.decoding_ts,
			session_sequence: self.session_sequence,
		})
	}

	/// Releases generator state and returns to `New`. No void padding is
	/// emitted; the unknown-size Segment/Cluster simply end wherever the
	/// last byte was written.
	pub fn reset(&mut self) {
		self.state = GeneratorState::New;
		self.cluster_start_hns = 0;
	}

	pub fn close(&mut self) {
		self.state = GeneratorState::Eos;
	}

	fn should_start_new_cluster(&self, frame: &Frame) -> bool {
		if !frame.is_key_frame() || Some(frame.track_id) != self.primary_video_track {
			return false;
		}
		let elapsed = frame.decoding_ts.saturating_sub(self.cluster_start_hns);
		self.config.key_frame_fragmentation || elapsed >= self.config.target_fragment_duration
	}

	fn maybe_extract_cpd(&self, frame: &Frame, tracks: &mut [TrackInfo]) -> Result<()> {
		if !frame.is_key_frame() {
			return Ok(());
		}
		// Inline parameter sets are only found by scanning for Annex-B start
		// codes; a frame payload already in AVCC framing has no start codes
		// to find, so there's nothing to extract from here.
		if self.config.nal_adaptation_mask == NalAdaptationMask::AvccNals {
			return Ok(());
		}
		let track = match tracks.iter_mut().find(|t| t.track_id == frame.track_id) {
			Some(t) if t.track_type == TrackKind::Video && t.codec_private_data.is_none() => t,
			_ => return Ok(()),
		};
		let is_hevc = track.is_hevc();
		let scanner = nal::AnnexBScanner::new(&frame.payload);
		let mut vps = None;
		let mut sps = None;
		let mut pps = None;
		for unit in scanner {
			if is_hevc {
				match unit.first().map(|b| (b >> 1) & 0x3F) {
					Some(32) => vps = Some(unit),
					Some(33) => sps = Some(unit),
					Some(34) => pps = Some(unit),
					_ => {}
				}
			} else {
				match unit.first().map(|b| b & 0x1F) {
					Some(7) => sps = Some(unit),
					Some(8) => pps = Some(unit),
					_ => {}
				}
			}
		}
		let (cpd, width, height) = if is_hevc {
			let (vps, sps, pps) = match (vps, sps, pps) {
				(Some(v), Some(s), Some(p)) => (v, s, p),
				_ => return Ok(()),
			};
			let cpd = nal::build_hvcc_cpd(vps, sps, pps)?;
			let rbsp = crate::bitreader::strip_emulation_prevention(&sps[2..]);
			let parsed = crate::sps::parse_h265_sps(&rbsp)?;
			(cpd, parsed.width, parsed.height)
		} else {
			let (sps, pps) = match (sps, pps) {
				(Some(s), Some(p)) => (s, p),
				_ => return Ok(()),
			};
			let cpd = nal::build_avcc_cpd(sps, pps)?;
			let rbsp = crate::bitreader::strip_emulation_prevention(&sps[1..]);
			let parsed = crate::sps::parse_h264_sps(&rbsp)?;
			(cpd, parsed.width, parsed.height)
		};
		track.codec_private_data = Some(Bytes::from(cpd));
		track.media = TrackMedia::Video(crate::model::VideoInfo { width, height });
		Ok(())
	}

	fn adapt_payload(&self, frame: &Frame, track: &TrackInfo) -> Result<Bytes> {
		if track.track_type != TrackKind::Video {
			return Ok(frame.payload.clone());
		}
		match self.config.nal_adaptation_mask {
			NalAdaptationMask::AnnexBNals => Ok(Bytes::from(nal::annexb_to_avcc_frame(&frame.payload)?)),
			NalAdaptationMask::AvccNals => {
				let mut buf = frame.payload.to_vec();
				nal::avcc_to_annexb_in_place(&mut buf)?;
				Ok(Bytes::from(buf))
			}
			NalAdaptationMask::AnnexBCpdNals | NalAdaptationMask::None => Ok(frame.payload.clone()),
		}
	}

	fn encode_ebml_header(&self) -> Vec<u8> {
		let mut body = Vec::new();
		body.extend(ebml::encode_master(ids::EBML_VERSION, &ebml::encode_uint(1)).unwrap());
		body.extend(ebml::encode_master(ids::EBML_READ_VERSION, &ebml::encode_uint(1)).unwrap());
		body.extend(ebml::encode_master(ids::EBML_MAX_ID_LENGTH, &ebml::encode_uint(4)).unwrap());
		body.extend(ebml::encode_master(ids::EBML_MAX_SIZE_LENGTH, &ebml::encode_uint(8)).unwrap());
		body.extend(ebml::encode_master(ids::DOC_TYPE, &ebml::encode_string("matroska")).unwrap());
		body.extend(ebml::encode_master(ids::DOC_TYPE_VERSION, &ebml::encode_uint(4)).unwrap());
		body.extend(ebml::encode_master(ids::DOC_TYPE_READ_VERSION, &ebml::encode_uint(2)).unwrap());
		ebml::encode_master(ids::EBML, &body).unwrap()
	}

	fn encode_segment_info(&self) -> Result<Vec<u8>> {
		let mut body = Vec::new();
		body.extend(ebml::encode_master(
			ids::TIMECODE_SCALE,
			&ebml::encode_uint(self.config.timecode_scale_ns),
		)?);
		body.extend(ebml::encode_master(ids::MUXING_APP, &ebml::encode_string("reel-mux"))?);
		body.extend(ebml::encode_master(ids::WRITING_APP, &ebml::encode_string("reel-mux"))?);
		ebml::encode_master(ids::SEGMENT_INFO, &body)
	}

	fn encode_tracks(&self, tracks: &[TrackInfo]) -> Result<Vec<u8>> {
		let mut body = Vec::new();
		for track in tracks {
			body.extend(self.encode_track_entry(track)?);
		}
		ebml::encode_master(ids::TRACKS, &body)
	}

	fn encode_track_entry(&self, track: &TrackInfo) -> Result<Vec<u8>> {
		let mut body = Vec::new();
		body.extend(ebml::encode_master(ids::TRACK_NUMBER, &ebml::encode_uint(track.track_id))?);
		body.extend(ebml::encode_master(ids::TRACK_UID, &ebml::encode_uint(track.track_id))?);
		let track_type = match track.track_type {
			TrackKind::Video => 1,
			TrackKind::Audio => 2,
			TrackKind::Unknown => 3,
		};
		body.extend(ebml::encode_master(ids::TRACK_TYPE, &ebml::encode_uint(track_type))?);
		body.extend(ebml::encode_master(ids::FLAG_LACING, &ebml::encode_uint(0))?);
		body.extend(ebml::encode_master(ids::CODEC_ID, &ebml::encode_string(&track.codec_id))?);
		if !track.track_name.is_empty() {
			body.extend(ebml::encode_master(ids::NAME, &ebml::encode_string(&track.track_name))?);
		}
		if let Some(cpd) = &track.codec_private_data {
			body.extend(ebml::encode_master(ids::CODEC_PRIVATE, &ebml::encode_binary(cpd))?);
		}
		match track.media {
			TrackMedia::Video(video) => {
				let mut video_body = Vec::new();
				video_body.extend(ebml::encode_master(ids::PIXEL_WIDTH, &ebml::encode_uint(video.width as u64))?);
				video_body.extend(ebml::encode_master(ids::PIXEL_HEIGHT, &ebml::encode_uint(video.height as u64))?);
				body.extend(ebml::encode_master(ids::VIDEO, &video_body)?);
			}
			TrackMedia::Audio(audio) => {
				let mut audio_body = Vec::new();
				audio_body.extend(ebml::encode_master(
					ids::SAMPLING_FREQUENCY,
					&ebml::encode_float64(audio.sampling_hz as f64),
				)?);
				audio_body.extend(ebml::encode_master(ids::CHANNELS, &ebml::encode_uint(audio.channels as u64))?);
				if audio.bit_depth > 0 {
					audio_body.extend(ebml::encode_master(ids::BIT_DEPTH, &ebml::encode_uint(audio.bit_depth as u64))?);
				}
				body.extend(ebml::encode_master(ids::AUDIO, &audio_body)?);
			}
			TrackMedia::None => {}
		}
		ebml::encode_master(ids::TRACK_ENTRY, &body)
	}

	fn encode_cluster_open(&self, dts_hns: u64) -> Vec<u8> {
		let mut out = ebml::encode_master_unknown_size(ids::CLUSTER);
		let timecode = self.hns_to_ticks(dts_hns);
		out.extend(ebml::encode_master(ids::TIMECODE, &ebml::encode_uint(timecode)).unwrap());
		out
	}

	fn encode_simple_block(&self, frame: &Frame, payload: &Bytes) -> Result<Vec<u8>> {
		let cluster_ticks = self.hns_to_ticks(self.cluster_start_hns);
		let frame_ticks = self.hns_to_ticks(frame.decoding_ts);
		let relative = frame_ticks as i64 - cluster_ticks as i64;
		if !(i16::MIN as i64..=i16::MAX as i64).contains(&relative) {
			return Err(Error::LargeFrameTimecode);
		}

		let mut body = Vec::with_capacity(4 + payload.len());
		ebml::encode_vlen_into(frame.track_id, None, &mut body)?;
		body.put_i16(relative as i16);
		let mut flags = 0u8;
		if frame.is_key_frame() {
			flags |= ids::block_flags::KEY_FRAME;
		}
		if frame.flags.contains(crate::model::FrameFlags::DISCARDABLE) {
			flags |= ids::block_flags::DISCARDABLE;
		}
		if frame.flags.contains(crate::model::FrameFlags::INVISIBLE) {
			flags |= ids::block_flags::INVISIBLE;
		}
		body.put_u8(flags);
		body.extend_from_slice(payload);

		ebml::encode_master(ids::SIMPLE_BLOCK, &body)
	}
}

/// Generates a standalone `Tags` master with a single `SimpleTag`,
/// producible outside the normal frame stream.
pub fn generate_tag(tag: &Tag) -> Result<Vec<u8>> {
	if tag.name.len() > Tag::MAX_LEN || tag.value.len() > Tag::MAX_LEN {
		return Err(Error::InvalidCpd);
	}
	let mut simple_tag = Vec::new();
	simple_tag.extend(ebml::encode_master(ids::TAG_NAME, &ebml::encode_string(&tag.name))?);
	simple_tag.extend(ebml::encode_master(ids::TAG_STRING, &ebml::encode_string(&tag.value))?);
	let simple_tag = ebml::encode_master(ids::SIMPLE_TAG, &simple_tag)?;

	let targets = ebml::encode_master(ids::TARGETS, &[])?;

	let mut tag_body = Vec::new();
	tag_body.extend(targets);
	tag_body.extend(simple_tag);
	let tag_elem = ebml::encode_master(ids::TAG, &tag_body)?;

	ebml::encode_master(ids::TAGS, &tag_elem)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{FrameFlags, TrackInfo, TrackKind, TrackMedia};

	fn video_track() -> TrackInfo {
		TrackInfo {
			track_id: 1,
			codec_id: "V_MPEG4/ISO/AVC".to_string(),
			track_name: "video".to_string(),
			track_type: TrackKind::Video,
			codec_private_data: None,
			media: TrackMedia::None,
		}
	}

	fn key_frame(payload: &[u8], dts: u64) -> Frame {
		Frame {
			presentation_ts: dts,
			decoding_ts: dts,
			duration: 400_000,
			flags: FrameFlags(FrameFlags::KEY_FRAME),
			track_id: 1,
			payload: Bytes::copy_from_slice(payload),
		}
	}

	#[test]
	fn first_key_frame_extracts_cpd_and_emits_headers() {
		// SPS (1280x720 high profile), PPS, and an IDR slice, Annex-B framed.
		let payload = [
			0, 0, 0, 1, 0x67, 0x42, 0x40, 0x1F, 0x96, 0x54, 0x02, 0x80, 0x2D, 0xC8, 0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80, 0, 0, 0,
			1, 0x65, 0xAA,
		];
		let mut tracks = vec![video_track()];
		let mut generator = Generator::new(GeneratorConfig::default(), Some(1));
		let packaged = generator.put_frame(&key_frame(&payload, 0), &mut tracks).unwrap();

		assert!(packaged.stream_start);
		assert!(packaged.cluster_start);
		assert!(tracks[0].codec_private_data.is_some());
		match tracks[0].media {
			TrackMedia::Video(v) => assert_eq!((v.width, v.height), (1280, 720)),
			_ => panic!("expected video media"),
		}
		assert!(packaged.bytes.windows(ids::SIMPLE_BLOCK.len()).any(|w| w == ids::SIMPLE_BLOCK));
	}

	#[test]
	fn large_frame_timecode_is_rejected() {
		let mut tracks = vec![video_track()];
		tracks[0].codec_private_data = Some(Bytes::from_static(&[1, 2, 3]));
		tracks[0].media = TrackMedia::Video(crate::model::VideoInfo { width: 64, height: 64 });
		let mut generator = Generator::new(GeneratorConfig::default(), Some(1));
		generator.put_frame(&key_frame(&[0, 0, 0, 1, 0x65, 1], 0), &mut tracks).unwrap();

		// 40,000 ticks at 1ms scale = 40s, far beyond the 16-bit signed range.
		let far = Frame {
			flags: FrameFlags(0),
			..key_frame(&[0, 0, 0, 1, 0x41, 1], 400_000_000)
		};
		let err = generator.put_frame(&far, &mut tracks).unwrap_err();
		assert_eq!(err, Error::LargeFrameTimecode);
	}

	#[test]
	fn avcc_nals_mask_adapts_frame_payload_to_annexb() {
		let mut tracks = vec![video_track()];
		tracks[0].codec_private_data = Some(Bytes::from_static(&[1, 2, 3]));
		tracks[0].media = TrackMedia::Video(crate::model::VideoInfo { width: 64, height: 64 });
		let config = GeneratorConfig {
			nal_adaptation_mask: NalAdaptationMask::AvccNals,
			..GeneratorConfig::default()
		};
		let mut generator = Generator::new(config, Some(1));
		// AVCC-framed: 4-byte big-endian length prefix, then the NAL body.
		let avcc_payload = [0, 0, 0, 2, 0x65, 0xAA];
		let packaged = generator.put_frame(&key_frame(&avcc_payload, 0), &mut tracks).unwrap();
		// The SimpleBlock payload should now carry an Annex-B start code.
		assert!(packaged.bytes.windows(4).any(|w| w == [0, 0, 0, 1]));
	}

	#[test]
	fn avcc_nals_mask_skips_inline_cpd_extraction() {
		let mut tracks = vec![video_track()];
		let config = GeneratorConfig {
			nal_adaptation_mask: NalAdaptationMask::AvccNals,
			..GeneratorConfig::default()
		};
		let mut generator = Generator::new(config, Some(1));
		// No start codes in this AVCC-framed payload, so CPD can't and
		// shouldn't be extracted from it.
		let avcc_payload = [0, 0, 0, 2, 0x65, 0xAA];
		generator.put_frame(&key_frame(&avcc_payload, 0), &mut tracks).unwrap();
		assert!(tracks[0].codec_private_data.is_none());
	}

	#[test]
	fn reset_returns_to_new() {
		let mut tracks = vec![video_track()];
		tracks[0].codec_private_data = Some(Bytes::from_static(&[1, 2, 3]));
		tracks[0].media = TrackMedia::Video(crate::model::VideoInfo { width: 64, height: 64 });
		let mut generator = Generator::new(GeneratorConfig::default(), Some(1));
		generator.put_frame(&key_frame(&[0, 0, 0, 1, 0x65, 1], 0), &mut tracks).unwrap();
		generator.reset();
		assert_eq!(generator.state(), GeneratorState::New);
	}
}
