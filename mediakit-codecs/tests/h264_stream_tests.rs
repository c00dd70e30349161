//! H.264 framing repair and end-to-end stream scenarios.

use mediakit_codecs::annexb::{self, AnnexBNalIter};
use mediakit_codecs::{
    CodecFactory, CodecType, H264Config, H264Normalizer, H264StreamFormat, PixelFormat,
    VideoDecoder, VideoEncoder, VideoFrame,
};

const SPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1f, 0x80];
const PPS: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x38, 0x80];
const IDR: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21, 0x80];
const SLICE: &[u8] = &[0x00, 0x00, 0x00, 0x01, 0x41, 0x9a, 0x02, 0x80];

fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}

#[test]
fn test_avcc_unit_gains_four_bytes() {
    let nal = [0x65, 0x88, 0x84, 0x00, 0x21, 0x80];
    let mut avcc = (nal.len() as u32).to_be_bytes().to_vec();
    avcc.extend_from_slice(&nal);

    let mut normalizer = H264Normalizer::new();
    let out = normalizer.normalize(&avcc);
    assert_eq!(out.len(), nal.len() + 4);
    assert_eq!(&out[..4], &[0x00, 0x00, 0x00, 0x01]);
    assert_eq!(&out[4..], &nal);
}

#[test]
fn test_cached_parameter_sets_prepended_on_tenth_call() {
    let mut normalizer = H264Normalizer::new();
    let keyframe = concat(&[SPS, PPS, IDR]);
    assert_eq!(normalizer.normalize(&keyframe), keyframe.as_slice());

    for _ in 0..8 {
        normalizer.normalize(SLICE);
    }

    let out = normalizer.normalize(IDR).to_vec();
    assert_eq!(out, concat(&[SPS, PPS, IDR]));
    let kinds: Vec<_> = AnnexBNalIter::new(&out).map(annexb::nal_unit_type).collect();
    assert_eq!(kinds, vec![Some(7), Some(8), Some(5)]);
}

#[test]
fn test_avcc_encoder_output_is_length_prefixed() {
    let factory = CodecFactory::software();
    let config = H264Config::new(64, 48).with_stream_format(H264StreamFormat::Avcc);
    let encoder = factory.new_video_encoder(CodecType::H264, config.into()).unwrap();
    let decoder = factory.new_video_decoder(CodecType::H264).unwrap();

    let mut frame = VideoFrame::new(64, 48, PixelFormat::I420);
    frame.fill_gray(40);
    let mut packet = vec![0u8; encoder.max_encoded_size()];
    let out = encoder.encode_into(&frame, &mut packet, true).unwrap();
    let packet = &packet[..out.bytes_written];
    assert!(annexb::is_avcc(packet));
    assert!(!packet.starts_with(&[0x00, 0x00, 0x00, 0x01]));

    let mut decoded = VideoFrame::new(64, 48, PixelFormat::I420);
    decoder.decode_into(packet, &mut decoded, 0, true).unwrap();
    assert_eq!((decoded.width, decoded.height), (64, 48));
    assert!(decoded.plane(0).unwrap().iter().all(|&y| y == 40));
}

#[test]
fn test_gray_stream_at_qvga_decodes() {
    let factory = CodecFactory::software();
    let config = H264Config::new(320, 240)
        .with_bitrate(500_000)
        .with_framerate(30)
        .with_keyframe_interval(30);
    let encoder = factory.new_video_encoder(CodecType::H264, config.into()).unwrap();
    let decoder = factory.new_video_decoder(CodecType::H264).unwrap();

    let mut frame = VideoFrame::new(320, 240, PixelFormat::I420);
    frame.fill_gray(128);
    let mut packet = vec![0u8; encoder.max_encoded_size()];
    let mut decoded = VideoFrame::new(320, 240, PixelFormat::I420);
    let mut decoded_count = 0;
    let mut keyframes = 0;

    for i in 0..20u64 {
        frame.timestamp = i * 90_000 / 30;
        let out = encoder.encode_into(&frame, &mut packet, i == 0).unwrap();
        keyframes += usize::from(out.is_keyframe);
        let result = decoder.decode_into(
            &packet[..out.bytes_written],
            &mut decoded,
            frame.timestamp,
            out.is_keyframe,
        );
        match result {
            Ok(()) => {
                decoded_count += 1;
                assert_eq!((decoded.width, decoded.height), (320, 240));
            }
            Err(e) => assert!(e.is_need_more_data(), "{e}"),
        }
    }

    assert!(decoded_count >= 1);
    assert_eq!(keyframes, 1);
}

#[test]
fn test_stripped_keyframe_recovers_from_cache() {
    let factory = CodecFactory::software();
    let encoder = factory
        .new_video_encoder(CodecType::H264, H264Config::new(48, 32).into())
        .unwrap();
    let decoder = factory.new_video_decoder(CodecType::H264).unwrap();

    let mut frame = VideoFrame::new(48, 32, PixelFormat::I420);
    frame.fill_gray(200);
    let mut packet = vec![0u8; encoder.max_encoded_size()];
    let mut decoded = VideoFrame::new(48, 32, PixelFormat::I420);

    let out = encoder.encode_into(&frame, &mut packet, true).unwrap();
    decoder
        .decode_into(&packet[..out.bytes_written], &mut decoded, 0, true)
        .unwrap();

    encoder.request_keyframe();
    let out = encoder.encode_into(&frame, &mut packet, false).unwrap();
    assert!(out.is_keyframe);
    let idr = AnnexBNalIter::new(&packet[..out.bytes_written])
        .find(|nal| annexb::nal_unit_type(nal) == Some(5))
        .unwrap();
    let idr_only = concat(&[&annexb::START_CODE[..], idr]);

    decoded.fill_gray(0);
    decoder.decode_into(&idr_only, &mut decoded, 1, true).unwrap();
    assert!(decoded.keyframe);
    assert!(decoded.plane(0).unwrap().iter().all(|&y| y == 200));
}
