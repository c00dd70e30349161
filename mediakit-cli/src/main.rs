//! Mediakit CLI Application

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mediakit_codecs::{
    AudioDecoder, AudioEncoder, AudioFrame, AudioFramePool, AudioShape, Av1Config, CodecConfig,
    CodecFactory, CodecType, H264Config, OpusConfig, PixelFormat, SampleFormat, VideoDecoder,
    VideoEncoder, VideoFrame, VideoFramePool, VideoParams, VideoShape, VideoTranscoder,
    Vp8Config, Vp9Config,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Tracing filter directive
    #[arg(long, env = "MEDIAKIT_LOG", default_value = "mediakit=info")]
    log_filter: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode synthetic frames and decode them again
    Roundtrip {
        /// Codec name or MIME type (h264, vp8, vp9, av1, opus)
        #[arg(long)]
        codec: CodecType,

        #[command(flatten)]
        video: VideoArgs,
    },

    /// Decode with one codec and re-encode with another
    Transcode {
        #[arg(long)]
        from: CodecType,

        #[arg(long)]
        to: CodecType,

        #[command(flatten)]
        video: VideoArgs,
    },

    /// Parse and validate a JSON codec configuration
    Validate {
        /// Path to the configuration file
        config: PathBuf,
    },
}

#[derive(Args, Clone, Copy)]
struct VideoArgs {
    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Frames (or 20 ms audio packets) to process
    #[arg(long, default_value_t = 30)]
    frames: u32,

    /// Target bitrate in bits per second
    #[arg(long, default_value_t = 500_000)]
    bitrate: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 30)]
    keyframe_interval: u32,

    /// Seed for the synthetic input noise
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

impl VideoArgs {
    fn params(&self) -> VideoParams {
        VideoParams {
            width: self.width,
            height: self.height,
            bitrate: self.bitrate,
            framerate: self.fps,
            keyframe_interval: self.keyframe_interval,
        }
    }

    fn config(&self, codec: CodecType) -> Result<CodecConfig> {
        let video = self.params();
        let config = match codec {
            CodecType::H264 => CodecConfig::H264(H264Config {
                video,
                ..H264Config::new(self.width, self.height)
            }),
            CodecType::Vp8 => CodecConfig::Vp8(Vp8Config { video }),
            CodecType::Vp9 => CodecConfig::Vp9(Vp9Config {
                video,
                ..Vp9Config::new(self.width, self.height)
            }),
            CodecType::Av1 => CodecConfig::Av1(Av1Config { video }),
            CodecType::Opus => bail!("{codec} is not a video codec"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Ticks of the 90 kHz video clock per frame.
    fn frame_ticks(&self) -> u64 {
        90_000 / u64::from(self.fps.max(1))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .init();

    match cli.command {
        Commands::Roundtrip { codec, video } if codec.is_audio() => handle_audio_roundtrip(video),
        Commands::Roundtrip { codec, video } => handle_video_roundtrip(codec, video),
        Commands::Transcode { from, to, video } => handle_transcode(from, to, video),
        Commands::Validate { config } => handle_validate(&config),
    }
}

/// Grey frame with a drifting luma level and per-pixel noise.
fn synth_frame(frame: &mut VideoFrame, index: u32, rng: &mut StdRng) {
    let base = 64 + (index * 4 % 128) as u8;
    frame.fill_yuv(base, 128, 128);
    if let Some(luma) = frame.plane_mut(0) {
        for px in luma.iter_mut() {
            *px = px.saturating_add_signed(rng.gen_range(-8..=8));
        }
    }
}

fn handle_video_roundtrip(codec: CodecType, args: VideoArgs) -> Result<()> {
    let factory = CodecFactory::software();
    let encoder = factory.new_video_encoder(codec, args.config(codec)?)?;
    let decoder = factory.new_video_decoder(codec)?;
    let shape = VideoShape::new(args.width, args.height, PixelFormat::I420);
    let pool = VideoFramePool::new(shape, 2);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut source = VideoFrame::new(args.width, args.height, PixelFormat::I420);
    let mut packet = vec![0u8; encoder.max_encoded_size()];
    let (mut bytes, mut keyframes, mut decoded, mut pending) = (0usize, 0u32, 0u32, 0u32);

    for index in 0..args.frames {
        synth_frame(&mut source, index, &mut rng);
        source.timestamp = u64::from(index) * args.frame_ticks();
        let out = encoder.encode_into(&source, &mut packet, false)?;
        bytes += out.bytes_written;
        keyframes += u32::from(out.is_keyframe);

        let mut picture = pool.get();
        let result = decoder.decode_into(
            &packet[..out.bytes_written],
            &mut picture,
            source.timestamp,
            out.is_keyframe,
        );
        pool.put(picture);
        match result {
            Ok(()) => decoded += 1,
            Err(e) if e.is_need_more_data() => pending += 1,
            Err(e) => return Err(e).context("decode failed"),
        }
    }

    encoder.close();
    decoder.close();

    println!("codec:      {codec}");
    println!("frames:     {}", args.frames);
    println!("bytes:      {bytes}");
    println!("keyframes:  {keyframes}");
    println!("decoded:    {decoded}");
    println!("pending:    {pending}");
    println!("pool:       {:?}", pool.stats());
    Ok(())
}

fn handle_audio_roundtrip(args: VideoArgs) -> Result<()> {
    const SAMPLE_RATE: u32 = 48_000;
    const CHANNELS: u16 = 2;
    const SAMPLES_PER_PACKET: usize = 960;

    let factory = CodecFactory::software();
    let config = OpusConfig::new(SAMPLE_RATE, CHANNELS).with_bitrate(args.bitrate.min(510_000));
    let encoder = factory.new_audio_encoder(CodecType::Opus, CodecConfig::Opus(config))?;
    let decoder = factory.new_audio_decoder(CodecType::Opus, SAMPLE_RATE, CHANNELS)?;
    let shape = AudioShape::new(
        SAMPLE_RATE,
        CHANNELS,
        SampleFormat::S16,
        decoder.max_samples_per_frame(),
    );
    let pool = AudioFramePool::new(shape, 2);
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut samples = vec![0i16; SAMPLES_PER_PACKET * usize::from(CHANNELS)];
    let mut packet = vec![0u8; encoder.max_encoded_size()];
    let (mut bytes, mut decoded_samples) = (0usize, 0usize);

    for index in 0..args.frames {
        for sample in samples.iter_mut() {
            *sample = rng.gen_range(-8000..=8000);
        }
        let mut frame = AudioFrame::from_i16(SAMPLE_RATE, CHANNELS, &samples)?;
        frame.timestamp = u64::from(index) * SAMPLES_PER_PACKET as u64;
        let out = encoder.encode_into(&frame, &mut packet, false)?;
        bytes += out.bytes_written;

        let mut pcm = pool.get();
        let result = decoder.decode_into(&packet[..out.bytes_written], &mut pcm, frame.timestamp);
        decoded_samples += pcm.samples_per_channel;
        pool.put(pcm);
        result.context("decode failed")?;
    }

    encoder.close();
    decoder.close();

    println!("codec:      opus");
    println!("packets:    {}", args.frames);
    println!("bytes:      {bytes}");
    println!("samples:    {decoded_samples}");
    println!("pool:       {:?}", pool.stats());
    Ok(())
}

fn handle_transcode(from: CodecType, to: CodecType, args: VideoArgs) -> Result<()> {
    let factory = CodecFactory::software();
    let source = factory.new_video_encoder(from, args.config(from)?)?;
    let transcoder = VideoTranscoder::new(&factory, from, args.config(to)?)?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    let mut frame = VideoFrame::new(args.width, args.height, PixelFormat::I420);
    let mut packet = vec![0u8; source.max_encoded_size()];
    let mut output = vec![0u8; transcoder.max_encoded_size()];
    let (mut bytes_in, mut bytes_out, mut keyframes) = (0usize, 0usize, 0u32);

    for index in 0..args.frames {
        synth_frame(&mut frame, index, &mut rng);
        frame.timestamp = u64::from(index) * args.frame_ticks();
        let encoded = source.encode_into(&frame, &mut packet, false)?;
        bytes_in += encoded.bytes_written;

        let result = transcoder.transcode_into(
            &packet[..encoded.bytes_written],
            frame.timestamp,
            encoded.is_keyframe,
            &mut output,
        )?;
        if let Some(out) = result {
            bytes_out += out.bytes_written;
            keyframes += u32::from(out.is_keyframe);
        }
    }

    source.close();
    transcoder.close();

    println!("{from} -> {to}");
    println!("frames:     {}", args.frames);
    println!("bytes in:   {bytes_in}");
    println!("bytes out:  {bytes_out}");
    println!("pictures:   {}", transcoder.pictures());
    println!("pending:    {}", transcoder.pending_inputs());
    println!("keyframes:  {keyframes}");
    Ok(())
}

fn handle_validate(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: CodecConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config.validate()?;
    tracing::info!(codec = %config.codec(), "Configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
