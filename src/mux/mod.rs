//! Container sinks (`StreamingMuxer`/`BatchMuxer`). Both write
//! through `ffmpeg_next::format::output`; they differ only in when frames
//! arrive: a `BatchMuxer` gets a complete, already-ordered clip in one
//! call ([`crate::ring::FrameRing::drain_for_extract`]'s output), while a
//! [`streaming::StreamingMuxer`] gets frames one at a time as the encoder
//! produces them.

pub mod batch;
pub mod streaming;

use ffmpeg_next as ffmpeg;

/// Codec parameters needed to declare a video stream, independent of any
/// live encoder instance so a muxer can be driven from data alone (e.g. in
/// tests, or once an encoder has already been torn down).
#[derive(Debug, Clone)]
pub struct VideoStreamParams {
    pub codec_id: ffmpeg::codec::Id,
    pub width: u32,
    pub height: u32,
    pub time_base: ffmpeg::Rational,
    pub bit_rate: usize,
}

#[derive(Debug, Clone)]
pub struct AudioStreamParams {
    pub codec_id: ffmpeg::codec::Id,
    pub sample_rate: u32,
    pub channels: u16,
    pub time_base: ffmpeg::Rational,
    pub bit_rate: usize,
}

pub(crate) fn declare_video_stream(
    output: &mut ffmpeg::format::context::Output,
    params: &VideoStreamParams,
) -> crate::error::Result<usize> {
    let codec = ffmpeg::codec::encoder::find(params.codec_id)
        .ok_or(ffmpeg::Error::EncoderNotFound)?;
    let mut stream = output.add_stream(codec)?;
    stream.set_time_base(params.time_base);

    let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()?;
    encoder_ctx.set_width(params.width);
    encoder_ctx.set_height(params.height);
    encoder_ctx.set_time_base(params.time_base);
    encoder_ctx.set_bit_rate(params.bit_rate);
    stream.set_parameters(&encoder_ctx);

    Ok(stream.index())
}

pub(crate) fn declare_audio_stream(
    output: &mut ffmpeg::format::context::Output,
    params: &AudioStreamParams,
) -> crate::error::Result<usize> {
    let codec = ffmpeg::codec::encoder::find(params.codec_id)
        .ok_or(ffmpeg::Error::EncoderNotFound)?;
    let mut stream = output.add_stream(codec)?;
    stream.set_time_base(params.time_base);

    let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .audio()?;
    encoder_ctx.set_rate(params.sample_rate as i32);
    encoder_ctx.set_bit_rate(params.bit_rate);
    stream.set_parameters(&encoder_ctx);

    Ok(stream.index())
}
