//! VAAPI (Intel/AMD) hardware video encoder, generalized from a single
//! hardcoded `h264_vaapi` path to either H.264 or HEVC depending on
//! [`crate::config::OutputFormat`].

use ffmpeg_next::{
    self as ffmpeg,
    ffi::{
        av_buffer_ref, av_buffer_unref, av_hwframe_ctx_init, AVHWDeviceContext,
        AVHWFramesContext, AVPixelFormat,
    },
    Rational,
};

use crate::color::ColorConverter;
use crate::config::QualityPreset;
use crate::error::{Error, Result};
use crate::types::video_frame::{EncodedFrame, RawVideoFrame, SequenceHeader};

use super::video::{
    bitrate_kbps, create_hw_device, create_hw_frame_ctx, extract_sequence_header, VideoEncoder,
    GOP_SIZE,
};

pub struct VaapiEncoder {
    encoder: Option<ffmpeg::codec::encoder::Video>,
    converter: Option<ColorConverter>,
    width: u32,
    height: u32,
    fps: u32,
    is_hevc: bool,
    quality: QualityPreset,
    sequence_header: Option<SequenceHeader>,
}

impl VaapiEncoder {
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        is_hevc: bool,
        quality: QualityPreset,
    ) -> Result<Self> {
        let encoder = Self::create_encoder(width, height, fps, is_hevc, quality)?;
        let hw_device = unsafe { (*encoder.as_ptr()).hw_device_ctx };
        let converter = ColorConverter::new(hw_device, width, height)?;
        let sequence_header = extract_sequence_header(&encoder);

        Ok(Self {
            encoder: Some(encoder),
            converter: Some(converter),
            width,
            height,
            fps,
            is_hevc,
            quality,
            sequence_header,
        })
    }

    fn create_encoder(
        width: u32,
        height: u32,
        fps: u32,
        is_hevc: bool,
        quality: QualityPreset,
    ) -> Result<ffmpeg::codec::encoder::Video> {
        let name = if is_hevc { "hevc_vaapi" } else { "h264_vaapi" };
        let codec = ffmpeg::codec::encoder::find_by_name(name).ok_or_else(|| {
            Error::InitFailure(format!("vaapi encoder '{name}' not available"))
        })?;

        let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        encoder_ctx.set_width(width);
        encoder_ctx.set_height(height);
        encoder_ctx.set_format(ffmpeg::format::Pixel::VAAPI);

        let mut vaapi_device =
            create_hw_device(ffmpeg::ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI)?;
        let frame_ctx = create_hw_frame_ctx(vaapi_device)?;

        unsafe {
            let hw_frame_context = &mut *((*frame_ctx).data as *mut AVHWFramesContext);
            hw_frame_context.width = width as i32;
            hw_frame_context.height = height as i32;
            hw_frame_context.sw_format = AVPixelFormat::AV_PIX_FMT_NV12;
            hw_frame_context.format = encoder_ctx.format().into();
            hw_frame_context.device_ref = av_buffer_ref(vaapi_device);
            hw_frame_context.device_ctx = (*vaapi_device).data as *mut AVHWDeviceContext;
            hw_frame_context.initial_pool_size = 4;

            let err = av_hwframe_ctx_init(frame_ctx);
            if err < 0 {
                return Err(Error::InitFailure(format!(
                    "failed to initialize vaapi hw frame context: {err}"
                )));
            }

            (*encoder_ctx.as_mut_ptr()).hw_device_ctx = av_buffer_ref(vaapi_device);
            (*encoder_ctx.as_mut_ptr()).hw_frames_ctx = av_buffer_ref(frame_ctx);

            av_buffer_unref(&mut vaapi_device);
        }

        encoder_ctx.set_time_base(Rational::new(1, 10_000_000));
        encoder_ctx.set_gop(GOP_SIZE);
        encoder_ctx.set_bit_rate(bitrate_kbps(width, height, fps, quality) as usize * 1000);

        let opts = Self::encoder_opts(quality);
        let encoder_params = ffmpeg::codec::Parameters::new();
        encoder_ctx.set_parameters(encoder_params)?;
        let encoder = encoder_ctx.open_with(opts)?;
        Ok(encoder)
    }

    fn encoder_opts(quality: QualityPreset) -> ffmpeg::Dictionary<'static> {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("vsync", "vfr");
        opts.set("rc_mode", "VBR");
        let qp = match quality {
            QualityPreset::Good => "30",
            QualityPreset::High => "23",
            QualityPreset::Ultra => "18",
            QualityPreset::Lossless => "1",
        };
        opts.set("qp", qp);
        opts
    }

    fn collect_packets(
        encoder: &mut ffmpeg::codec::encoder::Video,
        out: &mut Vec<EncodedFrame>,
    ) -> Result<()> {
        let mut packet = ffmpeg::codec::packet::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            if let Some(data) = packet.data() {
                out.push(EncodedFrame::new(
                    data.to_vec(),
                    packet.pts().unwrap_or(0),
                    packet.duration(),
                    packet.is_key(),
                ));
            }
            packet = ffmpeg::codec::packet::Packet::empty();
        }
        Ok(())
    }
}

impl VideoEncoder for VaapiEncoder {
    fn submit(&mut self, frame: &RawVideoFrame) -> Result<()> {
        let (Some(encoder), Some(converter)) = (&mut self.encoder, &mut self.converter) else {
            return Err(Error::Precondition("encoder has been dropped".into()));
        };

        let hw_frames_ctx = unsafe { (*encoder.as_ptr()).hw_frames_ctx };
        if let Some(nv12) = converter.convert(frame, hw_frames_ctx)? {
            encoder.send_frame(&nv12.frame)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<EncodedFrame>> {
        let mut out = Vec::new();
        if let (Some(encoder), Some(converter)) = (&mut self.encoder, &mut self.converter) {
            for nv12 in converter.drain() {
                encoder.send_frame(&nv12.frame)?;
            }
            Self::collect_packets(encoder, &mut out)?;
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<EncodedFrame>> {
        let mut out = Vec::new();
        if let (Some(encoder), Some(converter)) = (&mut self.encoder, &mut self.converter) {
            for nv12 in converter.drain() {
                encoder.send_frame(&nv12.frame)?;
            }
            encoder.send_eof()?;
            Self::collect_packets(encoder, &mut out)?;
        }
        Ok(out)
    }

    fn reset(&mut self) -> Result<()> {
        self.encoder.take();
        self.converter.take();
        let new_encoder =
            Self::create_encoder(self.width, self.height, self.fps, self.is_hevc, self.quality)?;
        let hw_device = unsafe { (*new_encoder.as_ptr()).hw_device_ctx };
        let converter = ColorConverter::new(hw_device, self.width, self.height)?;
        self.sequence_header = extract_sequence_header(&new_encoder);
        self.encoder = Some(new_encoder);
        self.converter = Some(converter);
        Ok(())
    }

    fn sequence_header(&self) -> Option<SequenceHeader> {
        self.sequence_header.clone()
    }
}

impl Drop for VaapiEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("error flushing vaapi encoder during drop: {e:?}");
        }
    }
}
