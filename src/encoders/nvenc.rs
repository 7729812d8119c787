//! NVENC (NVIDIA) hardware video encoder.
//!
//! Interop with EGL/GL textures and a raw CUDA graphics resource avoids a
//! copy but is GPU-vendor plumbing this crate's capture model doesn't
//! carry — capture only promises a capability interface, not vendor
//! interop. Instead this encoder uploads the BGRA surface through
//! ffmpeg's own `hwupload` + `scale_cuda` filter chain, the CUDA analogue
//! of [`crate::color::ColorConverter`]'s VAAPI `hwmap`/`scale_vaapi`
//! chain, trading one host-to-device copy for a much smaller, fully safe
//! implementation.

use ffmpeg_next::{
    self as ffmpeg,
    ffi::{av_buffer_ref, AVHWDeviceContext, AVHWFramesContext, AVPixelFormat},
    Rational,
};

use crate::config::QualityPreset;
use crate::error::{Error, Result};
use crate::types::video_frame::{EncodedFrame, RawVideoFrame, SequenceHeader};

use super::video::{
    bitrate_kbps, create_hw_device, create_hw_frame_ctx, extract_sequence_header, VideoEncoder,
    GOP_SIZE,
};

pub struct NvencEncoder {
    encoder: Option<ffmpeg::codec::encoder::Video>,
    graph: Option<ffmpeg::filter::Graph>,
    width: u32,
    height: u32,
    fps: u32,
    is_hevc: bool,
    quality: QualityPreset,
    sequence_header: Option<SequenceHeader>,
}

impl NvencEncoder {
    pub fn new(
        width: u32,
        height: u32,
        fps: u32,
        is_hevc: bool,
        quality: QualityPreset,
    ) -> Result<Self> {
        let encoder = Self::create_encoder(width, height, fps, is_hevc, quality)?;
        let hw_device = unsafe { (*encoder.as_ptr()).hw_device_ctx };
        let graph = Self::build_graph(hw_device, width, height)?;
        let sequence_header = extract_sequence_header(&encoder);

        Ok(Self {
            encoder: Some(encoder),
            graph: Some(graph),
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
        let name = if is_hevc { "hevc_nvenc" } else { "h264_nvenc" };
        let codec = ffmpeg::codec::encoder::find_by_name(name).ok_or_else(|| {
            Error::InitFailure(format!("nvenc encoder '{name}' not available"))
        })?;

        let mut encoder_ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()?;

        encoder_ctx.set_width(width);
        encoder_ctx.set_height(height);
        encoder_ctx.set_format(ffmpeg::format::Pixel::CUDA);
        encoder_ctx.set_bit_rate(bitrate_kbps(width, height, fps, quality) as usize * 1000);

        let mut cuda_device = create_hw_device(ffmpeg::ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA)?;
        let frame_ctx = create_hw_frame_ctx(cuda_device)?;

        unsafe {
            let hw_frame_context = &mut *((*frame_ctx).data as *mut AVHWFramesContext);
            hw_frame_context.width = width as i32;
            hw_frame_context.height = height as i32;
            hw_frame_context.sw_format = AVPixelFormat::AV_PIX_FMT_NV12;
            hw_frame_context.format = encoder_ctx.format().into();
            hw_frame_context.device_ctx = (*cuda_device).data as *mut AVHWDeviceContext;
            hw_frame_context.initial_pool_size = 4;

            let err = ffmpeg::ffi::av_hwframe_ctx_init(frame_ctx);
            if err < 0 {
                return Err(Error::InitFailure(format!(
                    "failed to initialize nvenc hw frame context: {err}"
                )));
            }

            (*encoder_ctx.as_mut_ptr()).hw_device_ctx = av_buffer_ref(cuda_device);
            (*encoder_ctx.as_mut_ptr()).hw_frames_ctx = av_buffer_ref(frame_ctx);
            ffmpeg::ffi::av_buffer_unref(&mut cuda_device);
        }

        encoder_ctx.set_time_base(Rational::new(1, 10_000_000));
        encoder_ctx.set_gop(GOP_SIZE);

        let opts = Self::encoder_opts(quality);
        let encoder_params = ffmpeg::codec::Parameters::new();
        encoder_ctx.set_parameters(encoder_params)?;
        let encoder = encoder_ctx.open_with(opts)?;
        Ok(encoder)
    }

    fn encoder_opts(quality: QualityPreset) -> ffmpeg::Dictionary<'static> {
        let mut opts = ffmpeg::Dictionary::new();
        opts.set("rc", "vbr");
        opts.set("tune", "hq");
        let (preset, cq) = match quality {
            QualityPreset::Good => ("p3", "30"),
            QualityPreset::High => ("p5", "23"),
            QualityPreset::Ultra => ("p7", "18"),
            QualityPreset::Lossless => ("p7", "0"),
        };
        opts.set("preset", preset);
        opts.set("cq", cq);
        opts
    }

    fn build_graph(
        hw_device_ctx: *mut ffmpeg::ffi::AVBufferRef,
        width: u32,
        height: u32,
    ) -> Result<ffmpeg::filter::Graph> {
        let mut graph = ffmpeg::filter::Graph::new();
        let args = format!("video_size={width}x{height}:pix_fmt=bgra:time_base=1/1000000");
        let mut input = graph.add(&ffmpeg::filter::find("buffer").unwrap(), "in", &args)?;

        let mut upload = graph.add(&ffmpeg::filter::find("hwupload").unwrap(), "upload", "")?;
        let scale_args = format!("w={width}:h={height}:format=nv12");
        let mut scale = graph.add(
            &ffmpeg::filter::find("scale_cuda").unwrap(),
            "scale",
            &scale_args,
        )?;
        let mut out = graph.add(&ffmpeg::filter::find("buffersink").unwrap(), "out", "")?;

        unsafe {
            (*upload.as_mut_ptr()).hw_device_ctx = av_buffer_ref(hw_device_ctx);
        }

        input.link(0, &mut upload, 0);
        upload.link(0, &mut scale, 0);
        scale.link(0, &mut out, 0);

        graph.validate()?;
        log::trace!("nvenc graph\n{}", graph.dump());
        Ok(graph)
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

impl VideoEncoder for NvencEncoder {
    fn submit(&mut self, frame: &RawVideoFrame) -> Result<()> {
        let (Some(encoder), Some(graph)) = (&mut self.encoder, &mut self.graph) else {
            return Err(Error::Precondition("encoder has been dropped".into()));
        };

        let mut sw_frame = ffmpeg::util::frame::Video::new(
            ffmpeg::format::Pixel::BGRA,
            self.width,
            self.height,
        );
        sw_frame.set_pts(Some(frame.pts));
        let plane_len = sw_frame.plane_mut::<(u8, u8, u8, u8)>(0).len() * 4;
        sw_frame.data_mut(0)[..plane_len.min(frame.data.len())]
            .copy_from_slice(&frame.data[..plane_len.min(frame.data.len())]);

        graph
            .get("in")
            .ok_or_else(|| Error::InitFailure("nvenc graph missing input pad".into()))?
            .source()
            .add(&sw_frame)
            .map_err(Error::from)?;

        let mut filtered = ffmpeg::util::frame::Video::empty();
        if graph
            .get("out")
            .ok_or_else(|| Error::InitFailure("nvenc graph missing output pad".into()))?
            .sink()
            .frame(&mut filtered)
            .is_ok()
        {
            encoder.send_frame(&filtered)?;
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<Vec<EncodedFrame>> {
        let mut out = Vec::new();
        if let Some(encoder) = &mut self.encoder {
            Self::collect_packets(encoder, &mut out)?;
        }
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<EncodedFrame>> {
        let mut out = Vec::new();
        if let Some(encoder) = &mut self.encoder {
            encoder.send_eof()?;
            Self::collect_packets(encoder, &mut out)?;
        }
        Ok(out)
    }

    fn reset(&mut self) -> Result<()> {
        self.encoder.take();
        self.graph.take();
        let new_encoder =
            Self::create_encoder(self.width, self.height, self.fps, self.is_hevc, self.quality)?;
        let hw_device = unsafe { (*new_encoder.as_ptr()).hw_device_ctx };
        let graph = Self::build_graph(hw_device, self.width, self.height)?;
        self.sequence_header = extract_sequence_header(&new_encoder);
        self.encoder = Some(new_encoder);
        self.graph = Some(graph);
        Ok(())
    }

    fn sequence_header(&self) -> Option<SequenceHeader> {
        self.sequence_header.clone()
    }
}

impl Drop for NvencEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("error flushing nvenc encoder during drop: {e:?}");
        }
    }
}
