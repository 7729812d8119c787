//! Hardware color-space conversion: BGRA/DRM surfaces in, NV12 surfaces
//! the encoder consumes out, entirely on the GPU.
//!
//! Pulled out of `VaapiEncoder`'s own `create_filter_graph`/`process` so the
//! VAAPI and NVENC encoders can share one implementation instead of each
//! carrying a private filter graph.

use std::ptr::null_mut;

use ffmpeg_next::{
    self as ffmpeg,
    ffi::{av_buffer_create, av_buffer_default_free, av_buffer_ref, AVDRMFrameDescriptor},
};

use crate::error::{Error, Result};
use crate::types::video_frame::{Nv12Frame, RawVideoFrame};

/// `buffer -> hwmap -> scale_vaapi -> buffersink`, bound to the same VAAPI
/// device context as the encoder it feeds.
pub struct ColorConverter {
    graph: ffmpeg::filter::Graph,
    width: u32,
    height: u32,
}

impl ColorConverter {
    pub fn new(
        hw_device_ctx: *mut ffmpeg::ffi::AVBufferRef,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let graph = Self::build_graph(hw_device_ctx, width, height)?;
        Ok(Self {
            graph,
            width,
            height,
        })
    }

    fn build_graph(
        hw_device_ctx: *mut ffmpeg::ffi::AVBufferRef,
        width: u32,
        height: u32,
    ) -> Result<ffmpeg::filter::Graph> {
        let mut graph = ffmpeg::filter::Graph::new();

        let args = format!("video_size={width}x{height}:pix_fmt=bgra:time_base=1/1000000");
        let mut input = graph.add(&ffmpeg::filter::find("buffer").unwrap(), "in", &args)?;

        let mut hwmap = graph.add(
            &ffmpeg::filter::find("hwmap").unwrap(),
            "hwmap",
            "mode=read+write:derive_device=vaapi",
        )?;

        let scale_args = format!("w={width}:h={height}:format=nv12:out_range=tv");
        let mut scale = graph.add(
            &ffmpeg::filter::find("scale_vaapi").unwrap(),
            "scale",
            &scale_args,
        )?;

        let mut out = graph.add(&ffmpeg::filter::find("buffersink").unwrap(), "out", "")?;

        unsafe {
            (*hwmap.as_mut_ptr()).hw_device_ctx = av_buffer_ref(hw_device_ctx);
        }

        input.link(0, &mut hwmap, 0);
        hwmap.link(0, &mut scale, 0);
        scale.link(0, &mut out, 0);

        graph.validate()?;
        log::trace!("color converter graph\n{}", graph.dump());

        Ok(graph)
    }

    /// Wraps `frame`'s DMA-BUF fd in a DRM-PRIME frame, pushes it through
    /// the graph, and returns the resulting NV12 surface if the graph has
    /// one buffered.
    pub fn convert(
        &mut self,
        frame: &RawVideoFrame,
        hw_frames_ctx: *mut ffmpeg::ffi::AVBufferRef,
    ) -> Result<Option<Nv12Frame>> {
        let Some(fd) = frame.dmabuf_fd else {
            return Ok(None);
        };

        let mut drm_frame = ffmpeg::util::frame::Video::new(
            ffmpeg::format::Pixel::DRM_PRIME,
            self.width,
            self.height,
        );

        unsafe {
            let drm_desc = Box::into_raw(Box::new(std::mem::zeroed::<AVDRMFrameDescriptor>()));
            (*drm_desc).nb_objects = 1;
            (*drm_desc).objects[0].fd = fd;
            (*drm_desc).objects[0].size = 0;
            (*drm_desc).objects[0].format_modifier = 0;

            (*drm_desc).nb_layers = 1;
            (*drm_desc).layers[0].format = drm_fourcc::DrmFourcc::Argb8888 as u32;
            (*drm_desc).layers[0].nb_planes = 1;
            (*drm_desc).layers[0].planes[0].object_index = 0;
            (*drm_desc).layers[0].planes[0].offset = frame.offset as isize;
            (*drm_desc).layers[0].planes[0].pitch = frame.stride as isize;

            (*drm_frame.as_mut_ptr()).data[0] = drm_desc as *mut u8;
            (*drm_frame.as_mut_ptr()).buf[0] = av_buffer_create(
                drm_desc as *mut u8,
                std::mem::size_of::<AVDRMFrameDescriptor>(),
                Some(av_buffer_default_free),
                null_mut(),
                0,
            );
            (*drm_frame.as_mut_ptr()).hw_frames_ctx = av_buffer_ref(hw_frames_ctx);
        }

        drm_frame.set_pts(Some(frame.pts));

        self.graph
            .get("in")
            .ok_or_else(|| Error::InitFailure("color converter missing input pad".into()))?
            .source()
            .add(&drm_frame)
            .map_err(Error::from)?;

        let mut filtered = ffmpeg::util::frame::Video::empty();
        match self
            .graph
            .get("out")
            .ok_or_else(|| Error::InitFailure("color converter missing output pad".into()))?
            .sink()
            .frame(&mut filtered)
        {
            Ok(_) => Ok(Some(Nv12Frame {
                frame: filtered,
                pts: frame.pts,
            })),
            Err(_) => Ok(None),
        }
    }

    /// Drains any frames still buffered in the graph after the source has
    /// stopped pushing.
    pub fn drain(&mut self) -> Vec<Nv12Frame> {
        let mut out = Vec::new();
        loop {
            let mut filtered = ffmpeg::util::frame::Video::empty();
            let Some(sink) = self.graph.get("out") else {
                break;
            };
            if sink.sink().frame(&mut filtered).is_err() {
                break;
            }
            let pts = filtered.pts().unwrap_or(0);
            out.push(Nv12Frame { frame: filtered, pts });
        }
        out
    }
}
