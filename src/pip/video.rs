use image::{DynamicImage, ImageFormat, RgbaImage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("пустой кадр {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },
    #[error("размер буфера {actual} не совпадает с ожидаемым {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("формат кадра {actual:?} не совпадает с описанием потока {expected:?}")]
    FormatMismatch {
        expected: FormatDescription,
        actual: FormatDescription,
    },
    #[error("не удалось закодировать PNG: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 => 4,
        }
    }
}

/// Owned BGRA pixels, row-major with no padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    pub fn from_image(img: &RgbaImage) -> Result<Self, FrameError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }
        let mut data = img.as_raw().clone();
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        Self::from_bgra(width, height, data)
    }

    pub fn from_bgra(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * PixelFormat::Bgra8.bytes_per_pixel();
        if expected == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format: PixelFormat::Bgra8,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_rgba(&self) -> Option<RgbaImage> {
        let mut data = self.data.clone();
        for px in data.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
        RgbaImage::from_raw(self.width, self.height, data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FormatDescription {
    pub fn for_buffer(buffer: &PixelBuffer) -> Self {
        Self {
            width: buffer.width,
            height: buffer.height,
            format: buffer.format,
        }
    }

    pub fn matches(&self, buffer: &PixelBuffer) -> bool {
        *self == Self::for_buffer(buffer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTiming {
    pub pts: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct VideoSample {
    pub buffer: PixelBuffer,
    pub format: FormatDescription,
    pub timing: SampleTiming,
}

/// Wraps pixel buffers into timed samples. The stream format is fixed by
/// the first buffer and every later buffer must match it.
#[derive(Debug)]
pub struct SampleBuilder {
    frame_duration: Duration,
    format: Option<FormatDescription>,
    next_pts: Duration,
}

impl SampleBuilder {
    pub fn new(frame_duration: Duration) -> Self {
        Self {
            frame_duration,
            format: None,
            next_pts: Duration::ZERO,
        }
    }

    pub fn format(&self) -> Option<FormatDescription> {
        self.format
    }

    pub fn build(&mut self, buffer: PixelBuffer) -> Result<VideoSample, FrameError> {
        let format = match self.format {
            Some(expected) if !expected.matches(&buffer) => {
                return Err(FrameError::FormatMismatch {
                    expected,
                    actual: FormatDescription::for_buffer(&buffer),
                });
            }
            Some(expected) => expected,
            None => {
                let created = FormatDescription::for_buffer(&buffer);
                self.format = Some(created);
                created
            }
        };
        let timing = SampleTiming {
            pts: self.next_pts,
            duration: self.frame_duration,
        };
        self.next_pts += self.frame_duration;
        Ok(VideoSample {
            buffer,
            format,
            timing,
        })
    }
}

/// Bounded display layer. Enqueueing never flushes what is already shown;
/// only the oldest sample beyond `capacity` is dropped.
#[derive(Debug)]
pub struct DisplayQueue {
    retained: VecDeque<VideoSample>,
    capacity: usize,
    enqueued_total: u64,
}

impl DisplayQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            retained: VecDeque::with_capacity(capacity),
            capacity,
            enqueued_total: 0,
        }
    }

    pub fn enqueue(&mut self, sample: VideoSample) {
        if self.retained.len() == self.capacity {
            self.retained.pop_front();
        }
        self.retained.push_back(sample);
        self.enqueued_total += 1;
    }

    pub fn latest(&self) -> Option<&VideoSample> {
        self.retained.back()
    }

    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    pub fn enqueued_total(&self) -> u64 {
        self.enqueued_total
    }

    pub fn encode_latest_png(&self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(sample) = self.latest() else {
            return Ok(None);
        };
        let buffer = &sample.buffer;
        let img = buffer.to_rgba().ok_or(FrameError::BufferSize {
            expected: buffer.width() as usize * buffer.height() as usize * 4,
            actual: buffer.bytes().len(),
        })?;
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(img).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(Some(png))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32) -> PixelBuffer {
        PixelBuffer::from_image(&RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])))
            .unwrap()
    }

    #[test]
    fn rgba_is_swizzled_to_bgra() {
        let buffer = solid(2, 1);
        assert_eq!(buffer.bytes(), &[30, 20, 10, 255, 30, 20, 10, 255]);
        assert_eq!(buffer.format(), PixelFormat::Bgra8);
        assert_eq!(*buffer.to_rgba().unwrap().get_pixel(1, 0), Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let err = PixelBuffer::from_bgra(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { expected: 16, actual: 15 }));
        assert!(matches!(
            PixelBuffer::from_bgra(0, 4, Vec::new()),
            Err(FrameError::EmptyFrame { .. })
        ));
    }

    #[test]
    fn builder_fixes_format_and_advances_pts() {
        let mut builder = SampleBuilder::new(Duration::from_secs(1));
        let first = builder.build(solid(4, 4)).unwrap();
        let second = builder.build(solid(4, 4)).unwrap();
        assert_eq!(first.timing.pts, Duration::ZERO);
        assert_eq!(second.timing.pts, Duration::from_secs(1));
        assert_eq!(second.timing.duration, Duration::from_secs(1));

        let err = builder.build(solid(8, 4)).unwrap_err();
        assert!(matches!(err, FrameError::FormatMismatch { .. }));
        let third = builder.build(solid(4, 4)).unwrap();
        assert_eq!(third.timing.pts, Duration::from_secs(2));
        assert_eq!(
            builder.format(),
            Some(FormatDescription {
                width: 4,
                height: 4,
                format: PixelFormat::Bgra8
            })
        );
    }

    #[test]
    fn queue_drops_only_the_oldest_past_capacity() {
        let mut builder = SampleBuilder::new(Duration::from_secs(1));
        let mut queue = DisplayQueue::new(2);
        for _ in 0..3 {
            queue.enqueue(builder.build(solid(2, 2)).unwrap());
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.enqueued_total(), 3);
        assert_eq!(queue.latest().unwrap().timing.pts, Duration::from_secs(2));
    }

    #[test]
    fn latest_frame_encodes_as_png() {
        let mut queue = DisplayQueue::new(1);
        assert!(queue.encode_latest_png().unwrap().is_none());

        let mut builder = SampleBuilder::new(Duration::from_secs(1));
        queue.enqueue(builder.build(solid(3, 2)).unwrap());
        let png = queue.encode_latest_png().unwrap().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(*decoded.get_pixel(0, 0), Rgba([10, 20, 30, 255]));
    }
}
