use anyhow::{Context, Result};
use image::{ImageBuffer, Rgb};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

pub type Frame = ImageBuffer<Rgb<u8>, Vec<u8>>;

pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).context("open camera")?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fall back to YUYV, else accept whatever is set.
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Block until the next frame arrives and return it as RGB8.
    pub fn frame(&mut self) -> Result<Frame> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: width={} height={} fourcc={:?} seq={:?} len={}",
            self.width,
            self.height,
            self.fourcc,
            meta.sequence,
            data.len()
        );

        let buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => {
                log::warn!(
                    "unexpected pixel format {:?}, passing through raw len={}",
                    other,
                    data.len()
                );
                data.to_vec()
            }
        };

        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            log::error!(
                "buffer too small: got {}, expected {} (fourcc {:?})",
                buf.len(),
                expected,
                self.fourcc
            );
            return Err(anyhow::anyhow!("buffer too small"));
        } else if buf.len() > expected {
            log::warn!(
                "buffer larger than expected ({} > {}), truncating",
                buf.len(),
                expected
            );
        }
        ImageBuffer::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(anyhow::anyhow!("short YUYV buffer"));
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data.chunks_exact(4) {
        let y0 = chunk[0] as f32;
        let u = chunk[1] as f32 - 128.0;
        let y1 = chunk[2] as f32;
        let v = chunk[3] as f32 - 128.0;
        for &y in &[y0, y1] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        return Err(anyhow::anyhow!("short GREY buffer"));
    }
    let mut out = Vec::with_capacity(expected * 3);
    for &y in data.iter().take(expected) {
        out.extend_from_slice(&[y, y, y]);
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.max(0.0).min(255.0) as u8
}
