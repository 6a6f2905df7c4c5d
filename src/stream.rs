//! MJPEG video output.
//!
//! Each `MjpegStream` owns one listening socket and serves the most recent
//! frame to every connected client as `multipart/x-mixed-replace`. Encoding
//! happens on the pipeline thread; each client is written from its own thread
//! so a slow viewer never stalls the loop.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

const BOUNDARY: &str = "sharksight-frame";
const CLIENT_WAIT: Duration = Duration::from_secs(1);

/// Destination for annotated frames.
pub trait VideoSink: Send {
    fn put_frame(&mut self, image: &RgbImage) -> Result<()>;
}

/// Map the stream compression setting onto a JPEG quality in 1..=100.
pub fn jpeg_quality(compression: u8) -> u8 {
    compression.clamp(1, 100)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality)
        .encode_image(image)
        .context("failed to encode JPEG frame")?;
    Ok(bytes)
}

#[derive(Default)]
struct LatestFrame {
    sequence: u64,
    jpeg: Arc<Vec<u8>>,
}

type FrameSlot = Arc<(Mutex<LatestFrame>, Condvar)>;

pub struct MjpegStream {
    name: String,
    quality: u8,
    local_addr: SocketAddr,
    slot: FrameSlot,
}

impl MjpegStream {
    /// Bind the stream's HTTP endpoint and start accepting viewers.
    pub fn bind(name: &str, addr: &str, quality: u8) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("failed to bind {} stream on {}", name, addr))?;
        let local_addr = listener.local_addr()?;
        let slot: FrameSlot = Arc::new((Mutex::new(LatestFrame::default()), Condvar::new()));

        let accept_slot = slot.clone();
        let accept_name = name.to_string();
        std::thread::spawn(move || {
            for conn in listener.incoming() {
                match conn {
                    Ok(stream) => {
                        let slot = accept_slot.clone();
                        let name = accept_name.clone();
                        std::thread::spawn(move || {
                            let peer = stream.peer_addr().ok();
                            if let Err(e) = serve_client(stream, &slot) {
                                log::debug!("{} viewer {:?} disconnected: {}", name, peer, e);
                            }
                        });
                    }
                    Err(e) => log::warn!("{} stream accept failed: {}", accept_name, e),
                }
            }
        });

        log::info!("{} stream serving MJPEG on http://{}/", name, local_addr);
        Ok(Self {
            name: name.to_string(),
            quality,
            local_addr,
            slot,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl VideoSink for MjpegStream {
    fn put_frame(&mut self, image: &RgbImage) -> Result<()> {
        let jpeg = Arc::new(encode_jpeg(image, self.quality)?);
        let (lock, ready) = &*self.slot;
        let mut latest = lock
            .lock()
            .map_err(|_| anyhow!("{} stream lock poisoned", self.name))?;
        latest.sequence += 1;
        latest.jpeg = jpeg;
        ready.notify_all();
        Ok(())
    }
}

fn serve_client(mut stream: TcpStream, slot: &FrameSlot) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    skip_request_headers(&stream)?;

    write!(
        stream,
        "HTTP/1.0 200 OK\r\nCache-Control: no-cache\r\nConnection: close\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\n\r\n",
        BOUNDARY
    )?;

    let mut last_sent = 0u64;
    loop {
        let jpeg = {
            let (lock, ready) = &**slot;
            let mut latest = lock.lock().map_err(|_| anyhow!("stream lock poisoned"))?;
            while latest.sequence == last_sent {
                let (guard, _) = ready
                    .wait_timeout(latest, CLIENT_WAIT)
                    .map_err(|_| anyhow!("stream lock poisoned"))?;
                latest = guard;
            }
            last_sent = latest.sequence;
            latest.jpeg.clone()
        };

        write!(
            stream,
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            BOUNDARY,
            jpeg.len()
        )?;
        stream.write_all(&jpeg)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
    }
}

fn skip_request_headers(stream: &TcpStream) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 || line == "\r\n" || line == "\n" {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Read;

    #[test]
    fn quality_is_clamped() {
        assert_eq!(jpeg_quality(0), 1);
        assert_eq!(jpeg_quality(30), 30);
        assert_eq!(jpeg_quality(200), 100);
    }

    #[test]
    fn encodes_jpeg_markers() {
        let image = RgbImage::from_pixel(16, 16, Rgb([200, 50, 10]));
        let bytes = encode_jpeg(&image, 30).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn viewer_receives_latest_frame() {
        let mut stream = MjpegStream::bind("test", "127.0.0.1:0", 30).unwrap();
        stream
            .put_frame(&RgbImage::from_pixel(8, 8, Rgb([0, 128, 255])))
            .unwrap();

        let mut viewer = TcpStream::connect(stream.local_addr()).unwrap();
        viewer
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        viewer.write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n").unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        while !received.windows(2).any(|w| w == [0xFF, 0xD8]) {
            let read = viewer.read(&mut chunk).unwrap();
            assert!(read > 0, "stream closed before a frame arrived");
            received.extend_from_slice(&chunk[..read]);
        }
        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("HTTP/1.0 200 OK"));
        assert!(text.contains("multipart/x-mixed-replace"));
        assert!(text.contains("Content-Type: image/jpeg"));
    }
}
