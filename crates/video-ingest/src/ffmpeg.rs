use std::{
    io::{ErrorKind, Read},
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::anyhow;
use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, warn};

use crate::{
    parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

const CAPTURE_QUEUE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Ingress transport used to source frames.
pub enum SourceKind {
    /// Local V4L devices.
    Device,
    /// Real-time streaming protocol feeds.
    Rtsp,
    /// Anything ffmpeg can open directly (files, http streams).
    File,
}

impl SourceKind {
    /// Infer the transport kind from a URI.
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::File
        }
    }
}

/// Spawns an FFmpeg process that decodes `uri` and yields BGR8 frames scaled to
/// `target_size` via a background thread.
///
/// The returned channel is bounded so a slow consumer backpressures ffmpeg
/// rather than buffering stale frames.
pub fn spawn_capture_reader(
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>, CaptureError> {
    if target_size.0 <= 0 || target_size.1 <= 0 {
        return Err(CaptureError::Other(anyhow!(
            "capture size must be positive, got {}x{}",
            target_size.0,
            target_size.1
        )));
    }

    let kind = SourceKind::from_uri(uri);
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    let input = match kind {
        SourceKind::Device => {
            cmd.arg("-f").arg("video4linux2");
            match parse_device_index(uri) {
                Some(index) if !uri.starts_with("/dev/video") => format!("/dev/video{index}"),
                _ => uri.to_string(),
            }
        }
        SourceKind::Rtsp => {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay");
            uri.to_string()
        }
        SourceKind::File => uri.to_string(),
    };

    cmd.arg("-i")
        .arg(&input)
        .arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");

    debug!("Starting ffmpeg capture for {input} ({kind:?})");
    spawn_ffmpeg_reader(cmd, uri, target_size)
}

fn spawn_ffmpeg_reader(
    mut cmd: Command,
    uri: &str,
    target_size: (i32, i32),
) -> Result<Receiver<Result<Frame, CaptureError>>, CaptureError> {
    let (tx, rx) = bounded(CAPTURE_QUEUE);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|err| {
        warn!("failed to spawn ffmpeg for {uri}: {err}");
        CaptureError::Open {
            uri: uri.to_string(),
        }
    })?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;

    thread::Builder::new()
        .name("video-ingest".into())
        .spawn(move || {
            if let Err(err) = ffmpeg_loop(stdout, child, target_size, tx.clone()) {
                let _ = tx.send(Err(err));
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(rx)
}

fn ffmpeg_loop(
    mut stdout: impl Read,
    mut child: Child,
    target_size: (i32, i32),
    tx: Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let format = FrameFormat::Bgr8;
    let frame_bytes =
        (target_size.0 as usize) * (target_size.1 as usize) * format.bytes_per_pixel();
    let mut buffer = vec![0u8; frame_bytes];
    let mut result = Ok(());

    loop {
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = Frame::new(buffer.clone(), target_size.0, target_size.1, format);
                if tx.send(Ok(frame)).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                result = Err(CaptureError::EndOfStream);
                break;
            }
            Err(err) => {
                result = Err(CaptureError::Other(err.into()));
                break;
            }
        }
    }

    let _ = child.kill();
    let _ = child.wait();
    result
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_source_kind_from_uri() {
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("/dev/video1"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("rtsp://10.0.0.2/live"), SourceKind::Rtsp);
        assert_eq!(SourceKind::from_uri("clip.mp4"), SourceKind::File);
    }

    #[test]
    fn test_zero_capture_size_is_rejected() {
        assert!(spawn_capture_reader("/dev/video0", (0, 480)).is_err());
    }

    #[test]
    fn test_ffmpeg_loop_splits_stream_into_frames() {
        // Two full 2x2 BGR frames followed by a truncated third one.
        let mut bytes = vec![7u8; 2 * 2 * 3 * 2];
        bytes.extend_from_slice(&[1, 2, 3]);
        let (tx, rx) = bounded(4);
        let child = Command::new("true").spawn().unwrap();

        let result = ffmpeg_loop(Cursor::new(bytes), child, (2, 2), tx);

        assert!(matches!(result, Err(CaptureError::EndOfStream)));
        let frames: Vec<_> = rx.try_iter().collect();
        assert_eq!(frames.len(), 2);
        for frame in frames {
            let frame = frame.unwrap();
            assert_eq!(frame.data.len(), 12);
            assert_eq!(frame.format, FrameFormat::Bgr8);
        }
    }
}
