//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Capture thread.
//!

use crate::camera::{AcquisitionListener, CameraError, IIDCCamera, PixelFormat};
use crate::image::{self, Image, ImagePixelFormat};
use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use std::sync::Arc;

#[derive(Debug)]
pub struct Info {
    pub capture_fps: f64,
    /// Frames not delivered because the receiver did not keep up.
    pub dropped_frames: usize
}

#[derive(Debug)]
pub enum CaptureToMainThreadMsg {
    /// Contains a frame and the index of the buffer it was received into.
    FrameReady(Arc<Image>, usize),
    SyncLost,
    CaptureFailed,
    Info(Info)
}

#[derive(Debug)]
pub enum MainToCaptureThreadMsg {
    Finish
}

/// Value returned by the capture thread: the camera and the result of `acquire_continuously`.
pub type CaptureOutcome = (IIDCCamera, Result<bool, CameraError>);

/// Running capture thread.
pub struct CaptureThread {
    join_handle: std::thread::JoinHandle<CaptureOutcome>,
    sender: Sender<MainToCaptureThreadMsg>,
    receiver: Receiver<CaptureToMainThreadMsg>
}

impl CaptureThread {
    pub fn receiver(&self) -> &Receiver<CaptureToMainThreadMsg> { &self.receiver }

    /// Stops the capture and returns the camera.
    pub fn finish(self) -> std::thread::Result<CaptureOutcome> {
        // the thread may have already ended
        let _ = self.sender.send(MainToCaptureThreadMsg::Finish);
        drop(self.receiver);
        self.join_handle.join()
    }
}

/// Starts continuous acquisition in a new thread.
///
/// Frames are converted to `ImagePixelFormat::natural_for` the camera's pixel format.
///
/// # Parameters
///
/// * `queue_length` - Maximum number of frames waiting to be received; further frames are dropped.
///
pub fn spawn_capture_thread(camera: IIDCCamera, queue_length: usize) -> CaptureThread {
    let (sender_main, receiver_worker) = crossbeam::channel::unbounded();
    let (sender_worker, receiver_main) = crossbeam::channel::bounded(queue_length.max(1));

    CaptureThread{
        join_handle: std::thread::spawn(move || capture_thread(camera, sender_worker, receiver_worker)),
        sender: sender_main,
        receiver: receiver_main
    }
}

struct CaptureListener {
    sender: Sender<CaptureToMainThreadMsg>,
    receiver: Receiver<MainToCaptureThreadMsg>,
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
    t_last_info: std::time::Instant,
    fps_counter: usize,
    dropped_frames: usize
}

impl CaptureListener {
    /// Returns `false` if the main thread requested finishing or is gone.
    fn main_thread_wants_more(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(MainToCaptureThreadMsg::Finish) => false,
            Err(TryRecvError::Empty) => true,
            Err(TryRecvError::Disconnected) => false
        }
    }

    /// Sends a message unless the queue is full; returns `false` if the main thread is gone.
    fn send(&mut self, msg: CaptureToMainThreadMsg) -> bool {
        match self.sender.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => { self.dropped_frames += 1; true },
            Err(TrySendError::Disconnected(_)) => false
        }
    }
}

impl AcquisitionListener for CaptureListener {
    fn on_acquisition(&mut self, frame: &[u8], index: usize) -> bool {
        self.fps_counter += 1;

        let mut image = Image::new(self.width, self.height, ImagePixelFormat::natural_for(self.pixel_format));
        let delivered = match image::convert(&mut image, self.pixel_format, frame, self.width, self.height) {
            Ok(()) => self.send(CaptureToMainThreadMsg::FrameReady(Arc::new(image), index)),
            Err(e) => {
                log::warn!("cannot convert frame: {}", e);
                self.send(CaptureToMainThreadMsg::CaptureFailed)
            }
        };

        if self.t_last_info.elapsed() >= std::time::Duration::from_secs(1) {
            let info = Info{ capture_fps: self.fps_counter as f64, dropped_frames: self.dropped_frames };
            self.fps_counter = 0;
            self.t_last_info = std::time::Instant::now();
            if !self.send(CaptureToMainThreadMsg::Info(info)) { return false; }
        }

        delivered && self.main_thread_wants_more()
    }

    fn on_sync_lost(&mut self) -> bool {
        self.send(CaptureToMainThreadMsg::SyncLost) && self.main_thread_wants_more()
    }

    fn on_failure(&mut self) -> bool {
        self.send(CaptureToMainThreadMsg::CaptureFailed) && self.main_thread_wants_more()
    }
}

/// Runs continuous acquisition until receiving `MainToCaptureThreadMsg::Finish`.
pub fn capture_thread(
    mut camera: IIDCCamera,
    sender: Sender<CaptureToMainThreadMsg>,
    receiver: Receiver<MainToCaptureThreadMsg>
) -> CaptureOutcome {
    let pixel_format = match camera.pixel_format() {
        Some(pf) => pf,
        None => return (camera, Err(CameraError::UnsupportedCapability("no video mode selected".to_string())))
    };
    let dimension = camera.region().dimension;

    let mut listener = CaptureListener{
        sender,
        receiver,
        pixel_format,
        width: dimension.width,
        height: dimension.height,
        t_last_info: std::time::Instant::now(),
        fps_counter: 0,
        dropped_frames: 0
    };

    let mut buffers = vec![vec![0u8; camera.frame_size()]; camera.settings().num_buffers.max(1)];
    let result = camera.acquire_continuously(&mut buffers, &mut listener);
    if let Err(e) = &result {
        log::error!("capture failed: {}", e);
    }

    (camera, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::simulator::{frame_contents, SimBus, SimCamera};
    use crate::camera::IIDCDriver;
    use crate::camera::registers::csr;
    use std::time::Duration;

    #[test]
    fn given_capture_thread_receive_frames_and_get_camera_back() {
        let sim = SimCamera::new();
        let bus = SimBus::new();
        bus.add_camera(0, sim.clone());
        let camera = IIDCDriver::new(Arc::new(bus)).open_camera(0).unwrap();

        let capture = spawn_capture_thread(camera, 4);
        let mut frames = vec![];
        while frames.len() < 3 {
            match capture.receiver().recv_timeout(Duration::from_secs(10)).unwrap() {
                CaptureToMainThreadMsg::FrameReady(image, _) => frames.push(image),
                _ => ()
            }
        }

        let (camera, result) = capture.finish().unwrap();
        assert!(result.unwrap());
        assert_eq!(0, sim.register(csr::ISO_EN));

        assert_eq!(640, frames[0].width());
        assert_eq!(480, frames[0].height());
        assert_eq!(ImagePixelFormat::Mono8, frames[0].pixel_format());
        assert_eq!(frame_contents(0, 640 * 480), frames[0].pixels());

        // camera is usable after the thread ends
        let mut buffer = vec![0; camera.frame_size()];
        let mut camera = camera;
        assert!(camera.acquire(&mut buffer).unwrap());
    }
}
