//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Single-shot and continuous acquisition.
//!
//! A frame is received with two isochronous requests: a bulk one for all packets except the last,
//! and a one-packet tail request (the last packet may be padded). The bulk request writes directly
//! into the frame buffer; the valid part of the tail is copied afterwards.
//!

use crate::bus::{IsoRequest, RequestStatus};
use crate::camera::registers::{self, csr, shot};
use crate::camera::*;
use std::time::Duration;

/// Receives frames and events from `IIDCCamera::acquire_continuously`.
///
/// Each method returns `true` to continue acquisition, `false` to stop it.
pub trait AcquisitionListener {
    /// Called with a completed frame and the index of its buffer.
    ///
    /// The slice is valid only for the duration of the call.
    fn on_acquisition(&mut self, frame: &[u8], index: usize) -> bool;

    /// Called when the start of a frame was not where expected; transmission has been restarted.
    fn on_sync_lost(&mut self) -> bool { true }

    /// Called when a frame could not be received.
    fn on_failure(&mut self) -> bool { true }
}

impl<F: FnMut(&[u8], usize) -> bool> AcquisitionListener for F {
    fn on_acquisition(&mut self, frame: &[u8], index: usize) -> bool {
        self(frame, index)
    }
}

/// Transmission enabled for a single-shot acquisition.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ShotControl {
    OneShot,
    MultiShot,
    Continuous
}

fn bulk_tag(slot: usize) -> usize { 2 * slot }

fn tail_tag(slot: usize) -> usize { 2 * slot + 1 }

fn slot_of(tag: usize) -> usize { tag / 2 }

fn is_bulk(tag: usize) -> bool { tag % 2 == 0 }

impl IIDCCamera {
    fn ensure_ready_for_acquisition(&self) -> Result<(), CameraError> {
        match self.state {
            ControllerState::ModeSelected => Ok(()),
            ControllerState::Idle => Err(CameraError::UnsupportedCapability("no video mode selected".to_string())),
            ControllerState::Acquiring => Err(CameraError::UnsupportedCapability("acquisition already running".to_string()))
        }
    }

    fn check_buffer_size(&self, buffer: &[u8]) -> Result<(), CameraError> {
        if buffer.len() != self.frame_size() {
            Err(CameraError::DimensionMismatch{ expected: self.frame_size(), actual: buffer.len() })
        } else {
            Ok(())
        }
    }

    /// Maximum time to wait for one frame (a bulk and tail request pair).
    pub fn frame_timeout(&self) -> Duration {
        let frame_period = self.frame_rate.map(|rate| rate.frame_period()).unwrap_or_default();
        frame_period.max(self.transmission.packet_duration()) * self.settings.timeout_factor
    }

    /// Creates the bulk and tail requests of a frame.
    fn frame_requests(&self, slot: usize, buffer: Vec<u8>, tail_buffer: Vec<u8>) -> Result<(IsoRequest, IsoRequest), CameraError> {
        let t = &self.transmission;
        let subchannel = self.channel.subchannel();
        let bpp = t.bytes_per_packet as usize;

        let bulk = IsoRequest::new(bulk_tag(slot), subchannel, t.packets_per_frame as usize - 1, bpp, buffer)?;
        let tail = IsoRequest::new(tail_tag(slot), subchannel, 1, bpp, tail_buffer)?;

        Ok((bulk, tail))
    }

    /// Cancels queued requests and waits for all of them to be returned.
    fn cancel_and_drain(&mut self, mut outstanding: usize) -> Vec<IsoRequest> {
        let mut drained = vec![];
        if outstanding == 0 { return drained; }

        if let Err(e) = self.channel.cancel() {
            log::warn!("failed to cancel isochronous requests: {}", e);
        }
        while outstanding > 0 {
            match self.channel.dequeue(outstanding, None) {
                Ok(requests) if !requests.is_empty() => {
                    outstanding -= requests.len().min(outstanding);
                    drained.extend(requests);
                },
                Ok(_) => {
                    log::warn!("{} isochronous requests not returned after cancellation", outstanding);
                    break;
                },
                Err(e) => {
                    log::warn!("failed to dequeue cancelled requests: {}", e);
                    break;
                }
            }
        }

        drained
    }

    fn enable_shot(&self) -> Result<ShotControl, CameraError> {
        let control = if self.basic_functions.one_shot {
            self.regs.write(self.base + csr::ONE_SHOT, shot::one_shot_request())?;
            ShotControl::OneShot
        } else if self.basic_functions.multi_shot {
            self.regs.write(self.base + csr::ONE_SHOT, shot::multi_shot_request(1))?;
            ShotControl::MultiShot
        } else {
            self.regs.write(self.base + csr::ISO_EN, registers::with_flag(true))?;
            ShotControl::Continuous
        };

        Ok(control)
    }

    fn disable_shot(&self, control: ShotControl) -> Result<(), CameraError> {
        match control {
            ShotControl::OneShot | ShotControl::MultiShot => self.regs.write(self.base + csr::ONE_SHOT, 0)?,
            ShotControl::Continuous => self.regs.write(self.base + csr::ISO_EN, registers::with_flag(false))?
        }

        Ok(())
    }

    fn set_continuous_transmission(&self, enabled: bool) -> Result<(), CameraError> {
        self.regs.write(self.base + csr::ISO_EN, registers::with_flag(enabled))?;
        Ok(())
    }

    /// Disables and re-enables continuous transmission so that it restarts at a frame boundary.
    fn restart_continuous_transmission(&self) -> Result<(), CameraError> {
        self.set_continuous_transmission(false)?;
        std::thread::sleep(self.settings.sync_settle_delay);
        self.set_continuous_transmission(true)
    }

    /// Acquires a single frame into `buffer`.
    ///
    /// Returns `Ok(false)` if the frame was not received; in that case only the data actually
    /// received has been written to `buffer`.
    ///
    /// # Parameters
    ///
    /// * `buffer` - Destination; its length must equal `frame_size()`.
    ///
    pub fn acquire(&mut self, buffer: &mut [u8]) -> Result<bool, CameraError> {
        self.ensure_ready_for_acquisition()?;
        self.check_buffer_size(buffer)?;

        self.state = ControllerState::Acquiring;
        let result = self.acquire_single(buffer);
        self.state = ControllerState::ModeSelected;

        result
    }

    fn acquire_single(&mut self, buffer: &mut [u8]) -> Result<bool, CameraError> {
        let bulk_bytes = self.transmission.bulk_bytes() as usize;
        let last_packet_bytes = self.transmission.bytes_in_last_packet() as usize;
        let bpp = self.transmission.bytes_per_packet as usize;

        self.program_iso_channel()?;

        let (bulk, tail) = self.frame_requests(0, vec![0; bulk_bytes], vec![0; bpp])?;
        let mut queued = 0;
        for request in [bulk, tail] {
            if let Err(e) = self.channel.queue(request) {
                log::warn!("failed to queue isochronous request: {}", e);
                self.cancel_and_drain(queued);
                return Ok(false);
            }
            queued += 1;
        }

        let control = match self.enable_shot() {
            Ok(control) => control,
            Err(e) => {
                log::warn!("failed to start transmission: {}", e);
                self.cancel_and_drain(queued);
                return Ok(false);
            }
        };

        let mut requests = match self.channel.dequeue(2, Some(self.frame_timeout())) {
            Ok(requests) => requests,
            Err(e) => {
                log::warn!("failed to dequeue isochronous requests: {}", e);
                vec![]
            }
        };
        if requests.len() < 2 {
            log::warn!("frame not received within {:?}", self.frame_timeout());
            let outstanding = 2 - requests.len();
            requests.extend(self.cancel_and_drain(outstanding));
        }

        if let Err(e) = self.disable_shot(control) {
            log::warn!("failed to stop transmission: {}", e);
        }

        let mut success = requests.len() == 2;
        for request in &requests {
            let received = request.received_packets() * request.payload_size();
            if is_bulk(request.tag()) {
                let length = received.min(bulk_bytes);
                buffer[..length].copy_from_slice(&request.buffer()[..length]);
            } else if request.status() == RequestStatus::Completed {
                buffer[bulk_bytes..].copy_from_slice(&request.buffer()[..last_packet_bytes]);
            }
            success &= request.status() == RequestStatus::Completed;
        }

        Ok(success)
    }

    /// Receives frames continuously into `buffers` (used round-robin) and passes them to `listener`.
    ///
    /// Returns `Ok(true)` if the listener stopped the acquisition, `Ok(false)` if frames stopped
    /// arriving. The buffers are returned to the caller in either case.
    ///
    /// # Parameters
    ///
    /// * `buffers` - Frame buffers; the length of each must equal `frame_size()`.
    ///
    pub fn acquire_continuously<L: AcquisitionListener + ?Sized>(
        &mut self,
        buffers: &mut [Vec<u8>],
        listener: &mut L
    ) -> Result<bool, CameraError> {
        self.ensure_ready_for_acquisition()?;
        if buffers.is_empty() {
            return Err(CameraError::UnsupportedCapability("no frame buffers given".to_string()));
        }
        for buffer in buffers.iter() {
            self.check_buffer_size(buffer)?;
        }

        log::info!(
            "starting continuous acquisition with {} buffers ({} bytes per frame, {} packets of {} bytes)",
            buffers.len(), self.frame_size(), self.transmission.packets_per_frame, self.transmission.bytes_per_packet
        );

        self.state = ControllerState::Acquiring;
        let (result, returned) = self.acquisition_loop(buffers, listener);
        self.state = ControllerState::ModeSelected;

        for request in returned {
            if is_bulk(request.tag()) {
                let slot = slot_of(request.tag());
                if let Some(buffer) = buffers.get_mut(slot) { *buffer = request.into_buffer(); }
            }
        }
        let frame_size = self.frame_size();
        for buffer in buffers.iter_mut().filter(|b| b.len() != frame_size) {
            log::warn!("frame buffer was not returned by the transport");
            *buffer = vec![0; frame_size];
        }

        log::info!("continuous acquisition finished");

        result
    }

    /// Runs continuous acquisition; returns the result and all requests taken back from the channel.
    fn acquisition_loop<L: AcquisitionListener + ?Sized>(
        &mut self,
        buffers: &mut [Vec<u8>],
        listener: &mut L
    ) -> (Result<bool, CameraError>, Vec<IsoRequest>) {
        let bulk_bytes = self.transmission.bulk_bytes() as usize;
        let last_packet_bytes = self.transmission.bytes_in_last_packet() as usize;
        let bpp = self.transmission.bytes_per_packet as usize;

        let mut returned = vec![];
        let mut outstanding = 0;

        macro_rules! finish {
            ($result:expr) => {{
                if let Err(e) = self.set_continuous_transmission(false) {
                    log::warn!("failed to disable transmission: {}", e);
                }
                returned.extend(self.cancel_and_drain(outstanding));
                return ($result, returned);
            }}
        }

        if let Err(e) = self.program_iso_channel() {
            return (Err(e), returned);
        }

        for (slot, buffer) in buffers.iter_mut().enumerate() {
            let (bulk, tail) = match self.frame_requests(slot, std::mem::take(buffer), vec![0; bpp]) {
                Ok(pair) => pair,
                Err(e) => finish!(Err(e))
            };
            for request in [bulk, tail] {
                match self.channel.queue(request) {
                    Ok(()) => outstanding += 1,
                    Err(e) => {
                        log::warn!("failed to queue isochronous request: {}", e);
                        finish!(Ok(false));
                    }
                }
            }
        }

        if let Err(e) = self.restart_continuous_transmission() {
            log::warn!("failed to start transmission: {}", e);
            finish!(Ok(false));
        }

        loop {
            let mut pair = match self.channel.dequeue(2, Some(self.frame_timeout())) {
                Ok(pair) => pair,
                Err(e) => {
                    log::warn!("failed to dequeue isochronous requests: {}", e);
                    vec![]
                }
            };
            outstanding -= pair.len();
            if pair.len() < 2 {
                log::warn!("frame not received within {:?}; stopping acquisition", self.frame_timeout());
                returned.append(&mut pair);
                finish!(Ok(false));
            }

            let tail = pair.remove(1);
            let mut bulk = pair.remove(0);
            if !is_bulk(bulk.tag()) || tail.tag() != bulk.tag() + 1 {
                returned.push(bulk);
                returned.push(tail);
                finish!(Err(CameraError::ProtocolMismatch("isochronous requests completed out of order".to_string())));
            }
            let slot = slot_of(bulk.tag());

            let completed = bulk.status() == RequestStatus::Completed && tail.status() == RequestStatus::Completed;
            let keep_going = if !completed {
                log::warn!("frame {} failed", slot);
                listener.on_failure()
            } else if !starts_frame(&bulk, &tail) {
                log::warn!("lost frame synchronization; restarting transmission");
                if let Err(e) = self.restart_continuous_transmission() {
                    log::warn!("failed to restart transmission: {}", e);
                }
                listener.on_sync_lost()
            } else {
                bulk.buffer_mut()[bulk_bytes..].copy_from_slice(&tail.buffer()[..last_packet_bytes]);
                listener.on_acquisition(bulk.buffer(), slot)
            };

            if !keep_going {
                returned.push(bulk);
                returned.push(tail);
                finish!(Ok(true));
            }

            for mut request in [bulk, tail] {
                request.reset();
                if let Err(e) = self.channel.queue(request) {
                    log::warn!("failed to re-queue isochronous request: {}", e);
                    finish!(Ok(false));
                }
                outstanding += 1;
            }
        }
    }
}

/// Checks if the first packet of a received frame carries the start-of-frame sync field.
fn starts_frame(bulk: &IsoRequest, tail: &IsoRequest) -> bool {
    let first = if bulk.packet_count() > 0 { bulk.headers()[0] } else { tail.headers()[0] };
    registers::iso_header_sync(first) == registers::ISO_SYNC_START_OF_FRAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::simulator::{frame_contents, SimBus, SimCamera, SimFault};
    use crate::camera::iidc::DriverSettings;
    use std::sync::Arc;

    fn open_simulated() -> (SimCamera, IIDCCamera) {
        open_camera(SimCamera::new())
    }

    fn open_camera(sim: SimCamera) -> (SimCamera, IIDCCamera) {
        let bus = SimBus::new();
        bus.add_camera(0, sim.clone());
        let settings = DriverSettings{ sync_settle_delay: Duration::from_millis(0), ..Default::default() };
        let camera = IIDCDriver::with_settings(Arc::new(bus), settings).open_camera(0).unwrap();
        (sim, camera)
    }

    #[derive(Default)]
    struct RecordingListener {
        frames: Vec<(usize, Vec<u8>)>,
        sync_losses: usize,
        failures: usize,
        stop_after: usize,
        stop_on_failure: bool
    }

    impl AcquisitionListener for RecordingListener {
        fn on_acquisition(&mut self, frame: &[u8], index: usize) -> bool {
            self.frames.push((index, frame.to_vec()));
            self.frames.len() < self.stop_after
        }

        fn on_sync_lost(&mut self) -> bool {
            self.sync_losses += 1;
            true
        }

        fn on_failure(&mut self) -> bool {
            self.failures += 1;
            !self.stop_on_failure
        }
    }

    #[test]
    fn given_single_shot_receive_whole_frame() {
        let (sim, mut camera) = open_simulated();
        let mut buffer = vec![0; camera.frame_size()];
        assert!(camera.acquire(&mut buffer).unwrap());
        assert_eq!(frame_contents(0, buffer.len()), buffer);
        assert_eq!(1, sim.frames_sent());
        assert_eq!(0, sim.register(csr::ONE_SHOT));
        assert_eq!(ControllerState::ModeSelected, camera.state());
    }

    #[test]
    fn given_only_multi_shot_request_single_frame() {
        let sim = SimCamera::new();
        // mode error status, feature error status, multi-shot
        sim.set_register(csr::BASIC_FUNC_INQ, 0x6000_0800);
        let (sim, mut camera) = open_camera(sim);
        assert!(camera.basic_functions().multi_shot && !camera.basic_functions().one_shot);

        let mut buffer = vec![0; camera.frame_size()];
        assert!(camera.acquire(&mut buffer).unwrap());
        assert_eq!(frame_contents(0, buffer.len()), buffer);

        let log = sim.write_log();
        assert!(log.contains(&(csr::ONE_SHOT, shot::multi_shot_request(1))));
        assert!(!log.contains(&(csr::ONE_SHOT, shot::one_shot_request())));
        assert_eq!(0, sim.register(csr::ONE_SHOT));
    }

    #[test]
    fn given_no_finite_shots_use_continuous_transmission() {
        let sim = SimCamera::new();
        sim.set_register(csr::BASIC_FUNC_INQ, 0x6000_0000);
        let (sim, mut camera) = open_camera(sim);

        let mut buffer = vec![0; camera.frame_size()];
        assert!(camera.acquire(&mut buffer).unwrap());
        assert_eq!(frame_contents(0, buffer.len()), buffer);

        let log = sim.write_log();
        assert!(log.contains(&(csr::ISO_EN, registers::with_flag(true))));
        assert!(log.iter().all(|(offset, _)| *offset != csr::ONE_SHOT));
        assert_eq!(0, sim.register(csr::ISO_EN));
    }

    #[test]
    fn given_partial_mode_with_short_last_packet_receive_whole_frame() {
        let (_, mut camera) = open_simulated();
        camera.set_mode(Mode::Partial(0)).unwrap();
        camera.set_region(Region::new(Offset::new(2, 4), Dimension::new(640, 482))).unwrap();
        assert_eq!(1280, camera.transmission().bytes_in_last_packet());

        let mut buffer = vec![0; camera.frame_size()];
        assert!(camera.acquire(&mut buffer).unwrap());
        assert_eq!(frame_contents(0, 640 * 482), buffer);
    }

    #[test]
    fn given_single_packet_frame_receive_with_empty_bulk_request() {
        let (_, mut camera) = open_simulated();
        camera.set_mode(Mode::Partial(0)).unwrap();
        camera.set_region(Region::new(Offset::default(), Dimension::new(64, 16))).unwrap();
        assert_eq!(1, camera.transmission().packets_per_frame);

        let mut buffer = vec![0; 64 * 16];
        assert!(camera.acquire(&mut buffer).unwrap());
        assert_eq!(frame_contents(0, 64 * 16), buffer);
    }

    #[test]
    fn given_wrong_buffer_size_fail_before_queuing() {
        let (sim, mut camera) = open_simulated();
        let num_writes = sim.num_writes();
        let mut buffer = vec![0; camera.frame_size() - 1];
        assert!(matches!(
            camera.acquire(&mut buffer),
            Err(CameraError::DimensionMismatch{ expected, actual }) if expected == 640 * 480 && actual == 640 * 480 - 1
        ));
        assert_eq!(num_writes, sim.num_writes());
    }

    #[test]
    fn given_stalled_single_shot_leave_unreceived_data_untouched() {
        let (sim, mut camera) = open_simulated();
        sim.inject(SimFault::StallAfterRequests(1));
        let mut buffer = vec![0xEE; camera.frame_size()];
        assert!(!camera.acquire(&mut buffer).unwrap());

        let bulk_bytes = camera.transmission().bulk_bytes() as usize;
        assert_eq!(frame_contents(0, bulk_bytes)[..], buffer[..bulk_bytes]);
        assert!(buffer[bulk_bytes..].iter().all(|b| *b == 0xEE));
        assert_eq!(0, sim.register(csr::ONE_SHOT));

        // the channel is usable again
        sim.clear_faults();
        assert!(camera.acquire(&mut buffer).unwrap());
    }

    #[test]
    fn given_listener_stopping_at_third_frame_disable_transmission() {
        let (sim, mut camera) = open_simulated();
        let frame_size = camera.frame_size();
        let mut buffers = vec![vec![0; frame_size]; 4];
        let mut listener = RecordingListener{ stop_after: 3, ..Default::default() };

        assert!(camera.acquire_continuously(&mut buffers, &mut listener).unwrap());

        assert_eq!(3, listener.frames.len());
        for (i, (index, frame)) in listener.frames.iter().enumerate() {
            assert_eq!(i, *index);
            assert_eq!(&frame_contents(i as u64, frame_size), frame);
        }
        assert_eq!(0, sim.register(csr::ISO_EN));
        assert_eq!(ControllerState::ModeSelected, camera.state());
        assert!(buffers.iter().all(|b| b.len() == frame_size));
        assert_eq!(frame_contents(2, frame_size), buffers[2]);
    }

    #[test]
    fn given_more_frames_than_buffers_reuse_buffers_round_robin() {
        let (_, mut camera) = open_simulated();
        let mut buffers = vec![vec![0; camera.frame_size()]; 2];
        let mut indices = vec![];
        let mut listener = |_: &[u8], index: usize| { indices.push(index); indices.len() < 5 };

        assert!(camera.acquire_continuously(&mut buffers, &mut listener).unwrap());
        assert_eq!(vec![0, 1, 0, 1, 0], indices);
    }

    #[test]
    fn given_missing_sync_field_restart_transmission_and_notify() {
        let (sim, mut camera) = open_simulated();
        let frame_size = camera.frame_size();
        sim.inject(SimFault::NoSyncOnFrame(1));
        let mut buffers = vec![vec![0; frame_size]; 3];
        let mut listener = RecordingListener{ stop_after: 2, ..Default::default() };

        assert!(camera.acquire_continuously(&mut buffers, &mut listener).unwrap());

        assert_eq!(1, listener.sync_losses);
        assert_eq!(0, listener.failures);
        assert_eq!(vec![0, 2], listener.frames.iter().map(|(index, _)| *index).collect::<Vec<_>>());
        assert_eq!(frame_contents(2, frame_size), listener.frames[1].1);
        assert_eq!(0, sim.register(csr::ISO_EN));
    }

    #[test]
    fn given_failed_request_notify_and_continue() {
        let (sim, mut camera) = open_simulated();
        let frame_size = camera.frame_size();
        // bulk request of the second frame
        sim.inject(SimFault::FailRequest(2));
        let mut buffers = vec![vec![0; frame_size]; 3];
        let mut listener = RecordingListener{ stop_after: 2, ..Default::default() };

        assert!(camera.acquire_continuously(&mut buffers, &mut listener).unwrap());

        assert_eq!(1, listener.failures);
        assert_eq!(0, listener.sync_losses);
        assert_eq!(vec![0, 2], listener.frames.iter().map(|(index, _)| *index).collect::<Vec<_>>());
        assert_eq!(frame_contents(2, frame_size), listener.frames[1].1);
        assert_eq!(0, sim.register(csr::ISO_EN));
    }

    #[test]
    fn given_listener_stopping_on_failure_end_acquisition() {
        let (sim, mut camera) = open_simulated();
        let frame_size = camera.frame_size();
        sim.inject(SimFault::FailRequest(0));
        let mut buffers = vec![vec![0; frame_size]; 2];
        let mut listener = RecordingListener{ stop_after: usize::MAX, stop_on_failure: true, ..Default::default() };

        assert!(camera.acquire_continuously(&mut buffers, &mut listener).unwrap());

        assert_eq!(1, listener.failures);
        assert!(listener.frames.is_empty());
        assert_eq!(0, sim.register(csr::ISO_EN));
        assert!(buffers.iter().all(|b| b.len() == frame_size));
        assert_eq!(ControllerState::ModeSelected, camera.state());
    }

    #[test]
    fn given_stalled_stream_stop_and_return_buffers() {
        let (sim, mut camera) = open_simulated();
        let frame_size = camera.frame_size();
        sim.inject(SimFault::StallAfterRequests(5));
        let mut buffers = vec![vec![0; frame_size]; 4];
        let mut listener = RecordingListener{ stop_after: usize::MAX, ..Default::default() };

        assert!(!camera.acquire_continuously(&mut buffers, &mut listener).unwrap());

        assert_eq!(2, listener.frames.len());
        assert_eq!(0, sim.register(csr::ISO_EN));
        assert!(buffers.iter().all(|b| b.len() == frame_size));
        assert_eq!(ControllerState::ModeSelected, camera.state());
    }

    #[test]
    fn given_wrong_buffer_size_fail_continuous_acquisition() {
        let (_, mut camera) = open_simulated();
        let mut buffers = vec![vec![0; camera.frame_size()], vec![0; 10]];
        let mut listener = |_: &[u8], _: usize| true;
        assert!(matches!(
            camera.acquire_continuously(&mut buffers, &mut listener),
            Err(CameraError::DimensionMismatch{ .. })
        ));
        assert_eq!(camera.frame_size(), buffers[0].len());
    }

    #[test]
    fn given_frame_rate_derive_timeout() {
        let (_, mut camera) = open_simulated();
        // 30 fps, 240 packets: frame period dominates
        assert_eq!(Duration::from_micros(4 * 33_333), camera.frame_timeout());
        camera.set_mode(Mode::Partial(0)).unwrap();
        // 300 packets of 125 µs
        assert_eq!(Duration::from_micros(4 * 37_500), camera.frame_timeout());
    }
}
