//! Session-level integration tests against a simulated device
//!
//! Covers the typed operations, the out-of-range guard, and the full
//! tune-completion race: TuningDone, Busy, Error and timeout resolutions,
//! single-resolution discipline, and subscription teardown.

use driver::testing::MockTransport;
use driver::{DeviceIdentity, Error, Session, TransportError};
use protocol::{Command, DeviceState, InterruptKind, encode_notification};
use std::sync::Arc;
use std::time::Duration;

fn open_session(transport: &Arc<MockTransport>) -> Session {
    Session::open(
        DeviceIdentity::new("usb:001:004"),
        Box::new(transport.clone()),
    )
    .expect("session should open against the default mock")
}

fn tuning_done(wavelength: f32) -> [u8; 8] {
    encode_notification(
        InterruptKind::TuningDone as u8,
        DeviceState::Ready as u8,
        wavelength,
    )
}

mod commands {
    use super::*;

    #[tokio::test]
    async fn test_set_wavelength_issues_one_bit_exact_request() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        session.set_wavelength(532).unwrap();

        let requests = transport.requests_for(Command::SetWavelength);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_type, 0b0100_0000);
        assert_eq!(requests[0].request, 0x81);
        assert_eq!(requests[0].payload, Some(532.0f32.to_le_bytes()));
    }

    #[tokio::test]
    async fn test_every_step_in_range_is_accepted() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);
        let range = session.tuning_range();

        for target in (range.min..=range.max).step_by(range.step as usize) {
            session.set_wavelength(target).unwrap();
        }

        let requests = transport.requests_for(Command::SetWavelength);
        assert_eq!(requests.len(), (range.max - range.min + 1) as usize);
    }

    #[tokio::test]
    async fn test_out_of_range_issues_zero_transfers() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);
        let before = transport.requests().len();

        for target in [0, 419, 731, u32::MAX] {
            let err = session.set_wavelength(target).unwrap_err();
            assert!(
                matches!(err, Error::OutOfRange { min: 420, max: 730, .. }),
                "target {target} should be rejected, got {err:?}"
            );
        }

        assert_eq!(transport.requests().len(), before);
    }

    #[tokio::test]
    async fn test_temperature_and_state_reads() {
        let transport = Arc::new(MockTransport::new());
        transport.set_f32_response(Command::GetTemperature, 24.25);
        transport.set_u8_response(Command::GetLctfState, DeviceState::Tuning as u8);

        let session = open_session(&transport);
        assert_eq!(session.temperature().unwrap(), 24.25);
        assert_eq!(session.state().unwrap(), DeviceState::Tuning);

        // State is re-queried every call, never cached
        transport.set_u8_response(Command::GetLctfState, DeviceState::Ready as u8);
        assert_eq!(session.state().unwrap(), DeviceState::Ready);
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_as_communication_error() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        transport.fail_with(TransportError::NoDevice);
        assert!(matches!(
            session.temperature(),
            Err(Error::Communication(TransportError::NoDevice))
        ));
        assert!(matches!(
            session.set_wavelength(532),
            Err(Error::Communication(TransportError::NoDevice))
        ));
    }

    #[tokio::test]
    async fn test_calibrate_and_feature_flags() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        session.calibrate().unwrap();
        session.set_overdrive_enabled(false).unwrap();

        let calibrate = transport.requests_for(Command::Calibrate);
        assert_eq!(calibrate.len(), 1);
        assert_eq!(calibrate[0].value, 1);

        // Construction enabled overdrive once; the explicit disable follows
        let overdrive = transport.requests_for(Command::OverdriveEnable);
        assert_eq!(overdrive.len(), 2);
        assert_eq!(overdrive[1].value, 0);
    }
}

mod tune_completion {
    use super::*;

    // Waiters are always registered before the completion is pushed:
    // a notification broadcast before any receiver exists is dropped,
    // so the registration order below is what makes these deterministic.

    #[tokio::test]
    async fn test_tuning_done_resolves_wait() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        session.set_wavelength(532).unwrap();
        transport.push_notification(tuning_done(532.0));

        assert_eq!(waiter.wait().await.unwrap(), 532);
    }

    #[tokio::test]
    async fn test_busy_resolves_to_device_busy() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        session.set_wavelength(650).unwrap();
        transport.push_notification(encode_notification(
            InterruptKind::Busy as u8,
            DeviceState::Busy as u8,
            650.0,
        ));

        assert!(matches!(waiter.wait().await, Err(Error::DeviceBusy { .. })));
    }

    #[tokio::test]
    async fn test_error_resolves_to_device_error() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        session.set_wavelength(650).unwrap();
        transport.push_notification(encode_notification(
            InterruptKind::Error as u8,
            DeviceState::None as u8,
            650.0,
        ));

        assert!(matches!(waiter.wait().await, Err(Error::DeviceError { .. })));
    }

    #[tokio::test]
    async fn test_silence_resolves_to_timeout() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);
        let mut events = session.subscribe();

        let waiter = session.tune_waiter(Duration::from_millis(200)).unwrap();
        session.set_wavelength(532).unwrap();
        assert!(matches!(waiter.wait().await, Err(Error::Timeout { .. })));

        // The timed-out waiter tore down its subscription. A completion
        // arriving afterwards still flows to observers but resolves
        // nothing: a fresh waiter registered after it times out too.
        transport.push_notification(tuning_done(532.0));
        assert_eq!(events.recv().await.unwrap().kind, InterruptKind::TuningDone);

        let result = session.wait_for_tune(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_completions_resolve_once() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);
        let mut events = session.subscribe();

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        session.set_wavelength(532).unwrap();
        transport.push_notification(tuning_done(532.0));
        transport.push_notification(tuning_done(532.0));
        transport.push_notification(tuning_done(533.0));

        // First completion wins; the rest land after the waiter tore down
        assert_eq!(waiter.wait().await.unwrap(), 532);

        // Drain the observer so every stale completion is known dispatched
        for _ in 0..3 {
            assert_eq!(events.recv().await.unwrap().kind, InterruptKind::TuningDone);
        }

        // A fresh waiter only sees events from after its registration, so
        // the stale completions above must not resolve it
        let result = session.wait_for_tune(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_completion_immediately_after_command_is_not_missed() {
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(open_session(&transport));

        // Simulated instant device: fires TuningDone the moment the
        // SetWavelength command hits the bus
        let device = transport.clone();
        let responder = tokio::spawn(async move {
            loop {
                if !device.requests_for(Command::SetWavelength).is_empty() {
                    device.push_notification(tuning_done(600.0));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let confirmed = session
            .set_wavelength_and_wait(600, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(confirmed, 600);

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_tune_without_command() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        transport.push_notification(tuning_done(480.0));

        assert_eq!(waiter.wait().await.unwrap(), 480);
        // No command was issued on our behalf
        assert!(transport.requests_for(Command::SetWavelength).is_empty());
    }

    #[tokio::test]
    async fn test_unrelated_notifications_do_not_resolve() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(2)).unwrap();
        session.set_wavelength(532).unwrap();
        transport.push_notification(encode_notification(
            InterruptKind::StateChanged as u8,
            DeviceState::Tuning as u8,
            532.0,
        ));
        transport.push_notification(encode_notification(
            InterruptKind::CalibrationDone as u8,
            DeviceState::Ready as u8,
            0.0,
        ));
        transport.push_notification(tuning_done(532.0));

        assert_eq!(waiter.wait().await.unwrap(), 532);
    }

    #[tokio::test]
    async fn test_dropping_session_fails_pending_wait() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);

        let waiter = session.tune_waiter(Duration::from_secs(5)).unwrap();
        drop(session);

        assert!(matches!(waiter.wait().await, Err(Error::SessionDisposed)));
    }
}

mod observers {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_sees_events_in_arrival_order() {
        let transport = Arc::new(MockTransport::new());
        let session = open_session(&transport);
        let mut events = session.subscribe();

        transport.push_notification(encode_notification(
            InterruptKind::StateChanged as u8,
            DeviceState::Tuning as u8,
            532.0,
        ));
        transport.push_notification(tuning_done(532.0));

        assert_eq!(events.recv().await.unwrap().kind, InterruptKind::StateChanged);
        let done = events.recv().await.unwrap();
        assert_eq!(done.kind, InterruptKind::TuningDone);
        assert_eq!(done.wavelength, 532);
    }
}
