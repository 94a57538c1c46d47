use rand::prelude::*;
use rand_xoshiro::Xoshiro128StarStar;
use std::time::Duration;

use aoa::{
    descriptor::{find_endpoints, Endpoints, ENDPOINT},
    negotiate, AccessoryIdentity, AudioMode, Accessory, ConnectionState, EndpointRecord, Error, TaskState,
    TransferError, Transport, ACCESSORY_GET_PROTOCOL, ACCESSORY_SEND_STRING, ACCESSORY_SET_AUDIO_MODE, ACCESSORY_START,
};

mod util;
use util::*;

const ADDR: u8 = 1;
const LAYOUT_SEED: u64 = 12523;

fn identity() -> AccessoryIdentity {
    AccessoryIdentity::new("Example Inc.", "Dock", "Example dock", "1.0", "https://example.com/dock", "0001")
}

fn sent_slots(transport: &MockTransport) -> Vec<u16> {
    transport.control_outs(ACCESSORY_SEND_STRING).into_iter().map(|(_, index, _)| index).collect()
}

#[test]
fn protocol_1_sends_all_strings() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(1);
    let identity = identity().without_app(true).with_audio_mode(AudioMode::Pcm16Stereo44k);

    assert_eq!(negotiate::switch_device(&mut transport, ADDR, &identity), Ok(1));

    assert_eq!(sent_slots(&transport), [0, 1, 2, 3, 4, 5]);
    let strings = transport.control_outs(ACCESSORY_SEND_STRING);
    assert_eq!(strings[0].2, b"Example Inc.\0");
    assert_eq!(strings[4].2, b"https://example.com/dock\0");
    assert!(transport.control_outs(ACCESSORY_SET_AUDIO_MODE).is_empty(), "audio requires AOA 2.0");
    assert_eq!(transport.control_outs(ACCESSORY_START).len(), 1);
}

#[test]
fn protocol_2_skips_identification() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(2);
    let identity = identity().without_app(true).with_audio_mode(AudioMode::Pcm16Stereo44k);

    assert_eq!(negotiate::switch_device(&mut transport, ADDR, &identity), Ok(2));

    assert_eq!(sent_slots(&transport), [2, 3, 4, 5]);
    assert_eq!(transport.control_outs(ACCESSORY_SET_AUDIO_MODE), [(1, 0, vec![])]);

    let Some(Call::ControlOut { request, .. }) = transport.calls.last() else { panic!("no start request") };
    assert_eq!(*request, ACCESSORY_START);
}

#[test]
fn protocol_2_with_app_sends_all_strings() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(2);

    assert_eq!(negotiate::switch_device(&mut transport, ADDR, &identity()), Ok(2));

    assert_eq!(sent_slots(&transport), [0, 1, 2, 3, 4, 5]);
    assert!(transport.control_outs(ACCESSORY_SET_AUDIO_MODE).is_empty());
}

#[test]
fn unsupported_protocol() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(0);

    assert_eq!(negotiate::switch_device(&mut transport, ADDR, &identity()), Err(Error::UnsupportedProtocol(0)));
    assert_eq!(transport.calls.len(), 1);
    assert!(matches!(transport.calls[0], Call::ControlIn { request: ACCESSORY_GET_PROTOCOL, len: 2, .. }));
}

#[test]
fn protocol_query_failure() {
    init_log();
    let mut transport = MockTransport::new();

    assert_eq!(
        negotiate::switch_device(&mut transport, ADDR, &identity()),
        Err(Error::Transport(TransferError::Stall))
    );
}

#[test]
fn string_failure_is_not_fatal() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(1);
    transport.fail_request = Some((ACCESSORY_SEND_STRING, 2));

    assert_eq!(negotiate::switch_device(&mut transport, ADDR, &identity()), Ok(1));
    assert_eq!(sent_slots(&transport), [0, 1]);
    assert_eq!(transport.control_outs(ACCESSORY_START).len(), 1);
}

#[test]
fn start_failure() {
    init_log();
    let mut transport = MockTransport::new().with_protocol(1);
    transport.fail_request = Some((ACCESSORY_START, 0));

    assert_eq!(
        negotiate::switch_device(&mut transport, ADDR, &identity()),
        Err(Error::Transport(TransferError::Stall))
    );
}

#[test]
fn negotiate_waits_for_detach() {
    init_log();
    let mut transport = MockTransport::new()
        .with_protocol(1)
        .with_states([TaskState::Addressed, TaskState::Addressed, TaskState::Detached]);

    assert_eq!(negotiate::negotiate(&mut transport, ADDR, &identity(), Duration::from_secs(60)), Ok(1));
    assert!(transport.states.is_empty());
}

#[test]
fn detach_wait_is_bounded() {
    init_log();
    let mut transport = MockTransport::new().with_states([TaskState::Addressed]);

    assert_eq!(negotiate::wait_for_detach(&mut transport, Duration::ZERO), Err(Error::NegotiationTimedOut));
}

#[test]
fn accessory_device_connects() {
    init_log();
    let transport = MockTransport::new().with_device(0x18d1, 0x2d01).with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity());
    assert_eq!(accessory.state(), ConnectionState::Idle);

    assert!(accessory.poll());
    assert!(accessory.is_first_time());
    assert_eq!(accessory.state(), ConnectionState::Connected);

    let transport = accessory.transport();
    assert_eq!(transport.task_state(), TaskState::Running);
    assert!(transport.calls.contains(&Call::ConfigDescriptor { len: 4 }));
    assert!(transport.calls.contains(&Call::ConfigDescriptor { len: accessory_config().len() }));
    assert!(transport.calls.contains(&Call::SetConfiguration(1)));
    assert!(transport.control_outs(ACCESSORY_START).is_empty());

    let table = &transport.tables[&ADDR];
    assert_eq!(table.control().max_packet_size, CONTROL_PACKET_SIZE);
    assert_eq!(table.get(1), Some(&EndpointRecord::new(1, 0x02, 512)));
    assert_eq!(table.get(2), Some(&EndpointRecord::new(2, 0x02, 512)));
    assert_eq!(table.len(), 3);

    accessory.clear_first_time();
    for _ in 0..3 {
        assert!(accessory.poll());
        assert!(!accessory.is_first_time());
    }

    accessory.transport_mut().states.push_back(TaskState::Detached);
    assert!(!accessory.poll());
    assert!(!accessory.is_connected());
    assert!(!accessory.is_first_time());
    assert_eq!(accessory.state(), ConnectionState::Disconnected);
    assert!(accessory.endpoints().is_none());

    assert!(!accessory.poll());
    assert_eq!(accessory.state(), ConnectionState::Idle);
}

#[test]
fn device_is_switched_then_connects() {
    init_log();
    let transport =
        MockTransport::new().with_device(0x18d1, 0x4ee7).with_protocol(2).with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity()).with_detach_timeout(Duration::from_secs(60));

    assert!(!accessory.poll());
    assert!(matches!(accessory.state(), ConnectionState::Negotiating { .. }));
    assert_eq!(accessory.protocol_version(), Some(2));
    assert_eq!(accessory.transport().control_outs(ACCESSORY_START).len(), 1);

    // Device has not dropped off yet.
    assert!(!accessory.poll());
    assert_eq!(accessory.transport().control_outs(ACCESSORY_START).len(), 1);

    accessory.transport_mut().states.push_back(TaskState::Detached);
    assert!(!accessory.poll());
    assert!(!accessory.is_first_time());
    assert_eq!(accessory.state(), ConnectionState::Disconnected);

    accessory.transport_mut().device = Some(device_descriptor(0x18d1, 0x2d00));
    accessory.transport_mut().states.push_back(TaskState::Addressed);
    assert!(accessory.poll());
    assert!(accessory.is_first_time());
    assert_eq!(accessory.protocol_version(), Some(2));
    assert_eq!(accessory.last_error(), None);
}

#[test]
fn negotiation_times_out() {
    init_log();
    let transport =
        MockTransport::new().with_device(0x18d1, 0x4ee7).with_protocol(1).with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity()).with_detach_timeout(Duration::ZERO);

    assert!(!accessory.poll());
    assert!(matches!(accessory.state(), ConnectionState::Negotiating { .. }));

    assert!(!accessory.poll());
    assert_eq!(accessory.state(), ConnectionState::Idle);
    assert_eq!(accessory.last_error(), Some(&Error::NegotiationTimedOut));

    // Starts over.
    assert!(!accessory.poll());
    assert_eq!(accessory.transport().control_outs(ACCESSORY_START).len(), 2);
}

#[test]
fn negotiation_times_out_on_enumeration_error() {
    init_log();
    let transport = MockTransport::new()
        .with_device(0x18d1, 0x4ee7)
        .with_protocol(2)
        .with_states([TaskState::Addressed, TaskState::Error]);
    let mut accessory = Accessory::new(transport, identity()).with_detach_timeout(Duration::ZERO);

    assert!(!accessory.poll());
    assert!(matches!(accessory.state(), ConnectionState::Negotiating { .. }));

    assert!(!accessory.poll());
    assert_eq!(accessory.transport().task_state(), TaskState::Error);
    assert_eq!(accessory.state(), ConnectionState::Idle);
    assert_eq!(accessory.last_error(), Some(&Error::NegotiationTimedOut));

    // Not addressed, so no new handshake.
    assert!(!accessory.poll());
    assert_eq!(accessory.state(), ConnectionState::Idle);
    assert_eq!(accessory.transport().control_outs(ACCESSORY_START).len(), 1);
}

#[test]
fn unsupported_device_stays_idle() {
    init_log();
    let transport =
        MockTransport::new().with_device(0x04e8, 0x6860).with_protocol(0).with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity());

    assert!(!accessory.poll());
    assert_eq!(accessory.state(), ConnectionState::Idle);
    assert_eq!(accessory.protocol_version(), Some(0));
    assert_eq!(accessory.last_error(), Some(&Error::UnsupportedProtocol(0)));
}

#[test]
fn descriptor_failure_is_retried() {
    init_log();
    let transport = MockTransport::new().with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity());

    assert!(!accessory.poll());
    assert_eq!(accessory.last_error(), Some(&Error::Transport(TransferError::Timeout)));
    assert_eq!(accessory.state(), ConnectionState::Idle);

    accessory.transport_mut().device = Some(device_descriptor(0x18d1, 0x2d00));
    assert!(accessory.poll());
    assert!(accessory.is_first_time());
}

#[test]
fn configuration_rejected() {
    init_log();
    let mut transport = MockTransport::new().with_device(0x18d1, 0x2d00).with_states([TaskState::Addressed]);
    transport.set_configuration_error = Some(TransferError::Stall);
    let mut accessory = Accessory::new(transport, identity());

    assert!(!accessory.poll());
    assert!(!accessory.is_first_time());
    assert_eq!(accessory.last_error(), Some(&Error::ConfigurationFailed(TransferError::Stall)));
    assert_eq!(accessory.transport().task_state(), TaskState::Addressed);
}

#[test]
fn missing_out_endpoint() {
    init_log();
    let mut transport = MockTransport::new().with_device(0x18d1, 0x2d00).with_states([TaskState::Addressed]);
    transport.config = config_descriptor(&[
        interface_descriptor(0, 2),
        endpoint_descriptor(0x81, 0x02, 512),
        endpoint_descriptor(0x02, 0x03, 64),
    ]);
    let mut accessory = Accessory::new(transport, identity());

    assert!(!accessory.poll());
    assert_eq!(accessory.last_error(), Some(&Error::EndpointsNotFound));
    assert!(!accessory.transport().calls.contains(&Call::SetConfiguration(1)));
}

#[test]
fn descriptor_too_large() {
    init_log();
    let mut transport = MockTransport::new();

    assert_eq!(
        find_endpoints(&mut transport, ADDR, 16),
        Err(Error::DescriptorTooLarge { length: accessory_config().len(), capacity: 16 })
    );
    assert_eq!(transport.calls, [Call::ConfigDescriptor { len: 4 }]);
}

fn filler(rng: &mut Xoshiro128StarStar) -> Vec<u8> {
    let ty = loop {
        let ty: u8 = rng.random();
        if ty != ENDPOINT {
            break ty;
        }
    };
    let len: u8 = rng.random_range(2..=24);
    let mut desc = vec![0; usize::from(len)];
    rng.fill_bytes(&mut desc);
    desc[0] = len;
    desc[1] = ty;
    desc
}

#[test]
fn endpoints_in_random_layouts() {
    init_log();
    let mut rng = Xoshiro128StarStar::seed_from_u64(LAYOUT_SEED);

    for _ in 0..500 {
        let input = EndpointRecord::new(rng.random_range(1..=15), 0x02, rng.random_range(8..=1024));
        let output = EndpointRecord::new(rng.random_range(1..=15), 0x02, rng.random_range(8..=1024));

        let mut parts = Vec::new();
        for _ in 0..rng.random_range(0..4) {
            parts.push(filler(&mut rng));
        }
        if rng.random_bool(0.5) {
            parts.push(endpoint_descriptor(0x80 | rng.random_range(1..=15), 0x03, 8));
        }
        let mut bulk = vec![
            endpoint_descriptor(0x80 | input.address, 0x02, input.max_packet_size),
            endpoint_descriptor(output.address, 0x02, output.max_packet_size),
        ];
        if rng.random_bool(0.5) {
            bulk.reverse();
        }
        for ep in bulk {
            parts.push(ep);
            for _ in 0..rng.random_range(0..3) {
                parts.push(filler(&mut rng));
            }
        }

        let mut transport = MockTransport::new();
        transport.config = config_descriptor(&parts);
        assert_eq!(find_endpoints(&mut transport, ADDR, 256), Ok(Endpoints { input, output }));
    }
}

#[test]
fn data_channel() {
    init_log();
    let transport = MockTransport::new().with_device(0x18d1, 0x2d00).with_states([TaskState::Addressed]);
    let mut accessory = Accessory::new(transport, identity());
    let mut buf = [0; 64];

    assert_eq!(accessory.write(b"hello"), Err(Error::NotConnected));
    assert_eq!(accessory.read(&mut buf, 100), Err(Error::NotConnected));

    assert!(accessory.poll());
    assert_eq!(accessory.write(b"hello"), Ok(5));
    assert_eq!(accessory.transport().calls.last(), Some(&Call::BulkOut { endpoint: 2, data: b"hello".to_vec() }));

    accessory.transport_mut().bulk_in.push_back(Ok(b"world".to_vec()));
    assert_eq!(accessory.read(&mut buf, 100), Ok(5));
    assert_eq!(&buf[..5], b"world");
    assert_eq!(accessory.transport().calls.last(), Some(&Call::BulkIn { endpoint: 1, len: 64, nak_limit: 100 }));

    assert_eq!(accessory.read(&mut buf, 100), Err(Error::Timeout));
    accessory.transport_mut().bulk_in.push_back(Err(TransferError::Stall));
    assert_eq!(accessory.read(&mut buf, 100), Err(Error::Transport(TransferError::Stall)));
}

#[cfg(feature = "host")]
#[test]
#[ignore = "Android device required"]
fn host() {
    use aoa::host::RusbTransport;

    init_log();
    let transport = RusbTransport::new(rusb::GlobalContext::default());
    let mut accessory = Accessory::new(transport, identity());

    println!("Waiting for accessory...");
    while !accessory.poll() {
        std::thread::sleep(Duration::from_millis(100));
    }
    println!("Connected: {:?}", accessory.endpoints());
}
