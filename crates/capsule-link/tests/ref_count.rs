//! Property tests for reference counting.

use capsule_link::{
    ConnectRequest, ConnectionRegistry, Connector, EventSink, RegistryConfig, TransportHandle,
};
use parking_lot::Mutex;
use proptest::prelude::*;

/// Opens sessions that never complete their handshake.
#[derive(Default)]
struct SilentConnector {
    sinks: Mutex<Vec<EventSink>>,
}

impl Connector for SilentConnector {
    fn open(&self, _request: ConnectRequest, events: EventSink) -> TransportHandle {
        self.sinks.lock().push(events);
        let (handle, _outbound) = TransportHandle::channel();
        handle
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_record_lives_iff_connects_exceed_disconnects(connects in 1usize..8, disconnects in 0usize..12) {
        let rt = runtime();
        let (endpoints, ref_count) = rt.block_on(async {
            let registry = ConnectionRegistry::with_connector(RegistryConfig::default(), SilentConnector::default());
            for _ in 0..connects {
                let mut connect = tokio_test::task::spawn(registry.connect("a.b.c", "/ws-x"));
                assert!(connect.poll().is_pending());
            }
            for _ in 0..disconnects {
                registry.disconnect("/ws-x");
            }
            (registry.endpoints(), registry.ref_count("/ws-x"))
        });

        prop_assert_eq!(endpoints.len(), usize::from(connects > disconnects));
        prop_assert_eq!(ref_count, connects.saturating_sub(disconnects));
    }

    #[test]
    fn test_interleaved_endpoints_count_separately(ops in proptest::collection::vec((any::<bool>(), 0usize..3), 0..40)) {
        let rt = runtime();
        rt.block_on(async {
            let endpoints = ["/ws-a", "/ws-b", "/ws-c"];
            let registry = ConnectionRegistry::with_connector(RegistryConfig::default(), SilentConnector::default());
            let mut expected = [0usize; 3];

            for (connect, index) in &ops {
                let endpoint = endpoints[*index];
                if *connect {
                    let mut attempt = tokio_test::task::spawn(registry.connect("a.b.c", endpoint));
                    assert!(attempt.poll().is_pending());
                    expected[*index] += 1;
                } else {
                    registry.disconnect(endpoint);
                    expected[*index] = expected[*index].saturating_sub(1);
                }
            }

            for (index, endpoint) in endpoints.iter().enumerate() {
                assert_eq!(registry.ref_count(endpoint), expected[index]);
            }
            let live = expected.iter().filter(|count| **count > 0).count();
            assert_eq!(registry.endpoints().len(), live);
        });
    }
}
