//! §8(d): a reliable send must survive packet loss by retransmitting, as long as loss doesn't
//! exhaust `max_send_attempts`.

use std::sync::{Arc, Mutex};

use minithread::{minisocket, thread, KernelConfig, System};

#[test]
fn send_survives_lossy_network() {
    let _ = env_logger::try_init();

    // Loss applies independently to each direction of each packet, so a single attempt's SYN,
    // SYNACK, ACK, data and data-ack can each be dropped. At 20% loss and 7 attempts the odds of
    // every attempt failing are negligible (well under 0.1%); this is an integration test for
    // "retransmission recovers from loss," not a statistical proof of the bound.
    let config = KernelConfig { period_ms: 5, initial_timeout_ms: 20, max_send_attempts: 7, ..Default::default() };
    let loss_rate = 0.2;

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_in_thread = received.clone();

    System::run_to_completion_lossy(config, loss_rate, move || {
        thread::fork(move || {
            let server = minisocket::listen(9200).expect("server handshake failed");
            let payload = minisocket::receive(server).expect("server receive failed");
            *received_in_thread.lock().unwrap() = Some(payload);
        });
        thread::fork(move || {
            let client = minisocket::connect(System::test_self_address(), 9200).expect("client handshake failed");
            let n = minisocket::send(client, b"still gets there").expect("send should eventually succeed");
            assert_eq!(n, b"still gets there".len());
        });
    });

    assert_eq!(received.lock().unwrap().as_deref(), Some(b"still gets there".as_slice()));
}
