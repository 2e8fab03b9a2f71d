//! §8(c) handshake happy path, plus §8(e) close observed mid-send.

use std::sync::{Arc, Mutex};

use minithread::{minisocket, thread, KernelConfig, Semaphore, System};

fn fast_config() -> KernelConfig {
    KernelConfig { period_ms: 5, initial_timeout_ms: 20, max_send_attempts: 5, ..Default::default() }
}

#[test]
fn handshake_then_data_round_trips() {
    let _ = env_logger::try_init();

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_in_thread = received.clone();

    System::run_to_completion(fast_config(), move || {
        thread::fork(move || {
            let server = minisocket::listen(9000).expect("server handshake failed");
            let payload = minisocket::receive(server).expect("server receive failed");
            *received_in_thread.lock().unwrap() = Some(payload);
        });
        thread::fork(move || {
            let client = minisocket::connect(System::test_self_address(), 9000).expect("client handshake failed");
            let n = minisocket::send(client, b"hello, server").expect("client send failed");
            assert_eq!(n, b"hello, server".len());
        });
    });

    assert_eq!(received.lock().unwrap().as_deref(), Some(b"hello, server".as_slice()));
}

#[test]
fn close_while_send_is_in_flight_returns_connection_closed() {
    let _ = env_logger::try_init();

    // A deliberately long retransmit timeout: if `close` didn't actively wake a pending `send`,
    // this test would sit out the full timeout before finding out whether it observed the close.
    // `max_send_attempts` is high enough that a real ack (which can't arrive - see below) would
    // never be confused with exhausting retries within the test's lifetime.
    let config = KernelConfig {
        period_ms: 5,
        initial_timeout_ms: 5_000,
        max_send_attempts: 10,
        close_grace_period_ms: 5,
        ..Default::default()
    };

    let send_result: Arc<Mutex<Option<minithread::Result<usize>>>> = Arc::new(Mutex::new(None));
    let send_result_in_thread = send_result.clone();

    System::run_to_completion(config, move || {
        // Semaphore::new needs a bootstrapped kernel, so it's created here rather than outside
        // run_to_completion.
        let server_torn_down = Arc::new(Semaphore::new(0));
        let server_torn_down_writer = server_torn_down.clone();

        thread::fork(move || {
            let server = minisocket::listen(9100).expect("server handshake failed");
            // Tear the server side down completely before the client ever sends any data, so
            // that data packet can never find a socket to ack it against - it's simply dropped.
            minisocket::close(server);
            server_torn_down_writer.v();
        });
        thread::fork(move || {
            let client = minisocket::connect(System::test_self_address(), 9100).expect("client handshake failed");
            server_torn_down.p();
            thread::fork(move || {
                minithread::sleep_with_timeout(10);
                minisocket::close(client);
            });
            let result = minisocket::send(client, b"nobody is left to ack this");
            *send_result_in_thread.lock().unwrap() = Some(result);
        });
    });

    assert_eq!(send_result.lock().unwrap().take(), Some(Err(minithread::MinithreadError::ConnectionClosed)));
}
