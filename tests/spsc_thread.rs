//! Cross-thread integration tests for the lock-free SPSC layer.

use std::sync::atomic::Ordering;
use std::time::Duration;

use ringflow::spsc::{RawParts, Timeout, channel};

#[test]
fn bulk_transfers_preserve_fifo_byte_for_byte() {
    let (producer, consumer) = channel::<u32>(64);
    let total = 100_000u32;

    let producer_thread = std::thread::spawn(move || {
        let mut next = 0u32;
        let mut batch = Vec::with_capacity(17);
        while next < total {
            batch.clear();
            // Deliberately uneven batch sizes to exercise wrap spans.
            let len = (next % 17 + 1).min(total - next);
            batch.extend(next..next + len);
            let mut offset = 0usize;
            while offset < batch.len() {
                let n = producer.write(&batch[offset..]) as usize;
                if n == 0 {
                    std::hint::spin_loop();
                }
                offset += n;
            }
            next += len;
        }
    });

    let consumer_thread = std::thread::spawn(move || {
        let mut received = Vec::with_capacity(total as usize);
        let mut buf = [0u32; 23];
        while (received.len() as u32) < total {
            let n = consumer.read(&mut buf) as usize;
            if n == 0 {
                std::hint::spin_loop();
                continue;
            }
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    producer_thread.join().unwrap();
    let received = consumer_thread.join().unwrap();

    for (i, &val) in received.iter().enumerate() {
        assert_eq!(val, i as u32);
    }
}

#[test]
fn spin_helpers_complete_a_lopsided_transfer() {
    let (producer, consumer) = channel::<u8>(8);
    let payload: Vec<u8> = (0..=255).collect();

    let producer_thread = {
        let payload = payload.clone();
        std::thread::spawn(move || producer.write_all_spin(&payload, Timeout::Infinite))
    };

    let mut out = vec![0u8; 256];
    let n = consumer.read_exact_spin(&mut out, Timeout::Infinite);

    assert_eq!(producer_thread.join().unwrap(), 256);
    assert_eq!(n, 256);
    assert_eq!(out, payload);
}

#[test]
fn spin_read_gives_up_after_timeout() {
    let (_producer, consumer) = channel::<u64>(8);
    let mut out = [0u64; 4];
    let n = consumer.read_exact_spin(&mut out, Timeout::Duration(Duration::from_millis(10)));
    assert_eq!(n, 0);
}

#[test]
fn foreign_thread_signal_wakes_an_async_waiter() {
    let (producer, consumer) = channel::<u32>(8);

    let signaller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(producer.write(&[41, 42]), 2);
    });

    // The producing thread is outside any async runtime; its write's
    // signal must still complete this wait.
    futures::executor::block_on(consumer.wait());
    signaller.join().unwrap();

    let mut out = [0u32; 2];
    assert_eq!(consumer.read(&mut out), 2);
    assert_eq!(out, [41, 42]);
}

/// Raw parts carried into a "foreign" producer thread.
struct ForeignSide(RawParts<u32>);

// SAFETY: the raw pointers stay valid for the whole test (the ring's ends
// are kept alive until after join) and the thread honors the single
// producer role.
unsafe impl Send for ForeignSide {}

#[test]
fn raw_parts_support_a_foreign_producer() {
    let (producer, consumer) = channel::<u32>(8);
    let foreign = ForeignSide(producer.raw_parts());
    let total = 1_000u32;

    // Simulates a caller outside Rust driving the producer side purely
    // through the pointer contract: publish data, then release-store the
    // counter.
    let foreign_thread = std::thread::spawn(move || {
        let foreign = foreign;
        let parts = foreign.0;
        let mask = parts.capacity - 1;
        for value in 0..total {
            // SAFETY: sole producer; consumer counter is acquire-loaded
            // before slots are reused.
            unsafe {
                loop {
                    let nwritten = (*parts.nwritten).load(Ordering::Relaxed);
                    let nread = (*parts.nread).load(Ordering::Acquire);
                    if nwritten - nread < parts.capacity {
                        *parts.data.add((nwritten & mask) as usize) = value;
                        (*parts.nwritten).store(nwritten + 1, Ordering::Release);
                        break;
                    }
                    std::hint::spin_loop();
                }
            }
        }
    });

    let mut received = Vec::with_capacity(total as usize);
    let mut buf = [0u32; 16];
    while (received.len() as u32) < total {
        let n = consumer.read(&mut buf) as usize;
        if n == 0 {
            std::hint::spin_loop();
            continue;
        }
        received.extend_from_slice(&buf[..n]);
    }

    foreign_thread.join().unwrap();
    drop(producer);

    for (i, &val) in received.iter().enumerate() {
        assert_eq!(val, i as u32);
    }
}

#[test]
fn close_stops_an_infinite_spin_writer() {
    let (producer, consumer) = channel::<u8>(2);
    assert_eq!(producer.write(&[1, 2]), 2);

    let writer = std::thread::spawn(move || producer.write_all_spin(&[3, 4, 5], Timeout::Infinite));

    std::thread::sleep(Duration::from_millis(10));
    consumer.close();

    // The spinning writer observes the close and returns its short count.
    assert_eq!(writer.join().unwrap(), 0);
}
