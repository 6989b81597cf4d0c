//! SPSC ring throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin ring_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)
//!     BATCH=64        Elements per write/read call (default: 64)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ringflow::spsc::{Consumer, Producer, channel};

const RING_SIZE: u64 = 1 << 16;
const ITERATIONS: u64 = 1 << 24;

type Payload = i32;

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pin_to_cpu(cpu: usize) {
    core_affinity::set_for_current(core_affinity::CoreId { id: cpu });
}

fn bench_throughput(producer_cpu: usize, consumer_cpu: usize, batch: usize) {
    let (producer, consumer): (Producer<Payload>, Consumer<Payload>) = channel(RING_SIZE);

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = Arc::clone(&ready);

    let consumer_thread = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        let mut buf = vec![0 as Payload; batch];
        let mut expected: Payload = 0;
        let mut received = 0u64;
        while received < ITERATIONS {
            let n = consumer.read(&mut buf) as usize;
            if n == 0 {
                hint::spin_loop();
                continue;
            }
            for &value in &buf[..n] {
                if value != expected {
                    panic!("Data corruption: expected {expected}, got {value}");
                }
                expected = expected.wrapping_add(1);
            }
            received += n as u64;
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let mut scratch = vec![0 as Payload; batch];

    let start = Instant::now();

    let mut sent = 0u64;
    let mut next: Payload = 0;
    while sent < ITERATIONS {
        let remaining = (ITERATIONS - sent).min(batch as u64) as usize;
        for slot in &mut scratch[..remaining] {
            *slot = next;
            next = next.wrapping_add(1);
        }
        let mut offset = 0usize;
        while offset < remaining {
            let n = producer.write(&scratch[offset..remaining]) as usize;
            if n == 0 {
                hint::spin_loop();
            }
            offset += n;
        }
        sent += remaining as u64;
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = u128::from(ITERATIONS) * 1_000_000 / elapsed.as_nanos();
    println!("{ops_per_ms} ops/ms (batch={batch})");
}

fn bench_rtt(producer_cpu: usize, consumer_cpu: usize) {
    const RTT_ITERS: u64 = 1 << 20;

    let (ping_tx, ping_rx) = channel::<Payload>(RING_SIZE);
    let (pong_tx, pong_rx) = channel::<Payload>(RING_SIZE);

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = Arc::clone(&ready);

    let responder = std::thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        let mut buf = [0 as Payload; 1];
        for _ in 0..RTT_ITERS {
            loop {
                if ping_rx.read(&mut buf) == 1 {
                    while pong_tx.write(&buf) == 0 {
                        hint::spin_loop();
                    }
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let mut buf = [0 as Payload; 1];
    let start = Instant::now();

    for i in 0..RTT_ITERS {
        buf[0] = i as Payload;
        while ping_tx.write(&buf) == 0 {
            hint::spin_loop();
        }
        loop {
            if pong_rx.read(&mut buf) == 1 {
                break;
            }
            hint::spin_loop();
        }
    }

    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / u128::from(RTT_ITERS);
    println!("{rtt_ns} ns RTT");
}

fn main() {
    let producer_cpu = env_usize("PRODUCER_CPU", 0);
    let consumer_cpu = env_usize("CONSUMER_CPU", 2);
    let batch = env_usize("BATCH", 64);

    println!("ringflow SPSC (size={RING_SIZE}, iters={ITERATIONS}):");
    bench_throughput(producer_cpu, consumer_cpu, batch);
    bench_rtt(producer_cpu, consumer_cpu);
}
