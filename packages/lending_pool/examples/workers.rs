//! Demonstrates worker threads sharing a pool of reusable buffers.
//!
//! A fixed set of buffers is handed back and forth between more workers than there are buffers.
//! Workers that find no free buffer wait for one to be returned, or give up after a deadline.

use std::fmt::Write;
use std::thread;
use std::time::Duration;

use lending_pool::{LendingPool, Wait};

const BUFFERS: usize = 2;
const WORKERS: usize = 4;
const JOBS_PER_WORKER: usize = 3;

fn main() {
    println!("=== LendingPool worker example ===");
    println!();

    let pool = LendingPool::builder()
        .build_with(BUFFERS, || String::with_capacity(256))
        .expect("we do not intend to handle allocation failure as a real possibility - OOM is panic");

    println!("Created pool with {} buffers", pool.len());

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let pool = pool.clone();

            thread::spawn(move || {
                for job in 0..JOBS_PER_WORKER {
                    let mut buffer = pool.acquire_wait(Wait::Indefinitely);

                    buffer.clear();
                    write!(buffer, "worker {worker} job {job}").expect("writing to a String cannot fail");

                    // Simulate some work while holding on to the buffer.
                    thread::sleep(Duration::from_millis(5));

                    println!("  {} (capacity {})", *buffer, buffer.capacity());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread panicked");
    }

    println!();
    println!(
        "All workers done: {} buffers free, {} on loan",
        pool.len(),
        pool.borrowed_count()
    );

    // Nobody returns anything now, so a bounded wait comes back empty once both buffers are out.
    let first = pool.acquire();
    let second = pool.acquire();
    let third = pool.acquire_wait(Duration::from_millis(20));

    println!(
        "Holding two buffers, a third bounded wait returned {}",
        if third.is_some() { "a buffer" } else { "nothing" }
    );

    drop(first);
    drop(second);

    println!("Returned both buffers, {} free again", pool.len());
}
