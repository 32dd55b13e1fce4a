//! Client-side traffic scenarios used by the `number_client` binary and the
//! end-to-end tests.

use crate::defs::{LINE_TERMINATOR, MAX_DOMAIN_VALUE, TERMINATE_COMMAND};
use crate::protocol::append_formatted;

use rand::Rng;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

/// Records per batch written by the endurance scenarios.
pub const ENDURANCE_BATCH_LEN: usize = 400_000;

/// Totals a scenario expects the server to report on a fresh start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expected {
    /// Unique records.
    pub uniques: u64,
    /// Duplicate records.
    pub duplicates: u64,
}

/// Parameters of an endurance run.
#[derive(Clone, Debug)]
pub struct EnduranceOptions {
    /// Number of concurrent producer connections.
    pub producers: usize,
    /// Records sent by each producer.
    pub per_producer: u32,
    /// First value of the first producer; producers cover disjoint ranges.
    pub start: u32,
    /// Send random values instead of sequential ones.
    pub random: bool,
    /// Records per batch.
    pub batch_len: usize,
    /// Minimum time between two batches of one producer.
    pub pace: Duration,
    /// Send `terminate` after this delay once all producers are done.
    pub terminate_after: Option<Duration>,
}

impl Default for EnduranceOptions {
    fn default() -> Self {
        Self {
            producers: 5,
            per_producer: 4_000_000,
            start: 0,
            random: false,
            batch_len: ENDURANCE_BATCH_LEN,
            pace: Duration::from_secs(1),
            terminate_after: Some(Duration::from_secs(20)),
        }
    }
}

/// Timing of one producer.
#[derive(Clone, Copy, Debug)]
pub struct ProducerStats {
    /// Batches written.
    pub batches: usize,
    /// Wall time spent by the producer.
    pub elapsed: Duration,
    /// Time spent inside `write_all`.
    pub write_time: Duration,
}

fn send_lines(stream: &mut TcpStream, lines: &[&str]) -> io::Result<()> {
    for line in lines {
        stream.write_all(line.as_bytes())?;
        stream.write_all(LINE_TERMINATOR.as_bytes())?;
    }
    stream.flush()
}

/// Opens a connection, sends `terminate` and closes it.
pub fn send_terminate(addr: SocketAddr) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    send_lines(&mut stream, &[TERMINATE_COMMAND])
}

/// Scripted mix of uniques, duplicates, invalid lines and a final
/// `terminate` with six simultaneous connections.
///
/// `pause` separates the phases; the server needs it to drain each phase
/// before the next one starts. Against a fresh server with the default five
/// workers the run ends with 11 uniques and 4 duplicates: the sixth
/// connection never gets a worker and the line sent after `terminate` is
/// never read.
pub fn run_basic(addr: SocketAddr, pause: Duration) -> io::Result<Expected> {
    let half = pause / 2;

    log::info!("Sending 5 uniques and 1 invalid input");
    let mut client = TcpStream::connect(addr)?;
    send_lines(
        &mut client,
        &[
            "000000000",
            "111111111",
            "222222222",
            "333333333",
            "444444444",
            "abc1",
        ],
    )?;
    thread::sleep(half);
    drop(client);
    thread::sleep(pause);

    log::info!("Sending 2 uniques, 3 duplicates, and 1 invalid input");
    let mut client = TcpStream::connect(addr)?;
    send_lines(
        &mut client,
        &[
            "000000000",
            "555555555",
            "222222222",
            "666666666",
            "444444444",
            "77777777",
        ],
    )?;
    thread::sleep(half);
    drop(client);
    thread::sleep(pause);

    log::info!("Simulating invalid input on a short-lived connection");
    let mut client = TcpStream::connect(addr)?;
    // The server hangs up after the first line; later writes may fail.
    for _ in 0..3 {
        if send_lines(&mut client, &["123"]).is_err() {
            break;
        }
        thread::sleep(pause / 10);
    }
    drop(client);
    thread::sleep(pause);

    log::info!("Opening 6 sockets, sending 4 uniques, 1 duplicate, terminate, and 2 ignored inputs");
    let mut clients = (0..6)
        .map(|_| TcpStream::connect(addr))
        .collect::<io::Result<Vec<_>>>()?;
    let values = [
        "123456789",
        "987654321",
        "123451234",
        "000000000",
        "543215432",
        // Sixth connection waits for a worker that never frees up.
        "888888888",
    ];
    for (client, value) in clients.iter_mut().zip(values) {
        send_lines(client, &[value])?;
    }
    thread::sleep(pause);

    send_lines(&mut clients[0], &[TERMINATE_COMMAND])?;
    // Read by nobody: the connection stops after `terminate`.
    let _ = send_lines(&mut clients[0], &["005550055"]);
    thread::sleep(pause);

    Ok(Expected {
        uniques: 11,
        duplicates: 4,
    })
}

/// Builds newline-separated batches of `batch_len` records covering
/// `[start, end)`, or random values in `[1, MAX]` when `random` is set.
pub fn build_batches(start: u32, end: u32, random: bool, batch_len: usize) -> Vec<String> {
    let batch_len = batch_len.max(1);
    let mut rng = rand::thread_rng();
    let mut batches = Vec::new();
    let mut buf = String::new();
    let mut in_batch = 0;

    for i in start..end {
        let value = if random {
            rng.gen_range(1..=MAX_DOMAIN_VALUE as u32)
        } else {
            i
        };
        append_formatted(&mut buf, value);
        in_batch += 1;

        if in_batch == batch_len {
            batches.push(std::mem::take(&mut buf));
            in_batch = 0;
        }
    }
    if !buf.is_empty() {
        batches.push(buf);
    }
    batches
}

/// Writes every batch on `stream`, keeping at least `pace` between the starts
/// of two consecutive batches.
pub fn send_batches(
    stream: &mut TcpStream,
    batches: &[String],
    pace: Duration,
) -> io::Result<ProducerStats> {
    let started = Instant::now();
    let mut write_time = Duration::ZERO;

    for batch in batches {
        let write_start = Instant::now();
        stream.write_all(batch.as_bytes())?;
        stream.flush()?;
        let spent = write_start.elapsed();
        write_time += spent;

        if let Some(rest) = pace.checked_sub(spent) {
            thread::sleep(rest);
        }
    }

    Ok(ProducerStats {
        batches: batches.len(),
        elapsed: started.elapsed(),
        write_time,
    })
}

/// Runs `producers` concurrent connections over disjoint value ranges, then
/// optionally sends `terminate`.
///
/// With sequential values the server ends up with
/// `producers * per_producer` uniques and no duplicates.
pub fn run_endurance(addr: SocketAddr, options: &EnduranceOptions) -> io::Result<Vec<ProducerStats>> {
    let handles: Vec<_> = (0..options.producers)
        .map(|id| {
            let options = options.clone();
            thread::spawn(move || -> io::Result<ProducerStats> {
                let start = options.start + id as u32 * options.per_producer;
                let end = start + options.per_producer;
                log::info!("Producer {} is building values [{}, {})", id + 1, start, end);
                let batches = build_batches(start, end, options.random, options.batch_len);

                let mut stream = TcpStream::connect(addr)?;
                let stats = send_batches(&mut stream, &batches, options.pace)?;
                log::info!(
                    "Producer {} sent {} batches in {:?}, write time: {:?}",
                    id + 1,
                    stats.batches,
                    stats.elapsed,
                    stats.write_time
                );
                Ok(stats)
            })
        })
        .collect();

    let mut stats = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = handle
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "producer thread panicked"))?;
        stats.push(result?);
    }

    if let Some(delay) = options.terminate_after {
        log::info!("Producers are finished, sending terminate in {:?}", delay);
        thread::sleep(delay);
        send_terminate(addr)?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sequential_batches() {
        let batches = build_batches(10, 15, false, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches[0],
            format!("000000010{0}000000011{0}", LINE_TERMINATOR)
        );
        assert_eq!(batches[2], format!("000000014{}", LINE_TERMINATOR));
    }

    #[test]
    fn test_build_random_batches_stay_in_domain() {
        let batches = build_batches(0, 100, true, 1_000);
        assert_eq!(batches.len(), 1);
        let lines: Vec<_> = batches[0].lines().collect();
        assert_eq!(lines.len(), 100);
        for line in lines {
            assert_eq!(line.len(), 9);
            let v: u32 = line.parse().unwrap();
            assert!((1..=999_999_999).contains(&v));
        }
    }

    #[test]
    fn test_empty_range_builds_nothing() {
        assert!(build_batches(5, 5, false, 10).is_empty());
    }
}
