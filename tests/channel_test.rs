/*!
 * Channel Integration Tests
 * Multi-producer ordering, exactly-once delivery and composed topologies
 */

use coord_kernel::{fan_in, fan_out, Channel, ChannelError, Pipeline};
use pretty_assertions::assert_eq;
use rand::Rng;
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

const PRODUCERS: u32 = 4;
const PER_PRODUCER: u32 = 500;

fn run_producers(channel: &Channel<(u32, u32)>) -> Vec<thread::JoinHandle<()>> {
    (0..PRODUCERS)
        .map(|p| {
            let channel = channel.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for seq in 0..PER_PRODUCER {
                    if rng.gen_ratio(1, 50) {
                        thread::sleep(Duration::from_micros(rng.gen_range(1..100)));
                    }
                    channel.send((p, seq)).unwrap();
                }
            })
        })
        .collect()
}

#[test]
fn test_per_producer_order_is_preserved() {
    for capacity in [0, 1, 8] {
        let channel = Channel::new(capacity).unwrap();
        let producers = run_producers(&channel);

        let closer = {
            let channel = channel.clone();
            thread::spawn(move || {
                for producer in producers {
                    producer.join().unwrap();
                }
                channel.close();
            })
        };

        let mut next = vec![0u32; PRODUCERS as usize];
        for (p, seq) in channel.iter() {
            assert_eq!(seq, next[p as usize], "capacity {}: producer {} reordered", capacity, p);
            next[p as usize] += 1;
        }
        closer.join().unwrap();
        assert_eq!(next, vec![PER_PRODUCER; PRODUCERS as usize]);

        let stats = channel.stats();
        assert_eq!(stats.sent, u64::from(PRODUCERS * PER_PRODUCER));
        assert_eq!(stats.received, stats.sent);
        assert!(stats.closed);
        assert!(stats.max_buffered <= capacity.max(1));
    }
}

#[test]
fn test_competing_consumers_receive_each_message_once() {
    let channel = Channel::new(4).unwrap();
    let producers = run_producers(&channel);

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let channel = channel.clone();
            thread::spawn(move || channel.iter().collect::<Vec<_>>())
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    channel.close();

    let mut seen = HashSet::new();
    for consumer in consumers {
        for message in consumer.join().unwrap() {
            assert!(seen.insert(message), "{:?} delivered twice", message);
        }
    }
    assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);
}

#[test]
fn test_closed_channel_semantics() {
    let channel = Channel::new(2).unwrap();
    channel.send("kept").unwrap();
    channel.close();
    channel.close();

    let err = channel.send("late").unwrap_err();
    assert_eq!(err.error, ChannelError::Closed);
    assert_eq!(err.into_inner(), "late");

    assert_eq!(channel.receive(), Some("kept"));
    assert_eq!(channel.receive(), None);
    assert_eq!(channel.try_receive(), Err(ChannelError::Closed));
    assert_eq!(
        channel.receive_timeout(Duration::from_millis(5)),
        Err(ChannelError::Closed)
    );
}

#[test]
fn test_pipeline_feeding_fan_out_and_fan_in() {
    let pipeline = Pipeline::<u64>::new(2)
        .unwrap()
        .stage("increment", |x| x + 1)
        .unwrap()
        .build();

    let squares = fan_out(pipeline.output().clone(), 3, |x| x * x).unwrap();

    let side: Channel<u64> = Channel::new(0).unwrap();
    let merged = fan_in(vec![squares.output().clone(), side.clone()], 4).unwrap();

    let feeder = {
        let (input, side) = (pipeline.input().clone(), side.clone());
        thread::spawn(move || {
            for x in 0..100 {
                input.send(x).unwrap();
            }
            input.close();
            side.send(1_000_000).unwrap();
            side.close();
        })
    };

    let mut results: Vec<u64> = merged.output().iter().collect();
    results.sort_unstable();

    let mut expected: Vec<u64> = (1..=100).map(|x| x * x).collect();
    expected.push(1_000_000);
    assert_eq!(results, expected);

    feeder.join().unwrap();
    pipeline.join().unwrap();
    squares.join().unwrap();
    merged.join().unwrap();
}
