use std::sync::Arc;
use std::thread;
use std::time::Duration;

use audiopipe::audio::{BoundedFrameQueue, Frame};

#[test]
fn test_overflow_drops_newest() {
    let capacity = 8;
    let queue = BoundedFrameQueue::new("bound", capacity);
    for i in 0..=capacity as u8 {
        let accepted = queue.offer(Frame::new(vec![i]));
        assert_eq!(accepted, (i as usize) < capacity);
        assert!(queue.len() <= capacity);
    }
    assert_eq!(queue.dropped(), 1);

    let drained: Vec<u8> = std::iter::from_fn(|| queue.poll()).map(|f| f[0]).collect();
    assert_eq!(drained, (0..capacity as u8).collect::<Vec<_>>());
}

#[test]
fn test_poll_on_empty_returns_none() {
    let queue: BoundedFrameQueue = BoundedFrameQueue::new("empty", 4);
    assert!(queue.poll().is_none());
    assert!(queue.take_timeout(Duration::from_millis(10)).is_none());
    assert!(!queue.is_shutdown());
}

#[test]
fn test_frames_survive_shutdown_for_polling() {
    let queue = BoundedFrameQueue::new("drain", 4);
    assert!(queue.offer(Frame::new(&b"a"[..])));
    assert!(queue.offer(Frame::new(&b"b"[..])));
    queue.shutdown();
    queue.shutdown();

    assert!(!queue.offer(Frame::new(&b"c"[..])));
    assert!(queue.take().is_none());
    assert_eq!(queue.poll().as_deref(), Some(&b"a"[..]));
    assert_eq!(queue.poll().as_deref(), Some(&b"b"[..]));
    assert!(queue.poll().is_none());
}

#[test]
fn test_take_blocks_until_offer() {
    let queue = Arc::new(BoundedFrameQueue::new("handoff", 2));
    let consumer = {
        let queue = queue.clone();
        thread::spawn(move || queue.take())
    };
    thread::sleep(Duration::from_millis(20));
    assert!(queue.offer(Frame::new(vec![42u8])));
    let frame = consumer.join().unwrap().unwrap();
    assert_eq!(&frame[..], &[42]);
}

#[test]
fn test_concurrent_producers_never_exceed_capacity() {
    let capacity = 16;
    let queue = Arc::new(BoundedFrameQueue::new("shared", capacity));
    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100u8 {
                    queue.offer(Frame::new(vec![p, i]));
                    assert!(queue.len() <= capacity);
                }
            })
        })
        .collect();

    let mut received = 0;
    while producers.iter().any(|p| !p.is_finished()) {
        if queue.poll().is_some() {
            received += 1;
        }
    }
    for p in producers {
        p.join().unwrap();
    }
    received += std::iter::from_fn(|| queue.poll()).count();
    assert_eq!(received as u64 + queue.dropped(), 400);
}
