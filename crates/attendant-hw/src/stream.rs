//! Latest-frame channel between a capture thread and its consumer.
//!
//! Only the newest frame is retained. Frames published while the consumer
//! is busy overwrite each other, so a slow consumer skips frames instead of
//! building a backlog.

use crate::frame::Frame;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// A source of live frames.
pub trait FrameProvider: Send {
    /// Wait for the next unseen frame. `None` once the source has ended.
    fn next_frame(&mut self) -> impl Future<Output = Option<Arc<Frame>>> + Send;
}

/// Producer half: owned by the capture thread.
pub struct FramePublisher {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FramePublisher {
    /// Replace the current frame. Returns false once every stream is gone.
    pub fn publish(&self, frame: Frame) -> bool {
        self.tx.send(Some(Arc::new(frame))).is_ok()
    }

    /// True once every [`FrameStream`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half.
pub struct FrameStream {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl FrameStream {
    pub fn channel() -> (FramePublisher, FrameStream) {
        let (tx, rx) = watch::channel(None);
        (FramePublisher { tx }, FrameStream { rx })
    }
}

impl FrameProvider for FrameStream {
    async fn next_frame(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.rx.changed().await.ok()?;
            let latest = self.rx.borrow_and_update().clone();
            if latest.is_some() {
                return latest;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(sequence: u32) -> Frame {
        Frame {
            data: vec![128; 3],
            width: 1,
            height: 1,
            timestamp: Instant::now(),
            sequence,
            is_dark: false,
        }
    }

    #[tokio::test]
    async fn test_latest_frame_wins() {
        let (publisher, mut stream) = FrameStream::channel();
        for seq in 0..5 {
            assert!(publisher.publish(frame(seq)));
        }
        let got = stream.next_frame().await.unwrap();
        assert_eq!(got.sequence, 4);
    }

    #[tokio::test]
    async fn test_frame_not_delivered_twice() {
        let (publisher, mut stream) = FrameStream::channel();
        publisher.publish(frame(1));
        assert_eq!(stream.next_frame().await.unwrap().sequence, 1);

        let pending = tokio::time::timeout(std::time::Duration::from_millis(20), stream.next_frame()).await;
        assert!(pending.is_err(), "no new frame was published");
    }

    #[tokio::test]
    async fn test_ends_when_publisher_dropped() {
        let (publisher, mut stream) = FrameStream::channel();
        publisher.publish(frame(7));
        drop(publisher);
        // The last published frame is still delivered, then the stream ends.
        assert_eq!(stream.next_frame().await.unwrap().sequence, 7);
        assert!(stream.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_publisher_sees_closed_stream() {
        let (publisher, stream) = FrameStream::channel();
        assert!(!publisher.is_closed());
        drop(stream);
        assert!(publisher.is_closed());
        assert!(!publisher.publish(frame(0)));
    }
}
