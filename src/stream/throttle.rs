//! Latest-wins throttling for snapshot streams

use futures::Stream;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `period`.
    ///
    /// The first item passes immediately. Items arriving during the cool-down
    /// replace each other; only the newest is emitted when it ends. Suited to
    /// state snapshots, where intermediate values carry no information.
    fn throttle(self, period: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, period)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream returned by [`ThrottleExt::throttle`]
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        #[pin]
        cooldown: Sleep,
        period: Duration,
        cooling: bool,
        upstream_done: bool,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, period: Duration) -> Self {
        Self {
            stream,
            cooldown: sleep(Duration::ZERO),
            period,
            cooling: false,
            upstream_done: false,
            pending: None,
        }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        while !*this.upstream_done {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => *this.upstream_done = true,
                Poll::Pending => break,
            }
        }

        if *this.cooling {
            if this.pending.is_none() && *this.upstream_done {
                return Poll::Ready(None);
            }
            match this.cooldown.as_mut().poll(cx) {
                Poll::Ready(()) => *this.cooling = false,
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.pending.take() {
            Some(item) => {
                this.cooldown.as_mut().reset(Instant::now() + *this.period);
                *this.cooling = true;
                Poll::Ready(Some(item))
            }
            None if *this.upstream_done => Poll::Ready(None),
            None => Poll::Pending,
        }
    }
}
