//! Stream helpers.
//!
//! Watch subscriptions are exposed as boxed `Send` streams so sources can be
//! stored behind `dyn` traits.

pub use futures::stream::{empty, iter, once, BoxStream, Stream, StreamExt};

/// Boxes any `Send` stream into a [`BoxStream`].
pub fn boxed<'a, S>(stream: S) -> BoxStream<'a, S::Item>
where
    S: Stream + Send + 'a,
{
    stream.boxed()
}
