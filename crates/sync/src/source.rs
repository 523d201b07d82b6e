//! Pull sources for the polling path.

/// Something that can fetch the current value of a feed on demand.
///
/// Implemented for any `Fn() -> Future<Output = anyhow::Result<T>>`, so a
/// closure around an HTTP call is usually enough:
///
/// ```ignore
/// let source = move || {
///     let client = client.clone();
///     async move { Ok(client.get(url).send().await?.json().await?) }
/// };
/// ```
pub trait FeedSource<T>: Send + Sync + 'static {
    fn pull(&self) -> impl Future<Output = anyhow::Result<T>> + Send;
}

impl<T, F, Fut> FeedSource<T> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send,
{
    fn pull(&self) -> impl Future<Output = anyhow::Result<T>> + Send {
        self()
    }
}
