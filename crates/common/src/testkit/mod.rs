/// In-process harness for multi-device tests
///
/// Devices talk over a [`MemoryNetwork`] and share one
///  [`crate::store::MemoryStore`], so whole exchanges run without sockets
///  or an overlay.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::TestNetwork;
///
/// #[tokio::test]
/// async fn test_ping() -> anyhow::Result<()> {
///     let mut net = TestNetwork::new();
///     let d1 = net.add_device("alice")?;
///     let d2 = net.add_device("alice")?;
///     d1.join("pw").await?;
///     d2.join("pw").await?;
///
///     let answered = d1.peer().ping_devices(None).await?;
///     assert_eq!(answered, vec![d2.location().clone()]);
///     Ok(())
/// }
/// ```
mod network;
mod peer;

pub use network::{MemoryNetwork, MemoryTransport, TestNetwork};
pub use peer::TestPeer;
