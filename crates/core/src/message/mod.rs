//! Signaling messages, the server channel contract, and their handlers.

use std::time::Duration;

pub mod handlers;
mod signaling;

pub use signaling::FieldDescriptor;
pub use signaling::SharedSignalingHandler;
pub use signaling::SharedSignalingTransport;
pub use signaling::Signaling;
pub use signaling::SignalingAction;
pub use signaling::SignalingHandler;
pub use signaling::SignalingResponse;
pub use signaling::SignalingTransport;

use crate::error::Error;
use crate::error::Result;

/// Send `signaling` to `destination` and wait at most `timeout` for the response.
/// A failure code in the response becomes the matching [Error].
pub async fn send_signaling(
    transport: &dyn SignalingTransport,
    destination: &str,
    timeout: Duration,
    signaling: &Signaling,
) -> Result<SignalingResponse> {
    tracing::debug!(
        "send {:?} of field {} to {}",
        signaling.action,
        signaling.field.id,
        destination
    );
    match tokio::time::timeout(timeout, transport.send(destination, signaling)).await {
        Ok(resp) => resp?.into_result(),
        Err(_) => Err(Error::ServerFault(format!(
            "{:?} not answered within {:?}",
            signaling.action, timeout
        ))),
    }
}
