use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{instrument, trace};

use crate::protocol::{FrameError, PollRequest, PollResponse, SensorDescriptor, read_frame, write_frame};
use crate::{Measurement, Node};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Connecting or writing to the node failed
    #[error("node {endpoint} unreachable: {source}")]
    Unreachable {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("node {endpoint} did not answer within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    /// The node closed the connection early or sent an unreadable frame
    #[error("invalid response from node {endpoint}: {source}")]
    Serialization {
        endpoint: String,
        source: FrameError,
    },
}

/// Hub side of the node link
///
/// Every call opens a fresh connection, sends one request and waits for one
/// response. The whole exchange, including connecting, is bounded by the
/// client's timeout.
#[derive(Debug, Clone)]
pub struct NodeClient {
    timeout: Duration,
}

impl NodeClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[instrument(skip(self, node, sensors), fields(node = node.id, endpoint = %node.endpoint()))]
    pub async fn poll(
        &self,
        node: &Node,
        sensors: Vec<SensorDescriptor>,
    ) -> Result<Vec<Measurement>, NodeError> {
        let endpoint = node.endpoint();
        let request = PollRequest { sensors };

        match tokio::time::timeout(self.timeout, exchange(&endpoint, &request)).await {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout {
                endpoint,
                timeout: self.timeout,
            }),
        }
    }
}

async fn exchange(endpoint: &str, request: &PollRequest) -> Result<Vec<Measurement>, NodeError> {
    let mut stream = TcpStream::connect(endpoint)
        .await
        .map_err(|source| NodeError::Unreachable {
            endpoint: endpoint.to_string(),
            source,
        })?;

    trace!("connected, requesting {} sensors", request.sensors.len());

    write_frame(&mut stream, request)
        .await
        .map_err(|e| classify(endpoint, e))?;

    let response: PollResponse = read_frame(&mut stream)
        .await
        .map_err(|e| classify(endpoint, e))?;

    trace!("received {} measurements", response.measurements.len());
    Ok(response.measurements)
}

fn classify(endpoint: &str, error: FrameError) -> NodeError {
    let endpoint = endpoint.to_string();
    match error {
        FrameError::Io(source) => NodeError::Unreachable { endpoint, source },
        source => NodeError::Serialization { endpoint, source },
    }
}
